//! pipejit - JIT Pipeline Engine
//!
//! This library compiles small declarative data-flow pipelines to native
//! code and runs them in-process. A pipeline is an ordered sequence of
//! operator invocations over typed variables; the engine lowers it to a
//! C++17 compilation unit, builds a shared object through the host
//! compiler, caches the artifact by content fingerprint, and calls the
//! exported entry with per-call overhead dominated by argument
//! marshalling.
//!
//! # Architecture
//!
//! The execution pipeline consists of two paths over one IR:
//!
//! 1. **Interpreter** (`interp` module)
//!    - Walks the IR, dispatching per operator name
//!    - Semantic reference for every operator; baseline for benchmarks
//!
//! 2. **JIT** (`codegen` + `jit` modules)
//!    - Emits a self-contained C++ unit against the shipped operator
//!      library (`include/pipeline_ops.hpp`)
//!    - Compiles it out-of-process (`cc` driver), keyed by a SHA-256
//!      fingerprint of the pipeline shape
//!    - Loads the artifact via `dlopen` and calls the
//!      `pipeline_execute_<fingerprint>` entry
//!
//! Both paths agree bit-for-bit on integers and to rounding on floats,
//! including the never-trap policy: division by zero and the square root
//! of a negative value yield zero.
//!
//! # Example
//!
//! ```no_run
//! use pipejit::{demo_config, ExecutionContext, Mode, PipelineExecutor, PipelineManager, Value};
//!
//! let manager = PipelineManager::global();
//! let mut executor = manager.create(demo_config(), Mode::Interpreter).unwrap();
//!
//! let mut ctx = ExecutionContext::new();
//! ctx.set_variable("price_a", Value::F64(100.0));
//! ctx.set_variable("price_b", Value::F64(50.0));
//! ctx.set_variable("volume", Value::I32(10));
//!
//! executor.execute(&mut ctx).unwrap();
//! assert_eq!(ctx.get_f64("final_score"), Some(15.0));
//! ```
//!
//! # Concurrency
//!
//! The core is single-threaded cooperative: every `execute` runs to
//! completion on the caller's thread, and the compiler driver blocks on
//! the subprocess. Shared state (compile cache, loader map) is internally
//! locked, and compilation is serialised per fingerprint, so concurrent
//! callers compile each shape at most once. Do not call `clear_cache`
//! while an `execute` is in flight.

pub mod catalog;
pub mod codegen;
pub mod config;
pub mod fingerprint;
pub mod interp;
pub mod ir;
pub mod jit;
pub mod manager;

pub use catalog::{lookup, validate, OpDescriptor, ValidationError};
pub use codegen::{CodeEmitter, EmitOptions, EmitStyle};
pub use fingerprint::{config_fingerprint, entry_symbol, sanitize_identifier};
pub use interp::InterpreterExecutor;
pub use ir::{
    demo_config, Arg, DataType, ExecutionContext, IoField, OpCall, PipelineConfig, Value,
};
pub use jit::{CompileOptions, JitExecutor, PipelineLoader};
pub use manager::{Mode, PipelineError, PipelineExecutor, PipelineManager, PipelineResult};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpreter_demo_through_manager() {
        let manager = PipelineManager::with_cache_dir("./generated-test");
        let mut executor = manager
            .create(demo_config(), Mode::Interpreter)
            .expect("create interpreter");

        let mut ctx = ExecutionContext::new();
        ctx.set_variable("price_a", Value::F64(100.0));
        ctx.set_variable("price_b", Value::F64(50.0));
        ctx.set_variable("volume", Value::I32(10));

        executor.execute(&mut ctx).expect("execute");
        assert_eq!(ctx.get_f64("final_score"), Some(15.0));
        assert!(!executor.needs_recompile());
    }

    #[test]
    fn test_invalid_config_refused() {
        let manager = PipelineManager::with_cache_dir("./generated-test");
        let mut config = demo_config();
        config.name.clear();
        let err = manager
            .create(config, Mode::Interpreter)
            .map(|_| ())
            .expect_err("empty name must be refused");
        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::EmptyPipelineName)
        ));
    }

    #[test]
    fn test_fingerprint_stable_across_construction_paths() {
        let built = demo_config();
        let parsed = config::parse_str(&config::to_json(&built)).expect("reparse");
        assert_eq!(built.fingerprint, parsed.fingerprint);
    }

    #[test]
    fn test_distinct_pipelines_get_distinct_symbols() {
        let a = demo_config();
        let mut b = demo_config();
        b.steps[0].op_name = "sub".to_string();
        b.compute_fingerprint();
        assert_ne!(entry_symbol(&a.fingerprint), entry_symbol(&b.fingerprint));
    }
}
