//! JIT Compilation Module
//!
//! This module turns pipeline configs into native code through the host
//! toolchain and runs them in-process:
//!
//! ```text
//! PipelineConfig -> fingerprint -> cache lookup
//!                                   | miss
//!                                   v
//!                 emit C++ -> cc subprocess -> libpipeline_<fp>.so
//!                                   |
//!                                   v
//!                 dlopen -> pipeline_execute_<fp> -> per-call marshalling
//! ```
//!
//! Per-call overhead after the first compile is argument marshalling plus
//! one indirect call; the optimiser sees the whole pipeline body at once.
//!
//! # Modules
//!
//! - [`cache`]: fingerprint-keyed compile cache over on-disk artifacts
//! - [`compiler`]: host-compiler subprocess driver and the compile
//!   orchestration used by executors and the manager
//! - [`loader`]: dlopen wrapper and the fingerprint-keyed pipeline loader
//! - [`executor`]: the JIT executor (compile-on-demand + marshalling)

pub mod cache;
pub mod compiler;
pub mod executor;
pub mod loader;

pub use cache::{CacheEntry, CompileCache};
pub use compiler::{CcDriver, CompileError, CompileOptions, CompileResult, JitDriver};
pub use executor::JitExecutor;
pub use loader::{DynLib, LoadError, LoadResult, PipelineLoader};
