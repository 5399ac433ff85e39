//! JIT Executor
//!
//! Compiles a pipeline on first use (or picks up the cached artifact),
//! loads the shared object, and thereafter turns every `execute` call into
//! argument marshalling plus one indirect call through the resolved entry.
//!
//! Marshalling follows the slot encoding the emitter generates unpack code
//! for: one 8-byte slot per input/output in declaration order, `f64`/`f32`
//! as double bit patterns, `i32`/`i64` as two's-complement `int64_t`.
//! Inputs missing from the context marshal as zero; string and list fields
//! stay host-side.

use std::sync::Arc;

use tracing::{debug, trace};

use super::compiler::{CompileOptions, JitDriver};
use super::loader::{resolve_entry, DynLib, ExecuteFn};
use crate::codegen::EmitOptions;
use crate::ir::{DataType, ExecutionContext, PipelineConfig, Value};
use crate::manager::{PipelineError, PipelineExecutor, PipelineResult};

/// Executor that runs a pipeline through JIT-compiled native code.
///
/// Owns its library handle: dropping the executor (or forcing a recompile)
/// closes the library. Never drop it while a call is in flight.
pub struct JitExecutor {
    config: PipelineConfig,
    fingerprint: String,
    driver: Arc<JitDriver>,
    emit_options: EmitOptions,
    compile_options: CompileOptions,
    lib: Option<DynLib>,
    entry: Option<ExecuteFn>,
    needs_recompile: bool,
}

impl JitExecutor {
    pub fn new(
        mut config: PipelineConfig,
        driver: Arc<JitDriver>,
        emit_options: EmitOptions,
        compile_options: CompileOptions,
    ) -> Self {
        if config.fingerprint.is_empty() {
            config.compute_fingerprint();
        }
        let fingerprint = config.fingerprint.clone();
        JitExecutor {
            config,
            fingerprint,
            driver,
            emit_options,
            compile_options,
            lib: None,
            entry: None,
            needs_recompile: true,
        }
    }

    /// Replace the emission options; takes effect on the next recompile.
    pub fn set_options(&mut self, emit_options: EmitOptions) {
        self.emit_options = emit_options;
    }

    /// Force a fresh compile: closes the current library, recompiles (a
    /// valid cached artifact short-circuits), and clears the flag.
    pub fn recompile(&mut self) -> PipelineResult<()> {
        self.unload();
        self.driver
            .compile(&self.config, &self.emit_options, &self.compile_options)?;
        self.needs_recompile = false;
        Ok(())
    }

    fn unload(&mut self) {
        self.entry = None;
        self.lib = None;
    }

    fn ensure_loaded(&mut self) -> PipelineResult<()> {
        if self.entry.is_some() {
            return Ok(());
        }

        let so_path = match self.driver.get_so_path(&self.fingerprint) {
            Some(path) => path,
            None => {
                debug!(fingerprint = %self.fingerprint, "artifact missing, compiling");
                self.driver
                    .compile(&self.config, &self.emit_options, &self.compile_options)?;
                self.driver
                    .get_so_path(&self.fingerprint)
                    .ok_or_else(|| {
                        PipelineError::Compile(super::compiler::CompileError::ArtifactMissing(
                            self.driver.so_path(&self.fingerprint),
                        ))
                    })?
            }
        };

        let lib = DynLib::open(&so_path).map_err(PipelineError::Load)?;
        let entry = resolve_entry(&lib, &self.fingerprint).map_err(PipelineError::Load)?;
        self.lib = Some(lib);
        self.entry = Some(entry);
        Ok(())
    }

    /// One slot per input, in declaration order, encoded by declared type.
    fn marshal_inputs(&self, context: &ExecutionContext) -> Vec<u64> {
        self.config
            .inputs
            .iter()
            .map(|input| match input.ty {
                DataType::F64 | DataType::F32 => {
                    context.get_f64(&input.name).unwrap_or(0.0).to_bits()
                }
                DataType::I64 => context.get_i64(&input.name).unwrap_or(0) as u64,
                DataType::I32 => context.get_i32(&input.name).unwrap_or(0) as i64 as u64,
                _ => 0,
            })
            .collect()
    }

    /// Decode output slots back into the context, by declared type.
    fn write_outputs(&self, slots: &[u64], context: &mut ExecutionContext) {
        for (output, slot) in self.config.outputs.iter().zip(slots) {
            let value = match output.ty {
                DataType::F64 => Value::F64(f64::from_bits(*slot)),
                DataType::F32 => Value::F32(f64::from_bits(*slot) as f32),
                DataType::I64 => Value::I64(*slot as i64),
                DataType::I32 => Value::I32(*slot as i64 as i32),
                // Strings and lists never cross the entry boundary.
                _ => continue,
            };
            context.set_variable(output.name.clone(), value);
        }
    }
}

impl PipelineExecutor for JitExecutor {
    fn execute(&mut self, context: &mut ExecutionContext) -> PipelineResult<()> {
        if self.needs_recompile {
            self.recompile()?;
        }
        self.ensure_loaded()?;

        let mut input = self.marshal_inputs(context);
        let mut output = vec![0u64; self.config.outputs.len()];

        let entry = self.entry.ok_or_else(|| {
            PipelineError::Load(super::loader::LoadError::NotLoaded {
                fingerprint: self.fingerprint.clone(),
            })
        })?;

        trace!(fingerprint = %self.fingerprint, inputs = input.len(), "invoking entry");
        // Safety: the arrays are sized to the pipeline's declared inputs
        // and outputs, which is all the emitted unpack/pack code indexes.
        let ok = unsafe {
            entry(
                input.as_mut_ptr() as *mut std::os::raw::c_void,
                output.as_mut_ptr() as *mut std::os::raw::c_void,
            )
        };
        if !ok {
            return Err(PipelineError::EntryFailed(self.fingerprint.clone()));
        }

        self.write_outputs(&output, context);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn needs_recompile(&self) -> bool {
        self.needs_recompile
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::demo_config;

    fn executor_over(dir: &std::path::Path) -> JitExecutor {
        JitExecutor::new(
            demo_config(),
            Arc::new(JitDriver::new(dir)),
            EmitOptions::default(),
            CompileOptions::default(),
        )
    }

    #[test]
    fn test_marshalling_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let executor = executor_over(dir.path());

        let mut context = ExecutionContext::new();
        context.set_variable("price_a", Value::F64(100.0));
        context.set_variable("price_b", Value::F64(50.0));
        context.set_variable("volume", Value::I32(10));

        let slots = executor.marshal_inputs(&context);
        assert_eq!(slots.len(), 3);
        assert_eq!(f64::from_bits(slots[0]), 100.0);
        assert_eq!(f64::from_bits(slots[1]), 50.0);
        assert_eq!(slots[2] as i64, 10);
    }

    #[test]
    fn test_missing_inputs_marshal_as_zero() {
        let dir = tempfile::tempdir().expect("tempdir");
        let executor = executor_over(dir.path());
        let slots = executor.marshal_inputs(&ExecutionContext::new());
        assert_eq!(slots, vec![0f64.to_bits(), 0f64.to_bits(), 0]);
    }

    #[test]
    fn test_write_outputs_by_declared_type() {
        let dir = tempfile::tempdir().expect("tempdir");
        let executor = executor_over(dir.path());

        let mut context = ExecutionContext::new();
        executor.write_outputs(&[15.0f64.to_bits()], &mut context);
        assert_eq!(context.get_f64("final_score"), Some(15.0));
    }

    #[test]
    fn test_new_executor_needs_recompile() {
        let dir = tempfile::tempdir().expect("tempdir");
        let executor = executor_over(dir.path());
        assert!(executor.needs_recompile());
        assert_eq!(executor.name(), "demo_pipeline");
        assert!(!executor.fingerprint().is_empty());
    }
}
