//! Pipeline Manager
//!
//! Process-wide facade over the engine: selects the executor variant,
//! owns the JIT driver (compile cache + cache directory) and the shared
//! pipeline loader, and propagates configuration to both.
//!
//! A single [`PipelineManager::global()`] instance serves the common case;
//! tests construct private managers over temporary cache directories to
//! stay isolated from each other.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use tracing::debug;

use crate::catalog::{self, ValidationError};
use crate::codegen::EmitOptions;
use crate::config::{self, ConfigError};
use crate::interp::InterpreterExecutor;
use crate::ir::{ExecutionContext, PipelineConfig};
use crate::jit::compiler::{CompileError, CompileOptions, JitDriver};
use crate::jit::executor::JitExecutor;
use crate::jit::loader::{LoadError, PipelineLoader};

/// Executor selection. `Auto` currently resolves to `Jit`: first call
/// compiles, later calls reuse the cached artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Interpreter,
    Jit,
    #[default]
    Auto,
}

/// Result type for pipeline construction and execution.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Top-level error kind reported across the public API.
#[derive(Debug)]
pub enum PipelineError {
    /// Config failed structural validation; no executor was constructed.
    Validation(ValidationError),
    /// Config file could not be read or parsed.
    Config(ConfigError),
    /// Native compilation failed.
    Compile(CompileError),
    /// Shared object load or symbol resolution failed.
    Load(LoadError),
    /// Interpreter dispatch hit an operator outside the catalog.
    UnknownOperator(String),
    /// The JIT entry reported failure.
    EntryFailed(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Validation(e) => write!(f, "validation: {}", e),
            PipelineError::Config(e) => write!(f, "config: {}", e),
            PipelineError::Compile(e) => write!(f, "compile: {}", e),
            PipelineError::Load(e) => write!(f, "load: {}", e),
            PipelineError::UnknownOperator(op) => write!(f, "unknown operator: {}", op),
            PipelineError::EntryFailed(fp) => {
                write!(f, "pipeline entry {} reported failure", fp)
            }
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Validation(e) => Some(e),
            PipelineError::Config(e) => Some(e),
            PipelineError::Compile(e) => Some(e),
            PipelineError::Load(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ValidationError> for PipelineError {
    fn from(e: ValidationError) -> Self {
        PipelineError::Validation(e)
    }
}

impl From<ConfigError> for PipelineError {
    fn from(e: ConfigError) -> Self {
        PipelineError::Config(e)
    }
}

impl From<CompileError> for PipelineError {
    fn from(e: CompileError) -> Self {
        PipelineError::Compile(e)
    }
}

impl From<LoadError> for PipelineError {
    fn from(e: LoadError) -> Self {
        PipelineError::Load(e)
    }
}

/// Common surface of the interpreter and JIT executors.
pub trait PipelineExecutor {
    /// Run the pipeline against a context. Synchronous; runs to completion
    /// on the caller's thread.
    fn execute(&mut self, context: &mut ExecutionContext) -> PipelineResult<()>;

    fn name(&self) -> &str;

    fn fingerprint(&self) -> &str;

    fn needs_recompile(&self) -> bool {
        false
    }
}

/// Facade tying together validation, executor construction, the compile
/// cache, and the shared loader.
pub struct PipelineManager {
    driver: Arc<JitDriver>,
    loader: Mutex<PipelineLoader>,
    emit_options: RwLock<EmitOptions>,
    compile_options: RwLock<CompileOptions>,
}

impl Default for PipelineManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineManager {
    pub fn new() -> Self {
        Self::with_cache_dir("./generated")
    }

    pub fn with_cache_dir(dir: impl Into<PathBuf>) -> Self {
        PipelineManager {
            driver: Arc::new(JitDriver::new(dir)),
            loader: Mutex::new(PipelineLoader::new()),
            emit_options: RwLock::new(EmitOptions::default()),
            compile_options: RwLock::new(CompileOptions::default()),
        }
    }

    /// The process-wide manager, created lazily on first use.
    pub fn global() -> &'static PipelineManager {
        static GLOBAL: OnceLock<PipelineManager> = OnceLock::new();
        GLOBAL.get_or_init(PipelineManager::new)
    }

    /// Validate a config and construct the executor for `mode`.
    pub fn create(
        &self,
        mut config: PipelineConfig,
        mode: Mode,
    ) -> PipelineResult<Box<dyn PipelineExecutor>> {
        catalog::validate(&config)?;
        if config.fingerprint.is_empty() {
            config.compute_fingerprint();
        }
        debug!(pipeline = %config.name, fingerprint = %config.fingerprint, ?mode, "creating executor");

        match mode {
            Mode::Interpreter => Ok(Box::new(InterpreterExecutor::new(config))),
            Mode::Jit | Mode::Auto => Ok(Box::new(JitExecutor::new(
                config,
                Arc::clone(&self.driver),
                self.emit_options.read().unwrap_or_else(|e| e.into_inner()).clone(),
                self.compile_options
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone(),
            ))),
        }
    }

    /// Parse a JSON config file, validate it, and construct an executor.
    pub fn create_from_file(
        &self,
        path: impl AsRef<Path>,
        mode: Mode,
    ) -> PipelineResult<Box<dyn PipelineExecutor>> {
        let config = config::parse_file(path)?;
        self.create(config, mode)
    }

    /// Redirect the compile cache (and artifacts) to a new directory.
    pub fn set_cache_dir(&self, dir: impl Into<PathBuf>) {
        self.driver.set_cache_dir(dir);
    }

    pub fn set_jit_options(&self, emit: EmitOptions, compile: CompileOptions) {
        *self.emit_options.write().unwrap_or_else(|e| e.into_inner()) = emit;
        *self.compile_options.write().unwrap_or_else(|e| e.into_inner()) = compile;
    }

    /// Drop in-memory cache entries and unload every shared library held by
    /// the manager's loader. Artifacts on disk are left in place. Must not
    /// be called while an `execute` on a manager-loaded pipeline is in
    /// flight.
    pub fn clear_cache(&self) {
        self.driver.clear_cache();
        self.loader.lock().unwrap_or_else(|e| e.into_inner()).unload_all();
    }

    pub fn driver(&self) -> &Arc<JitDriver> {
        &self.driver
    }

    /// Compile (or reuse) a pipeline's artifact and load it into the
    /// manager's shared loader, keyed by fingerprint.
    pub fn load_pipeline(&self, config: &PipelineConfig) -> PipelineResult<()> {
        let fingerprint = if config.fingerprint.is_empty() {
            crate::fingerprint::config_fingerprint(config)
        } else {
            config.fingerprint.clone()
        };

        {
            let loader = self.loader.lock().unwrap_or_else(|e| e.into_inner());
            if loader.is_loaded(&fingerprint) {
                return Ok(());
            }
        }

        let so_path = match self.driver.get_so_path(&fingerprint) {
            Some(path) => path,
            None => {
                let emit = self.emit_options.read().unwrap_or_else(|e| e.into_inner()).clone();
                let compile = self
                    .compile_options
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone();
                self.driver.compile(config, &emit, &compile)?;
                self.driver
                    .get_so_path(&fingerprint)
                    .ok_or_else(|| LoadError::Open {
                        path: self.driver.so_path(&fingerprint),
                        message: "artifact missing after compile".to_string(),
                    })?
            }
        };

        self.loader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .load(&fingerprint, &so_path)?;
        Ok(())
    }

    /// Invoke a pipeline previously loaded with [`load_pipeline`].
    ///
    /// # Safety contract
    /// `input_data`/`output_data` must point to slot arrays sized per the
    /// pipeline's declared inputs/outputs (see the `codegen` module docs).
    pub fn execute_loaded(
        &self,
        fingerprint: &str,
        input_data: &mut [u64],
        output_data: &mut [u64],
    ) -> PipelineResult<bool> {
        let loader = self.loader.lock().unwrap_or_else(|e| e.into_inner());
        Ok(loader.execute(fingerprint, input_data, output_data)?)
    }

    /// Display name the artifact exported, recorded at load time.
    pub fn pipeline_name(&self, fingerprint: &str) -> Option<String> {
        self.loader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .name(fingerprint)
            .map(str::to_string)
    }

    pub fn is_loaded(&self, fingerprint: &str) -> bool {
        self.loader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_loaded(fingerprint)
    }

    pub fn loaded_count(&self) -> usize {
        self.loader.lock().unwrap_or_else(|e| e.into_inner()).loaded_count()
    }
}
