//! Native Compiler Driver
//!
//! Wraps the host C++ compiler as a subprocess ([`CcDriver`]) and
//! orchestrates the full compile path ([`JitDriver`]): fingerprint, emit,
//! write source, invoke the compiler, record the cache entry.
//!
//! The driver is synchronous — it blocks on subprocess I/O and holds no
//! resources past return. Compilation for a given fingerprint is serialised
//! under a per-fingerprint mutex so concurrent callers compile at most once
//! and then share the artifact.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use tracing::{debug, warn};

use super::cache::{CacheEntry, CompileCache};
use crate::codegen::{CodeEmitter, EmitOptions};
use crate::fingerprint;
use crate::ir::PipelineConfig;

/// The operator library shipped with the engine, materialised into the
/// output directory so emitted units can `#include` it.
const OPS_HEADER: &str = include_str!("../../include/pipeline_ops.hpp");
const OPS_HEADER_NAME: &str = "pipeline_ops.hpp";

/// Result type for native compilation.
pub type CompileResult<T> = Result<T, CompileError>;

/// Errors from the native compilation path.
#[derive(Debug)]
pub enum CompileError {
    /// The source file to compile does not exist.
    SourceMissing(PathBuf),
    /// Filesystem operation failed.
    Io { path: PathBuf, source: io::Error },
    /// The compiler binary could not be spawned.
    Spawn { compiler: String, source: io::Error },
    /// The compiler exited non-zero; `diagnostics` holds its combined
    /// stdout/stderr.
    CompilerFailed {
        status: Option<i32>,
        diagnostics: String,
    },
    /// The compiler exited zero but produced no artifact.
    ArtifactMissing(PathBuf),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::SourceMissing(path) => {
                write!(f, "source file not found: {}", path.display())
            }
            CompileError::Io { path, source } => {
                write!(f, "i/o error on {}: {}", path.display(), source)
            }
            CompileError::Spawn { compiler, source } => {
                write!(f, "failed to spawn compiler '{}': {}", compiler, source)
            }
            CompileError::CompilerFailed {
                status,
                diagnostics,
            } => match status {
                Some(code) => write!(f, "compiler exited with {}:\n{}", code, diagnostics),
                None => write!(f, "compiler terminated by signal:\n{}", diagnostics),
            },
            CompileError::ArtifactMissing(path) => {
                write!(f, "compiler succeeded but artifact missing: {}", path.display())
            }
        }
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CompileError::Io { source, .. } | CompileError::Spawn { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Options for the host compiler invocation.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Compiler binary; any C++17 compiler with GCC-style flags.
    pub compiler_path: String,
    /// Include path for the operator library; defaults to the directory
    /// the driver writes sources into.
    pub include_dir: Option<PathBuf>,
    pub extra_flags: Vec<String>,
    /// Keep the emitted source next to the artifact for debugging.
    pub keep_source: bool,
    pub verbose: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            compiler_path: "c++".to_string(),
            include_dir: None,
            extra_flags: Vec::new(),
            keep_source: true,
            verbose: false,
        }
    }
}

/// Stateless wrapper over one compiler subprocess run.
pub struct CcDriver;

impl CcDriver {
    /// Compile `source_path` into a position-independent shared object at
    /// `output_path`. Succeeds iff the subprocess exits zero AND the
    /// artifact exists afterwards.
    pub fn compile(
        source_path: &Path,
        output_path: &Path,
        options: &CompileOptions,
    ) -> CompileResult<()> {
        if !source_path.exists() {
            return Err(CompileError::SourceMissing(source_path.to_path_buf()));
        }

        let mut cmd = Self::build_command(source_path, output_path, options);
        if options.verbose {
            debug!(command = ?cmd, "invoking native compiler");
        }

        let output = cmd.output().map_err(|e| CompileError::Spawn {
            compiler: options.compiler_path.clone(),
            source: e,
        })?;

        let mut diagnostics = String::from_utf8_lossy(&output.stdout).into_owned();
        diagnostics.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            warn!(status = ?output.status.code(), "native compilation failed");
            return Err(CompileError::CompilerFailed {
                status: output.status.code(),
                diagnostics,
            });
        }
        if !output_path.exists() {
            return Err(CompileError::ArtifactMissing(output_path.to_path_buf()));
        }
        Ok(())
    }

    /// `-O3 -shared -fPIC -march=native -std=c++17 -I<dir> <extra> -w
    /// <src> -o <out>`.
    pub fn build_command(
        source_path: &Path,
        output_path: &Path,
        options: &CompileOptions,
    ) -> Command {
        let mut cmd = Command::new(&options.compiler_path);
        cmd.arg("-O3")
            .arg("-shared")
            .arg("-fPIC")
            .arg("-march=native")
            .arg("-std=c++17");
        if let Some(dir) = &options.include_dir {
            cmd.arg(format!("-I{}", dir.display()));
        }
        for flag in &options.extra_flags {
            cmd.arg(flag);
        }
        cmd.arg("-w").arg(source_path).arg("-o").arg(output_path);
        cmd
    }

    /// Probe whether `compiler_path` is invokable at all. Used by callers
    /// that want to degrade gracefully on hosts without a toolchain.
    pub fn available(compiler_path: &str) -> bool {
        Command::new(compiler_path)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

/// Orchestrates emit -> write -> compile -> cache for pipeline configs.
pub struct JitDriver {
    cache: CompileCache,
    cache_dir: RwLock<PathBuf>,
    /// Per-fingerprint compile gates: at most one compile per fingerprint
    /// at a time; waiters reuse the cached artifact.
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl JitDriver {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        JitDriver {
            cache: CompileCache::new(),
            cache_dir: RwLock::new(cache_dir.into()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &CompileCache {
        &self.cache
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_cache_dir(&self, dir: impl Into<PathBuf>) {
        *self.cache_dir.write().unwrap_or_else(|e| e.into_inner()) = dir.into();
    }

    /// On-disk artifact path for a fingerprint. Stable across processes.
    pub fn so_path(&self, fingerprint: &str) -> PathBuf {
        self.cache_dir()
            .join(format!("libpipeline_{}.so", fingerprint))
    }

    /// On-disk emitted-source path for a fingerprint.
    pub fn source_path(&self, fingerprint: &str) -> PathBuf {
        self.cache_dir().join(format!("pipeline_{}.cpp", fingerprint))
    }

    /// Resolve the artifact for a fingerprint: the in-memory cache first,
    /// then the stable on-disk layout (cross-process reuse). A disk hit is
    /// re-registered in the cache.
    pub fn get_so_path(&self, fingerprint: &str) -> Option<PathBuf> {
        if let Some(entry) = self.cache.get(fingerprint) {
            if entry.so_path.exists() {
                return Some(entry.so_path);
            }
        }
        let probe = self.so_path(fingerprint);
        if probe.exists() {
            self.cache.add(CacheEntry {
                fingerprint: fingerprint.to_string(),
                source_path: self.source_path(fingerprint),
                so_path: probe.clone(),
                compile_time: Instant::now(),
            });
            return Some(probe);
        }
        None
    }

    /// Drop in-memory cache entries; artifacts stay on disk.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    fn compile_gate(&self, fingerprint: &str) -> Arc<Mutex<()>> {
        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            inflight
                .entry(fingerprint.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    fn ensure_ops_header(&self, dir: &Path) -> CompileResult<()> {
        let header = dir.join(OPS_HEADER_NAME);
        let up_to_date = fs::read_to_string(&header)
            .map(|text| text == OPS_HEADER)
            .unwrap_or(false);
        if !up_to_date {
            fs::write(&header, OPS_HEADER).map_err(|e| CompileError::Io {
                path: header,
                source: e,
            })?;
        }
        Ok(())
    }

    /// Emit, write, and compile a config; on success the artifact is in
    /// the cache and on disk. Returns the fingerprint the artifact is
    /// keyed by (derived from the step list when the config carries none,
    /// so the entry symbol stays stable).
    pub fn compile(
        &self,
        config: &PipelineConfig,
        emit: &EmitOptions,
        options: &CompileOptions,
    ) -> CompileResult<String> {
        let fp = if config.fingerprint.is_empty() {
            fingerprint::config_fingerprint(config)
        } else {
            config.fingerprint.clone()
        };

        let gate = self.compile_gate(&fp);
        let _guard = gate.lock().unwrap_or_else(|e| e.into_inner());

        if emit.use_cache && self.get_so_path(&fp).is_some() {
            debug!(fingerprint = %fp, "compile cache hit");
            return Ok(fp);
        }

        let out_dir = emit.output_dir.clone().unwrap_or_else(|| self.cache_dir());
        fs::create_dir_all(&out_dir).map_err(|e| CompileError::Io {
            path: out_dir.clone(),
            source: e,
        })?;
        self.ensure_ops_header(&out_dir)?;

        let source = CodeEmitter::with_fingerprint(config, &fp, emit).emit();
        let source_path = out_dir.join(format!("pipeline_{}.cpp", fp));
        let so_path = out_dir.join(format!("libpipeline_{}.so", fp));
        if emit.verbose {
            debug!(
                fingerprint = %fp,
                bytes = source.len(),
                path = %source_path.display(),
                "emitted pipeline source"
            );
        }
        fs::write(&source_path, &source).map_err(|e| CompileError::Io {
            path: source_path.clone(),
            source: e,
        })?;

        let mut effective = options.clone();
        if effective.include_dir.is_none() {
            effective.include_dir = Some(out_dir.clone());
        }
        if emit.fast_math {
            effective.extra_flags.push("-ffast-math".to_string());
        }
        if !emit.enable_inline {
            effective.extra_flags.push("-fno-inline".to_string());
        }
        if !emit.enable_vectorize {
            effective.extra_flags.push("-fno-tree-vectorize".to_string());
        }

        let started = Instant::now();
        match CcDriver::compile(&source_path, &so_path, &effective) {
            Ok(()) => {
                debug!(
                    fingerprint = %fp,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    artifact = %so_path.display(),
                    "pipeline compiled"
                );
                self.cache.add(CacheEntry {
                    fingerprint: fp.clone(),
                    source_path,
                    so_path,
                    compile_time: Instant::now(),
                });
                Ok(fp)
            }
            Err(e) => {
                if !options.keep_source {
                    let _ = fs::remove_file(&source_path);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::demo_config;

    #[test]
    fn test_build_command_shape() {
        let options = CompileOptions {
            include_dir: Some(PathBuf::from("/tmp/inc")),
            extra_flags: vec!["-ffast-math".to_string()],
            ..CompileOptions::default()
        };
        let cmd = CcDriver::build_command(
            Path::new("in.cpp"),
            Path::new("out.so"),
            &options,
        );
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.contains(&"-O3".to_string()));
        assert!(args.contains(&"-shared".to_string()));
        assert!(args.contains(&"-fPIC".to_string()));
        assert!(args.contains(&"-std=c++17".to_string()));
        assert!(args.contains(&"-I/tmp/inc".to_string()));
        assert!(args.contains(&"-ffast-math".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("out.so"));
    }

    #[test]
    fn test_compile_missing_source() {
        let result = CcDriver::compile(
            Path::new("/nonexistent/input.cpp"),
            Path::new("/nonexistent/out.so"),
            &CompileOptions::default(),
        );
        assert!(matches!(result, Err(CompileError::SourceMissing(_))));
    }

    #[test]
    fn test_driver_paths_stable() {
        let driver = JitDriver::new("/tmp/cache");
        assert_eq!(
            driver.so_path("abc123"),
            PathBuf::from("/tmp/cache/libpipeline_abc123.so")
        );
        assert_eq!(
            driver.source_path("abc123"),
            PathBuf::from("/tmp/cache/pipeline_abc123.cpp")
        );
    }

    #[test]
    fn test_get_so_path_probes_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let driver = JitDriver::new(dir.path());
        assert!(driver.get_so_path("feed").is_none());

        // A fresh process with an empty in-memory cache finds artifacts a
        // previous process left behind.
        fs::write(driver.so_path("feed"), b"artifact").expect("write");
        assert!(driver.get_so_path("feed").is_some());
        assert_eq!(driver.cache().len(), 1);
    }

    #[test]
    fn test_compile_failure_surfaces_diagnostics() {
        let dir = tempfile::tempdir().expect("tempdir");
        let driver = JitDriver::new(dir.path());
        if !CcDriver::available("c++") {
            eprintln!("skipping: no c++ compiler on host");
            return;
        }

        let mut config = demo_config();
        config.steps[0].op_name = "definitely_not_an_op".to_string();
        config.compute_fingerprint();

        let err = driver
            .compile(&config, &EmitOptions::default(), &CompileOptions::default())
            .expect_err("compile must fail for unknown symbol");
        match err {
            CompileError::CompilerFailed { diagnostics, .. } => {
                assert!(diagnostics.contains("definitely_not_an_op"));
            }
            other => panic!("unexpected error: {}", other),
        }
        // keep_source is on by default: the source survives for debugging.
        assert!(driver.source_path(&config.fingerprint).exists());
    }
}
