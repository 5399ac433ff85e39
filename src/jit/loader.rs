//! Dynamic Loader
//!
//! Raw `dlopen`/`dlsym`/`dlclose` FFI behind two safe layers:
//!
//! - [`DynLib`]: exclusive ownership of one library handle, closed exactly
//!   once on drop. Move-only.
//! - [`PipelineLoader`]: a fingerprint-keyed cache of loaded pipelines with
//!   their resolved entry functions. Loading the same fingerprint twice
//!   from the same artifact is a no-op, so a library is never double-opened.
//!
//! Libraries open with `RTLD_LAZY | RTLD_LOCAL`: symbols stay private to
//! the handle, so many pipelines can coexist even though every emitted
//! unit exports `pipeline_name`/`pipeline_fingerprint`.

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::fmt;
use std::os::raw::{c_char, c_int, c_void};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::fingerprint::sanitize_identifier;

#[link(name = "dl")]
extern "C" {
    fn dlopen(filename: *const c_char, flags: c_int) -> *mut c_void;
    fn dlsym(handle: *mut c_void, symbol: *const c_char) -> *mut c_void;
    fn dlclose(handle: *mut c_void) -> c_int;
    fn dlerror() -> *mut c_char;
}

const RTLD_LAZY: c_int = 0x0001;
const RTLD_LOCAL: c_int = 0;

/// Signature of the emitted entry symbol.
pub type ExecuteFn = unsafe extern "C" fn(*mut c_void, *mut c_void) -> bool;

type NameFn = unsafe extern "C" fn() -> *const c_char;

/// Result type for loader operations.
pub type LoadResult<T> = Result<T, LoadError>;

/// Errors opening libraries or resolving symbols.
#[derive(Debug, Clone)]
pub enum LoadError {
    /// Path contained an interior NUL and cannot cross the C boundary.
    InvalidPath { path: PathBuf },
    /// `dlopen` failed; `message` is the `dlerror` text.
    Open { path: PathBuf, message: String },
    /// Symbol lookup failed on a loaded library; distinguishable from an
    /// open failure by the symbol name.
    Symbol { name: String, message: String },
    /// None of the entry-symbol candidates resolved.
    EntryMissing { fingerprint: String },
    /// No pipeline with this fingerprint is loaded.
    NotLoaded { fingerprint: String },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::InvalidPath { path } => {
                write!(f, "path contains NUL: {}", path.display())
            }
            LoadError::Open { path, message } => {
                write!(f, "failed to open {}: {}", path.display(), message)
            }
            LoadError::Symbol { name, message } => {
                write!(f, "symbol '{}' not found: {}", name, message)
            }
            LoadError::EntryMissing { fingerprint } => {
                write!(f, "no entry symbol for fingerprint {}", fingerprint)
            }
            LoadError::NotLoaded { fingerprint } => {
                write!(f, "pipeline not loaded: {}", fingerprint)
            }
        }
    }
}

impl std::error::Error for LoadError {}

fn last_dl_error() -> String {
    // Safety: dlerror returns a thread-local C string or null.
    unsafe {
        let msg = dlerror();
        if msg.is_null() {
            "unknown dl error".to_string()
        } else {
            CStr::from_ptr(msg).to_string_lossy().into_owned()
        }
    }
}

/// Exclusively owned handle to one opened shared object.
///
/// Closing happens exactly once, on drop. There is deliberately no `Clone`:
/// two owners would mean two `dlclose` calls on one handle.
#[derive(Debug)]
pub struct DynLib {
    handle: *mut c_void,
    path: PathBuf,
}

// Safety: dlopen handles are process-global tokens; dlsym/dlclose are
// thread-safe in every POSIX implementation we target, and &self access
// never mutates the handle.
unsafe impl Send for DynLib {}
unsafe impl Sync for DynLib {}

impl DynLib {
    /// Open a library with lazy binding and process-local visibility.
    pub fn open(path: &Path) -> LoadResult<DynLib> {
        let c_path = CString::new(path.as_os_str().as_encoded_bytes()).map_err(|_| {
            LoadError::InvalidPath {
                path: path.to_path_buf(),
            }
        })?;

        // Safety: c_path is a valid NUL-terminated string.
        let handle = unsafe {
            dlerror(); // clear any stale error
            dlopen(c_path.as_ptr(), RTLD_LAZY | RTLD_LOCAL)
        };
        if handle.is_null() {
            return Err(LoadError::Open {
                path: path.to_path_buf(),
                message: last_dl_error(),
            });
        }
        debug!(path = %path.display(), "opened shared object");
        Ok(DynLib {
            handle,
            path: path.to_path_buf(),
        })
    }

    /// Resolve an exported symbol's address.
    pub fn symbol(&self, name: &str) -> LoadResult<*mut c_void> {
        let c_name = CString::new(name).map_err(|_| LoadError::Symbol {
            name: name.to_string(),
            message: "symbol name contains NUL".to_string(),
        })?;

        // Safety: handle is live for the lifetime of self.
        let address = unsafe {
            dlerror();
            dlsym(self.handle, c_name.as_ptr())
        };
        if address.is_null() {
            return Err(LoadError::Symbol {
                name: name.to_string(),
                message: last_dl_error(),
            });
        }
        Ok(address)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DynLib {
    fn drop(&mut self) {
        // Safety: handle was returned by dlopen and is closed exactly once.
        unsafe {
            dlclose(self.handle);
        }
    }
}

/// Resolve the entry function of an emitted pipeline, trying the
/// sanitised-fingerprint symbol, the raw-fingerprint symbol, and finally
/// the generic `pipeline_execute` name.
pub fn resolve_entry(lib: &DynLib, fingerprint: &str) -> LoadResult<ExecuteFn> {
    let candidates = [
        format!("pipeline_execute_{}", sanitize_identifier(fingerprint)),
        format!("pipeline_execute_{}", fingerprint),
        "pipeline_execute".to_string(),
    ];
    for name in &candidates {
        if let Ok(address) = lib.symbol(name) {
            // Safety: the emitted unit declares this exact C signature.
            return Ok(unsafe { std::mem::transmute::<*mut c_void, ExecuteFn>(address) });
        }
    }
    warn!(fingerprint, "entry symbol missing from artifact");
    Err(LoadError::EntryMissing {
        fingerprint: fingerprint.to_string(),
    })
}

struct LoadedPipeline {
    lib: DynLib,
    entry: ExecuteFn,
    /// From the optional `pipeline_name` accessor.
    name: Option<String>,
}

/// Fingerprint-keyed cache of loaded pipelines.
#[derive(Default)]
pub struct PipelineLoader {
    pipelines: HashMap<String, LoadedPipeline>,
}

impl PipelineLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an artifact and eagerly resolve its entry. Re-loading the same
    /// fingerprint from the same path is a no-op; a different path replaces
    /// (and closes) the previous library.
    pub fn load(&mut self, fingerprint: &str, so_path: &Path) -> LoadResult<()> {
        if let Some(existing) = self.pipelines.get(fingerprint) {
            if existing.lib.path() == so_path {
                return Ok(());
            }
        }

        let lib = DynLib::open(so_path)?;
        let entry = resolve_entry(&lib, fingerprint)?;
        let name = lib.symbol("pipeline_name").ok().map(|address| {
            // Safety: emitted accessor returns a static C string.
            unsafe {
                let accessor: NameFn = std::mem::transmute(address);
                CStr::from_ptr(accessor()).to_string_lossy().into_owned()
            }
        });

        self.pipelines
            .insert(fingerprint.to_string(), LoadedPipeline { lib, entry, name });
        Ok(())
    }

    pub fn is_loaded(&self, fingerprint: &str) -> bool {
        self.pipelines.contains_key(fingerprint)
    }

    /// Display name recorded at load time, if the artifact exported one.
    pub fn name(&self, fingerprint: &str) -> Option<&str> {
        self.pipelines
            .get(fingerprint)
            .and_then(|p| p.name.as_deref())
    }

    /// Invoke a loaded pipeline's entry over slot arrays (see the
    /// `codegen` module docs for the slot encoding).
    pub fn execute(
        &self,
        fingerprint: &str,
        input: &mut [u64],
        output: &mut [u64],
    ) -> LoadResult<bool> {
        let pipeline = self
            .pipelines
            .get(fingerprint)
            .ok_or_else(|| LoadError::NotLoaded {
                fingerprint: fingerprint.to_string(),
            })?;

        // Safety: the entry only indexes the arrays up to the pipeline's
        // declared input/output counts, which the caller sized for.
        let ok = unsafe {
            (pipeline.entry)(
                input.as_mut_ptr() as *mut c_void,
                output.as_mut_ptr() as *mut c_void,
            )
        };
        Ok(ok)
    }

    /// Release one pipeline's library.
    pub fn unload(&mut self, fingerprint: &str) {
        self.pipelines.remove(fingerprint);
    }

    /// Release every library.
    pub fn unload_all(&mut self) {
        self.pipelines.clear();
    }

    pub fn loaded_count(&self) -> usize {
        self.pipelines.len()
    }
}
