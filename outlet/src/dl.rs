//! OS shim around the platform dynamic linker
//!
//! The registry and loaders never touch `libloading` directly; they go
//! through the [`LibraryBackend`] trait so the linker can be replaced in
//! tests (see [`crate::testing`]). The production backend is [`DlBackend`].

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::PluginError;

/// Symbol visibility requested when mapping a library.
///
/// Global visibility is the default so that symbols from one plugin library
/// can be resolved by another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Global,
    Local,
}

/// Interface to the platform dynamic linker.
///
/// Implementations must be safe to call from multiple threads; the
/// production backend serializes its own calls because some platform
/// loaders are not thread-safe on concurrent open/close of the same path.
pub trait LibraryBackend: Send + Sync {
    /// Map the library at `path` into the process.
    fn open(&self, path: &Path, visibility: Visibility)
    -> Result<Box<dyn LoadedLibrary>, PluginError>;
}

/// An open shared library handle.
pub trait LoadedLibrary: Send + Sync + std::fmt::Debug {
    /// The path this library was opened from.
    fn path(&self) -> &Path;

    /// Address of a named symbol, if present. Diagnostics only; the loader
    /// never resolves plugin entry points by symbol.
    fn symbol_address(&self, name: &str) -> Option<usize>;

    /// Unmap the library.
    fn close(self: Box<Self>) -> Result<(), PluginError>;
}

// Some platform loaders misbehave under concurrent dlopen/dlclose of the
// same path, so every backend call holds this lock.
fn shim_lock() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap()
}

/// The `libloading`-backed production backend.
///
/// Libraries are opened with lazy binding. On Unix the requested
/// [`Visibility`] maps to `RTLD_GLOBAL`/`RTLD_LOCAL`.
#[derive(Debug, Default)]
pub struct DlBackend;

impl DlBackend {
    pub fn new() -> Self {
        Self
    }
}

impl LibraryBackend for DlBackend {
    fn open(
        &self,
        path: &Path,
        visibility: Visibility,
    ) -> Result<Box<dyn LoadedLibrary>, PluginError> {
        let _guard = shim_lock();

        #[cfg(unix)]
        let library = {
            use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_LAZY, RTLD_LOCAL};

            let flags = RTLD_LAZY
                | match visibility {
                    Visibility::Global => RTLD_GLOBAL,
                    Visibility::Local => RTLD_LOCAL,
                };
            // SAFETY: the library's initialization and termination routines
            // run here; callers opt into executing plugin code by asking for
            // the load.
            let library =
                unsafe { Library::open(Some(path), flags) }.map_err(|e| PluginError::LibraryLoad {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
            libloading::Library::from(library)
        };

        #[cfg(not(unix))]
        let library = {
            let _ = visibility;
            // SAFETY: as above; non-Unix platforms have no visibility flag.
            unsafe { libloading::Library::new(path) }.map_err(|e| PluginError::LibraryLoad {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
        };

        tracing::debug!(library = %path.display(), "mapped shared library");

        Ok(Box::new(DlLibrary {
            path: path.to_path_buf(),
            library,
        }))
    }
}

#[derive(Debug)]
struct DlLibrary {
    path: PathBuf,
    library: libloading::Library,
}

impl LoadedLibrary for DlLibrary {
    fn path(&self) -> &Path {
        &self.path
    }

    fn symbol_address(&self, name: &str) -> Option<usize> {
        let _guard = shim_lock();
        // SAFETY: the symbol is only reported as an address, never
        // dereferenced or called.
        let symbol = unsafe { self.library.get::<*mut std::ffi::c_void>(name.as_bytes()) }.ok()?;
        Some(*symbol as usize)
    }

    fn close(self: Box<Self>) -> Result<(), PluginError> {
        let _guard = shim_lock();
        let DlLibrary { path, library } = *self;
        library.close().map_err(|e| PluginError::LibraryUnload {
            path,
            reason: e.to_string(),
        })
    }
}

/// Platform file name prefix for shared libraries (`lib` everywhere except
/// Windows).
pub fn default_prefix() -> &'static str {
    if cfg!(windows) { "" } else { "lib" }
}

/// Platform file name suffix for shared libraries.
///
/// `debug` selects the `d`-decorated form some build systems emit for debug
/// binaries (e.g. `d.dll`).
pub fn default_suffix(debug: bool) -> String {
    let suffix = if cfg!(windows) {
        ".dll"
    } else if cfg!(target_os = "macos") {
        ".dylib"
    } else {
        ".so"
    };
    if debug {
        format!("d{suffix}")
    } else {
        suffix.to_string()
    }
}

/// Full platform file name for a library stem, e.g. `zoo` → `libzoo.so`.
pub fn platform_library_name(stem: &str, debug: bool) -> String {
    format!("{}{}{}", default_prefix(), stem, default_suffix(debug))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prefix_per_platform() {
        if cfg!(windows) {
            assert_eq!(default_prefix(), "");
        } else {
            assert_eq!(default_prefix(), "lib");
        }
    }

    #[test]
    fn test_default_suffix_release() {
        let suffix = default_suffix(false);
        if cfg!(windows) {
            assert_eq!(suffix, ".dll");
        } else if cfg!(target_os = "macos") {
            assert_eq!(suffix, ".dylib");
        } else {
            assert_eq!(suffix, ".so");
        }
    }

    #[test]
    fn test_default_suffix_debug_is_decorated() {
        let suffix = default_suffix(true);
        assert!(suffix.starts_with('d'));
        assert!(suffix.contains('.'));
    }

    #[test]
    fn test_platform_library_name() {
        let name = platform_library_name("zoo", false);
        if cfg!(target_os = "linux") {
            assert_eq!(name, "libzoo.so");
        }
        assert!(name.contains("zoo"));
    }

    #[test]
    fn test_dl_backend_open_missing_library_reports_path() {
        let backend = DlBackend::new();
        let err = backend
            .open(Path::new("./does-not-exist-anywhere.so"), Visibility::Global)
            .unwrap_err();
        match err {
            PluginError::LibraryLoad { path, reason } => {
                assert_eq!(path, Path::new("./does-not-exist-anywhere.so"));
                assert!(!reason.is_empty());
            }
            other => panic!("expected LibraryLoad, got {other:?}"),
        }
    }
}
