//! Error types for the plugin loader

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading libraries or creating plugin classes.
///
/// This is the complete set of failures the public API can report. Unload
/// failures are recoverable and are logged rather than returned on the
/// destructor path.
#[derive(Error, Debug)]
pub enum PluginError {
    /// The dynamic linker could not map the library.
    #[error("could not load library {path}: {reason}")]
    LibraryLoad { path: PathBuf, reason: String },

    /// The dynamic linker reported a failure while unmapping.
    #[error("could not unload library {path}: {reason}")]
    LibraryUnload { path: PathBuf, reason: String },

    /// No factory exists for the requested class within the caller's scope.
    #[error("could not create instance of class '{class}'")]
    CreateClass { class: String },

    /// A multi-loader was asked about a library path it has not loaded.
    #[error("no loader is bound to library {path}")]
    NoLoader { path: PathBuf },

    /// A lookup that prefers failure over absence came up empty.
    #[error("not found: {0}")]
    NotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_load_display_contains_path_and_reason() {
        let err = PluginError::LibraryLoad {
            path: PathBuf::from("./libzoo.so"),
            reason: "file not found".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("./libzoo.so"));
        assert!(msg.contains("file not found"));
    }

    #[test]
    fn test_create_class_display() {
        let err = PluginError::CreateClass {
            class: "Platypus".to_string(),
        };
        assert!(err.to_string().contains("Platypus"));
    }

    #[test]
    fn test_no_loader_display() {
        let err = PluginError::NoLoader {
            path: PathBuf::from("./libmissing.so"),
        };
        assert!(err.to_string().contains("libmissing.so"));
    }

    #[test]
    fn test_not_found_display() {
        let err = PluginError::NotFound("symbol 'frobnicate'".to_string());
        assert!(err.to_string().contains("frobnicate"));
    }
}
