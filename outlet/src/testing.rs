//! Test support: an in-memory stand-in for the platform dynamic linker
//!
//! [`StubBackend`] lets the whole load/registration/unload lifecycle run
//! without building real shared objects. Each registered library carries a
//! hook that runs while the library is "mapped", playing the role of the
//! library's static initializers; hooks normally capture a
//! [`Registry`](crate::Registry) weakly and call
//! [`register_factory`](crate::Registry::register_factory) on it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::dl::{LibraryBackend, LoadedLibrary, Visibility};
use crate::error::PluginError;

type InitHook = Box<dyn Fn(&Path) + Send + Sync>;

#[derive(Default, Debug)]
struct State {
    open: Vec<PathBuf>,
    opened_times: HashMap<PathBuf, usize>,
}

/// An in-memory [`LibraryBackend`].
///
/// Opening a path that was never added fails with
/// [`PluginError::LibraryLoad`], like a missing file would.
#[derive(Default)]
pub struct StubBackend {
    hooks: Mutex<HashMap<PathBuf, Arc<InitHook>>>,
    state: Arc<Mutex<State>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a library under `path`; `init` runs on every open, the way
    /// a real library's initializers run on every fresh map.
    pub fn add_library(&self, path: impl Into<PathBuf>, init: impl Fn(&Path) + Send + Sync + 'static) {
        self.hooks
            .lock()
            .unwrap()
            .insert(path.into(), Arc::new(Box::new(init)));
    }

    /// True while the library at `path` is mapped.
    pub fn is_open(&self, path: &Path) -> bool {
        self.state.lock().unwrap().open.iter().any(|p| p == path)
    }

    /// How many times the library at `path` has been mapped.
    pub fn times_opened(&self, path: &Path) -> usize {
        self.state
            .lock()
            .unwrap()
            .opened_times
            .get(path)
            .copied()
            .unwrap_or(0)
    }
}

impl LibraryBackend for StubBackend {
    fn open(
        &self,
        path: &Path,
        _visibility: Visibility,
    ) -> Result<Box<dyn LoadedLibrary>, PluginError> {
        let hook = self
            .hooks
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| PluginError::LibraryLoad {
                path: path.to_path_buf(),
                reason: "no such stub library".to_string(),
            })?;

        {
            let mut state = self.state.lock().unwrap();
            state.open.push(path.to_path_buf());
            *state.opened_times.entry(path.to_path_buf()).or_default() += 1;
        }

        // Static initializers run during the map call.
        (hook.as_ref())(path);

        Ok(Box::new(StubLibrary {
            path: path.to_path_buf(),
            state: Arc::clone(&self.state),
        }))
    }
}

#[derive(Debug)]
struct StubLibrary {
    path: PathBuf,
    state: Arc<Mutex<State>>,
}

impl LoadedLibrary for StubLibrary {
    fn path(&self) -> &Path {
        &self.path
    }

    fn symbol_address(&self, _name: &str) -> Option<usize> {
        None
    }

    fn close(self: Box<Self>) -> Result<(), PluginError> {
        let mut state = self.state.lock().unwrap();
        if let Some(index) = state.open.iter().position(|p| *p == self.path) {
            state.open.remove(index);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_open_unknown_library_fails() {
        let stub = StubBackend::new();
        let err = stub
            .open(Path::new("./libnothing.so"), Visibility::Global)
            .unwrap_err();
        assert!(matches!(err, PluginError::LibraryLoad { .. }));
    }

    #[test]
    fn test_open_runs_hook_and_tracks_state() {
        let stub = StubBackend::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        stub.add_library("./liba.so", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let library = stub.open(Path::new("./liba.so"), Visibility::Global).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(stub.is_open(Path::new("./liba.so")));
        assert_eq!(stub.times_opened(Path::new("./liba.so")), 1);

        library.close().unwrap();
        assert!(!stub.is_open(Path::new("./liba.so")));
        assert_eq!(stub.times_opened(Path::new("./liba.so")), 1);
    }

    #[test]
    fn test_hook_runs_on_every_open() {
        let stub = StubBackend::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        stub.add_library("./liba.so", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let first = stub.open(Path::new("./liba.so"), Visibility::Global).unwrap();
        first.close().unwrap();
        let second = stub.open(Path::new("./liba.so"), Visibility::Global).unwrap();
        second.close().unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(stub.times_opened(Path::new("./liba.so")), 2);
    }
}
