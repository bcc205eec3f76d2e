//! Per-library plugin loader
//!
//! A [`Loader`] is bound to one shared-library path. It counts loads and
//! unloads symmetrically, counts the managed instances it has produced, and
//! refuses to release its library while any of them exist. With `lazy`
//! enabled it defers mapping until first use and unmaps when the last
//! managed instance is released.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::PluginError;
use crate::factory::LoaderId;
use crate::instance::{Instance, SharedInstance};
use crate::registry::{self, Registry};

/// State shared between a [`Loader`] and the instances it produced.
///
/// Instance guards hold this alive so their release bookkeeping stays valid
/// even if the `Loader` value is dropped first.
pub(crate) struct LoaderCore {
    id: LoaderId,
    path: PathBuf,
    lazy: bool,
    registry: Arc<Registry>,
    load_count: Mutex<usize>,
    instance_count: Mutex<usize>,
}

impl LoaderCore {
    fn load(&self) -> Result<(), PluginError> {
        let mut load_count = self.load_count.lock().unwrap();
        self.registry.open_library(&self.path, self.id)?;
        *load_count += 1;
        Ok(())
    }

    fn unload(&self) -> usize {
        let mut load_count = self.load_count.lock().unwrap();
        {
            let instance_count = self.instance_count.lock().unwrap();
            if *instance_count > 0 {
                tracing::warn!(
                    library = %self.path.display(),
                    outstanding = *instance_count,
                    "refusing to unload while instances created by this loader are alive"
                );
                return *load_count;
            }
        }
        self.unload_one(&mut load_count)
    }

    /// One unload step with the load-count lock already held and the
    /// instance count known to be zero.
    fn unload_one(&self, load_count: &mut MutexGuard<'_, usize>) -> usize {
        if **load_count == 0 {
            return 0;
        }
        **load_count -= 1;
        self.registry
            .close_library(&self.path, self.id, **load_count == 0);
        **load_count
    }

    pub(crate) fn release_instance(&self) {
        let mut load_count = self.load_count.lock().unwrap();
        let last = {
            let mut instance_count = self.instance_count.lock().unwrap();
            *instance_count = instance_count.saturating_sub(1);
            *instance_count == 0
        };

        if last && self.lazy {
            if self.registry.unmanaged_created() {
                tracing::warn!(
                    library = %self.path.display(),
                    "last managed instance released, but an unmanaged instance was \
                     created in this process; the library will not be unmapped"
                );
            } else {
                self.unload_one(&mut load_count);
            }
        }
    }

    fn load_count(&self) -> usize {
        *self.load_count.lock().unwrap()
    }
}

/// Loads and unloads one shared library and creates plugin instances from
/// the classes it registered.
///
/// # Example
///
/// ```ignore
/// let loader = Loader::new("./libzoo.so", false)?;
/// for name in loader.available_classes::<dyn Animal>() {
///     let animal = loader.create_shared::<dyn Animal>(&name)?;
///     println!("{} says {}", name, animal.say_something());
/// }
/// ```
pub struct Loader {
    core: Arc<LoaderCore>,
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("path", &self.core.path)
            .field("lazy", &self.core.lazy)
            .finish_non_exhaustive()
    }
}

impl Loader {
    /// Bind a loader to `path` using the process-wide registry.
    ///
    /// With `lazy` disabled the library is mapped immediately, so
    /// construction can fail with [`PluginError::LibraryLoad`]. With `lazy`
    /// enabled mapping is deferred until [`load`](Self::load) or the first
    /// `create_*` call, and the library is unmapped whenever the last
    /// managed instance goes away.
    pub fn new(path: impl Into<PathBuf>, lazy: bool) -> Result<Self, PluginError> {
        Self::with_registry(path, lazy, Arc::clone(registry::global()))
    }

    /// Bind a loader to `path` against an explicit registry instance.
    pub fn with_registry(
        path: impl Into<PathBuf>,
        lazy: bool,
        registry: Arc<Registry>,
    ) -> Result<Self, PluginError> {
        let path = path.into();
        tracing::debug!(library = %path.display(), lazy, "constructing loader");
        let loader = Self {
            core: Arc::new(LoaderCore {
                id: LoaderId::next(),
                path,
                lazy,
                registry,
                load_count: Mutex::new(0),
                instance_count: Mutex::new(0),
            }),
        };
        if !lazy {
            loader.load()?;
        }
        Ok(loader)
    }

    /// The library path this loader is bound to.
    pub fn library_path(&self) -> &Path {
        &self.core.path
    }

    /// True if lazy (on-demand) load/unload is enabled.
    pub fn lazy_enabled(&self) -> bool {
        self.core.lazy
    }

    /// True if this loader currently has access to plugin classes from its
    /// library.
    pub fn is_loaded(&self) -> bool {
        self.core.registry.is_loaded_by(&self.core.path, self.core.id)
    }

    /// True if the library is mapped at all, by this loader or any other.
    pub fn is_loaded_anywhere(&self) -> bool {
        self.core.registry.is_library_open(&self.core.path)
    }

    /// Map the library (or adopt an existing mapping) on behalf of this
    /// loader.
    ///
    /// Each call increments the local load count; the same number of
    /// [`unload`](Self::unload) calls is needed to release the library.
    pub fn load(&self) -> Result<(), PluginError> {
        self.core.load()
    }

    /// Release one load of the library.
    ///
    /// Returns the remaining local load count. While instances created by
    /// this loader are alive the call refuses, leaves the count unchanged,
    /// and logs a warning; the library stays mapped.
    pub fn unload(&self) -> usize {
        self.core.unload()
    }

    /// Library paths contributing factories this loader owns. Normally the
    /// bound path alone, once loaded; useful in diagnostics.
    pub fn libraries_used(&self) -> Vec<PathBuf> {
        self.core.registry.libraries_used_by(self.core.id)
    }

    /// Names of the plugin classes this loader can instantiate under base
    /// capability `B`.
    pub fn available_classes<B: ?Sized + 'static>(&self) -> Vec<String> {
        self.core.registry.available_classes::<B>(self.core.id)
    }

    /// True if `class_name` is among [`available_classes`](Self::available_classes).
    pub fn is_class_available<B: ?Sized + 'static>(&self, class_name: &str) -> bool {
        self.available_classes::<B>()
            .iter()
            .any(|name| name == class_name)
    }

    /// Create an instance of `class_name` behind a shared handle.
    ///
    /// Loads the library first if this loader has not done so yet.
    pub fn create_shared<B: ?Sized + 'static>(
        &self,
        class_name: &str,
    ) -> Result<SharedInstance<B>, PluginError> {
        self.create_unique(class_name).map(Arc::new)
    }

    /// Create an instance of `class_name` behind a unique handle.
    pub fn create_unique<B: ?Sized + 'static>(
        &self,
        class_name: &str,
    ) -> Result<Instance<B>, PluginError> {
        let object = self.create_raw::<B>(class_name, true)?;
        Ok(Instance::new(object, Arc::clone(&self.core)))
    }

    /// Create an instance the loader will not track. The caller owns it
    /// outright.
    ///
    /// Because such an object can be held anywhere, its existence disables
    /// lazy unmapping for every loader in the process from here on.
    pub fn create_unmanaged<B: ?Sized + 'static>(
        &self,
        class_name: &str,
    ) -> Result<Box<B>, PluginError> {
        self.create_raw::<B>(class_name, false)
    }

    fn create_raw<B: ?Sized + 'static>(
        &self,
        class_name: &str,
        managed: bool,
    ) -> Result<Box<B>, PluginError> {
        let core = &self.core;

        if !managed {
            core.registry.note_unmanaged_created();
        } else if core.lazy && core.registry.unmanaged_created() {
            tracing::info!(
                library = %core.path.display(),
                "creating a managed instance, but an unmanaged instance exists in this \
                 process; the library will not be unmapped on final release"
            );
        }

        if !self.is_loaded() {
            self.load()?;
        }

        if managed {
            *core.instance_count.lock().unwrap() += 1;
        }

        match core.registry.create_instance::<B>(class_name, core.id) {
            Ok(object) => Ok(object),
            Err(err) => {
                if managed {
                    let mut instance_count = core.instance_count.lock().unwrap();
                    *instance_count = instance_count.saturating_sub(1);
                }
                Err(err)
            }
        }
    }
}

impl Drop for Loader {
    fn drop(&mut self) {
        tracing::debug!(library = %self.core.path.display(), "destroying loader");
        loop {
            let before = self.core.load_count();
            if before == 0 {
                break;
            }
            // A refused unload (outstanding instances) leaves the count
            // unchanged; stop rather than spin. The refusal itself is logged.
            if self.core.unload() >= before {
                break;
            }
        }
    }
}
