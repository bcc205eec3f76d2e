//! Facade over several loaders
//!
//! [`MultiLoader`] owns one [`Loader`] per library path and resolves plugin
//! class names across all of them, in the order the libraries were loaded.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::PluginError;
use crate::instance::{Instance, SharedInstance};
use crate::loader::Loader;
use crate::registry::{self, Registry};

/// Aggregates loaders keyed by library path.
///
/// Class lookup without an explicit path walks the loaders in insertion
/// order and the first one exposing the class wins.
pub struct MultiLoader {
    lazy: bool,
    registry: Arc<Registry>,
    loaders: Mutex<Vec<Loader>>,
}

impl MultiLoader {
    /// A multi-loader whose children use the process-wide registry.
    ///
    /// `lazy` is passed through to every loader it creates.
    pub fn new(lazy: bool) -> Self {
        Self::with_registry(lazy, Arc::clone(registry::global()))
    }

    /// A multi-loader whose children use an explicit registry instance.
    pub fn with_registry(lazy: bool, registry: Arc<Registry>) -> Self {
        Self {
            lazy,
            registry,
            loaders: Mutex::new(Vec::new()),
        }
    }

    /// True if child loaders are created in lazy mode.
    pub fn lazy_enabled(&self) -> bool {
        self.lazy
    }

    /// Bind a loader to `path` if none exists yet.
    pub fn load_library(&self, path: impl AsRef<Path>) -> Result<(), PluginError> {
        let path = path.as_ref();
        let mut loaders = self.loaders.lock().unwrap();
        if loaders.iter().any(|loader| loader.library_path() == path) {
            return Ok(());
        }
        let loader = Loader::with_registry(path, self.lazy, Arc::clone(&self.registry))?;
        loaders.push(loader);
        Ok(())
    }

    /// Release one load of the loader bound to `path`.
    ///
    /// Returns the remaining load count; at zero the loader is destroyed
    /// and removed. Unknown paths return zero.
    pub fn unload_library(&self, path: impl AsRef<Path>) -> usize {
        let path = path.as_ref();
        let mut loaders = self.loaders.lock().unwrap();
        let Some(index) = loaders
            .iter()
            .position(|loader| loader.library_path() == path)
        else {
            return 0;
        };
        let remaining = loaders[index].unload();
        if remaining == 0 {
            loaders.remove(index);
        }
        remaining
    }

    /// Paths of all libraries with a bound loader, in insertion order.
    pub fn registered_libraries(&self) -> Vec<PathBuf> {
        self.loaders
            .lock()
            .unwrap()
            .iter()
            .map(|loader| loader.library_path().to_path_buf())
            .collect()
    }

    /// True if a loader is bound to `path`.
    pub fn is_library_available(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        self.loaders
            .lock()
            .unwrap()
            .iter()
            .any(|loader| loader.library_path() == path)
    }

    /// Class names available under `B` across all loaders, in insertion
    /// order of their libraries.
    pub fn available_classes<B: ?Sized + 'static>(&self) -> Vec<String> {
        let loaders = self.loaders.lock().unwrap();
        let mut names = Vec::new();
        for loader in loaders.iter() {
            for name in loader.available_classes::<B>() {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Class names available under `B` from the loader bound to `path`.
    pub fn available_classes_in<B: ?Sized + 'static>(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<Vec<String>, PluginError> {
        let loaders = self.loaders.lock().unwrap();
        let loader = Self::find(&loaders, path.as_ref())?;
        Ok(loader.available_classes::<B>())
    }

    /// True if some loader exposes `class_name` under `B`.
    pub fn is_class_available<B: ?Sized + 'static>(&self, class_name: &str) -> bool {
        self.loaders
            .lock()
            .unwrap()
            .iter()
            .any(|loader| loader.is_class_available::<B>(class_name))
    }

    /// Create a shared instance of `class_name`, resolving it across all
    /// loaders in insertion order.
    pub fn create_shared<B: ?Sized + 'static>(
        &self,
        class_name: &str,
    ) -> Result<SharedInstance<B>, PluginError> {
        let loaders = self.loaders.lock().unwrap();
        let loader = Self::resolve::<B>(&loaders, class_name)?;
        loader.create_shared::<B>(class_name)
    }

    /// Create a shared instance of `class_name` from the library at `path`.
    pub fn create_shared_from<B: ?Sized + 'static>(
        &self,
        class_name: &str,
        path: impl AsRef<Path>,
    ) -> Result<SharedInstance<B>, PluginError> {
        let loaders = self.loaders.lock().unwrap();
        let loader = Self::find(&loaders, path.as_ref())?;
        loader.create_shared::<B>(class_name)
    }

    /// Create a uniquely owned instance of `class_name`, resolving it
    /// across all loaders in insertion order.
    pub fn create_unique<B: ?Sized + 'static>(
        &self,
        class_name: &str,
    ) -> Result<Instance<B>, PluginError> {
        let loaders = self.loaders.lock().unwrap();
        let loader = Self::resolve::<B>(&loaders, class_name)?;
        loader.create_unique::<B>(class_name)
    }

    /// Create a uniquely owned instance of `class_name` from the library at
    /// `path`.
    pub fn create_unique_from<B: ?Sized + 'static>(
        &self,
        class_name: &str,
        path: impl AsRef<Path>,
    ) -> Result<Instance<B>, PluginError> {
        let loaders = self.loaders.lock().unwrap();
        let loader = Self::find(&loaders, path.as_ref())?;
        loader.create_unique::<B>(class_name)
    }

    /// Create an untracked instance of `class_name`, resolving it across
    /// all loaders in insertion order. See
    /// [`Loader::create_unmanaged`] for the process-wide consequences.
    pub fn create_unmanaged<B: ?Sized + 'static>(
        &self,
        class_name: &str,
    ) -> Result<Box<B>, PluginError> {
        let loaders = self.loaders.lock().unwrap();
        let loader = Self::resolve::<B>(&loaders, class_name)?;
        loader.create_unmanaged::<B>(class_name)
    }

    /// Create an untracked instance of `class_name` from the library at
    /// `path`.
    pub fn create_unmanaged_from<B: ?Sized + 'static>(
        &self,
        class_name: &str,
        path: impl AsRef<Path>,
    ) -> Result<Box<B>, PluginError> {
        let loaders = self.loaders.lock().unwrap();
        let loader = Self::find(&loaders, path.as_ref())?;
        loader.create_unmanaged::<B>(class_name)
    }

    /// First loader in insertion order that exposes `class_name`, loading
    /// lazy children on the way.
    fn resolve<'a, B: ?Sized + 'static>(
        loaders: &'a [Loader],
        class_name: &str,
    ) -> Result<&'a Loader, PluginError> {
        for loader in loaders {
            if !loader.is_loaded() {
                loader.load()?;
            }
            if loader.is_class_available::<B>(class_name) {
                return Ok(loader);
            }
        }
        Err(PluginError::CreateClass {
            class: class_name.to_string(),
        })
    }

    fn find<'a>(loaders: &'a [Loader], path: &Path) -> Result<&'a Loader, PluginError> {
        loaders
            .iter()
            .find(|loader| loader.library_path() == path)
            .ok_or_else(|| PluginError::NoLoader {
                path: path.to_path_buf(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubBackend;

    trait Shape: Send + Sync {
        fn origin(&self) -> &'static str;
    }

    macro_rules! shape {
        ($name:ident, $origin:literal) => {
            #[derive(Default)]
            struct $name;

            impl Shape for $name {
                fn origin(&self) -> &'static str {
                    $origin
                }
            }
        };
    }

    shape!(XFromA, "liba");
    shape!(YFromA, "liba");
    shape!(YFromB, "libb");
    shape!(ZFromB, "libb");

    fn two_library_registry() -> Arc<Registry> {
        let stub = Arc::new(StubBackend::new());
        let registry = Arc::new(Registry::with_backend(stub.clone()));

        let weak = Arc::downgrade(&registry);
        stub.add_library("./liba.so", move |_| {
            if let Some(registry) = weak.upgrade() {
                registry.register_factory::<dyn Shape>("X", || Box::new(XFromA));
                registry.register_factory::<dyn Shape>("Y", || Box::new(YFromA));
            }
        });

        let weak = Arc::downgrade(&registry);
        stub.add_library("./libb.so", move |_| {
            if let Some(registry) = weak.upgrade() {
                registry.register_factory::<dyn Shape>("Y", || Box::new(YFromB));
                registry.register_factory::<dyn Shape>("Z", || Box::new(ZFromB));
            }
        });

        registry
    }

    fn loaded_multi(registry: Arc<Registry>) -> MultiLoader {
        let multi = MultiLoader::with_registry(false, registry);
        multi.load_library("./liba.so").unwrap();
        multi.load_library("./libb.so").unwrap();
        multi
    }

    #[test]
    fn test_resolution_prefers_insertion_order() {
        let multi = MultiLoader::with_registry(true, two_library_registry());
        multi.load_library("./liba.so").unwrap();
        multi.load_library("./libb.so").unwrap();

        assert_eq!(multi.create_shared::<dyn Shape>("X").unwrap().origin(), "liba");
        // Both libraries register "Y". Resolution walks in insertion order
        // and stops at the first loader exposing the name, so the later
        // library is never consulted (nor mapped) for it.
        assert_eq!(multi.create_shared::<dyn Shape>("Y").unwrap().origin(), "liba");
        assert_eq!(multi.create_shared::<dyn Shape>("Z").unwrap().origin(), "libb");
    }

    #[test]
    fn test_unknown_class_fails_with_create_class() {
        let multi = loaded_multi(two_library_registry());
        let err = multi.create_shared::<dyn Shape>("Q").unwrap_err();
        assert!(matches!(err, PluginError::CreateClass { class } if class == "Q"));
    }

    #[test]
    fn test_create_from_explicit_library() {
        let multi = loaded_multi(two_library_registry());

        let y = multi
            .create_shared_from::<dyn Shape>("Y", "./libb.so")
            .unwrap();
        assert_eq!(y.origin(), "libb");

        let err = multi
            .create_shared_from::<dyn Shape>("Y", "./libc.so")
            .unwrap_err();
        assert!(matches!(err, PluginError::NoLoader { .. }));
    }

    #[test]
    fn test_registered_libraries_in_insertion_order() {
        let multi = loaded_multi(two_library_registry());
        assert_eq!(
            multi.registered_libraries(),
            vec![PathBuf::from("./liba.so"), PathBuf::from("./libb.so")]
        );
        assert!(multi.is_library_available("./liba.so"));
        assert!(!multi.is_library_available("./libc.so"));
    }

    #[test]
    fn test_load_library_is_idempotent() {
        let multi = loaded_multi(two_library_registry());
        multi.load_library("./liba.so").unwrap();
        assert_eq!(multi.registered_libraries().len(), 2);
    }

    #[test]
    fn test_available_classes_aggregates_without_duplicates() {
        let multi = loaded_multi(two_library_registry());
        assert_eq!(multi.available_classes::<dyn Shape>(), vec!["X", "Y", "Z"]);
        assert!(multi.is_class_available::<dyn Shape>("Z"));
        assert!(!multi.is_class_available::<dyn Shape>("Q"));

        assert_eq!(
            multi.available_classes_in::<dyn Shape>("./libb.so").unwrap(),
            vec!["Y", "Z"]
        );
        assert!(multi.available_classes_in::<dyn Shape>("./libc.so").is_err());
    }

    #[test]
    fn test_unload_library_removes_loader_at_zero() {
        let multi = loaded_multi(two_library_registry());

        assert_eq!(multi.unload_library("./liba.so"), 0);
        assert!(!multi.is_library_available("./liba.so"));
        // Unknown or already-removed paths are a quiet no-op.
        assert_eq!(multi.unload_library("./liba.so"), 0);

        // Name resolution now reaches only the remaining library.
        assert_eq!(multi.create_shared::<dyn Shape>("Y").unwrap().origin(), "libb");
    }

    #[test]
    fn test_missing_library_load_fails() {
        let registry = Arc::new(Registry::with_backend(Arc::new(StubBackend::new())));
        let multi = MultiLoader::with_registry(false, registry);
        assert!(matches!(
            multi.load_library("./libc.so").unwrap_err(),
            PluginError::LibraryLoad { .. }
        ));
        assert!(!multi.is_library_available("./libc.so"));
    }

    #[test]
    fn test_lazy_multi_loads_on_demand() {
        let multi = MultiLoader::with_registry(true, two_library_registry());
        multi.load_library("./liba.so").unwrap();
        multi.load_library("./libb.so").unwrap();

        // Nothing is mapped until a class is requested.
        assert!(multi.available_classes::<dyn Shape>().is_empty());

        let z = multi.create_unique::<dyn Shape>("Z").unwrap();
        assert_eq!(z.origin(), "libb");
    }
}
