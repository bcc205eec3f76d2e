//! Class factories and their attribution
//!
//! Every plugin class registration produces one [`Factory`], tagged with the
//! library that contributed it and the identities of the loaders allowed to
//! use it. Factories for all base capabilities share one registry, so they
//! are stored type-erased and recovered by [`Any`] downcast.

use std::any::Any;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of a [`Loader`](crate::Loader).
///
/// Factories record loader identities rather than references, so factory
/// lifetime never depends on loader lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoaderId(u64);

impl LoaderId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Type-erased view of a factory: everything except construction.
pub(crate) trait ErasedFactory: Send + Sync {
    /// Name the plugin class registered under.
    fn class_name(&self) -> &str;

    /// Type name of the base capability, for diagnostics.
    fn base_name(&self) -> &str;

    /// Path of the library that contributed this factory, or `None` when it
    /// was registered outside any loader's control.
    fn library_path(&self) -> Option<&Path>;

    fn is_owned_by(&self, loader: LoaderId) -> bool;

    fn has_no_owner(&self) -> bool;

    fn add_owner(&self, loader: LoaderId);

    fn remove_owner(&self, loader: LoaderId);

    fn as_any(&self) -> &dyn Any;
}

/// A factory for one plugin class satisfying base capability `B`.
pub(crate) struct Factory<B: ?Sized + 'static> {
    class_name: String,
    base_name: &'static str,
    library_path: Option<PathBuf>,
    owners: Mutex<HashSet<LoaderId>>,
    construct: fn() -> Box<B>,
}

impl<B: ?Sized + 'static> Factory<B> {
    pub(crate) fn new(
        class_name: &str,
        library_path: Option<PathBuf>,
        owner: Option<LoaderId>,
        construct: fn() -> Box<B>,
    ) -> Self {
        let mut owners = HashSet::new();
        if let Some(owner) = owner {
            owners.insert(owner);
        }
        Self {
            class_name: class_name.to_string(),
            base_name: std::any::type_name::<B>(),
            library_path,
            owners: Mutex::new(owners),
            construct,
        }
    }

    pub(crate) fn construct(&self) -> Box<B> {
        (self.construct)()
    }
}

impl<B: ?Sized + 'static> ErasedFactory for Factory<B> {
    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn base_name(&self) -> &str {
        self.base_name
    }

    fn library_path(&self) -> Option<&Path> {
        self.library_path.as_deref()
    }

    fn is_owned_by(&self, loader: LoaderId) -> bool {
        self.owners.lock().unwrap().contains(&loader)
    }

    fn has_no_owner(&self) -> bool {
        self.owners.lock().unwrap().is_empty()
    }

    fn add_owner(&self, loader: LoaderId) {
        self.owners.lock().unwrap().insert(loader);
    }

    fn remove_owner(&self, loader: LoaderId) {
        self.owners.lock().unwrap().remove(&loader);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
