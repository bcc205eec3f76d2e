//! Process-wide factory registry and registration protocol
//!
//! The registry is the rendezvous point between loaders and the code that
//! runs inside a just-mapped plugin library. A library registers its
//! factories from its own static initializers, which execute *during* the
//! map call; there is no parameter path from the loader into that code, so
//! the registry keeps a "current load" context that [`register_factory`]
//! consults to attribute each factory to the loader and library that
//! produced it.
//!
//! [`register_factory`]: Registry::register_factory
//!
//! Lock order, outermost first: a loader's load-count mutex, a loader's
//! instance-count mutex, the registry load lock, the libraries mutex, the
//! factories mutex, the linker shim's mutex. Locks are only ever acquired
//! in that order.

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::dl::{DlBackend, LibraryBackend, LoadedLibrary, Visibility};
use crate::error::PluginError;
use crate::factory::{ErasedFactory, Factory, LoaderId};

type FactoryTable = HashMap<TypeId, BTreeMap<String, Arc<dyn ErasedFactory>>>;

/// Bookkeeping for one mapped shared library.
struct LibraryRecord {
    path: PathBuf,
    /// Logical opens: one per successful `Loader::load` across all loaders.
    open_count: usize,
    library: Box<dyn LoadedLibrary>,
}

/// The library whose static initializers are currently executing under a
/// loader's control, or nothing.
#[derive(Default)]
struct LoadContext {
    path: Option<PathBuf>,
    loader: Option<LoaderId>,
}

/// The process-wide plugin registry.
///
/// One instance, obtained through [`global`], backs all loaders created
/// with [`Loader::new`](crate::Loader::new). Independent instances can be
/// built with [`Registry::with_backend`], which is how the test suite runs
/// whole load/unload lifecycles against an in-memory linker.
pub struct Registry {
    backend: Arc<dyn LibraryBackend>,
    visibility: Visibility,
    /// Serializes whole map/unmap brackets so concurrent loads cannot
    /// interleave their registration contexts.
    load_lock: Mutex<()>,
    libraries: Mutex<Vec<LibraryRecord>>,
    factories: Mutex<FactoryTable>,
    load_context: Mutex<LoadContext>,
    non_pure_opened: AtomicBool,
    unmanaged_created: AtomicBool,
}

/// The registry backing all loaders in this process.
pub fn global() -> &'static Arc<Registry> {
    static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();
    GLOBAL.get_or_init(|| Arc::new(Registry::new()))
}

impl Registry {
    /// A registry backed by the platform dynamic linker.
    pub fn new() -> Self {
        Self::with_backend(Arc::new(DlBackend::new()))
    }

    /// A registry backed by a custom [`LibraryBackend`].
    pub fn with_backend(backend: Arc<dyn LibraryBackend>) -> Self {
        Self {
            backend,
            visibility: Visibility::Global,
            load_lock: Mutex::new(()),
            libraries: Mutex::new(Vec::new()),
            factories: Mutex::new(HashMap::new()),
            load_context: Mutex::new(LoadContext::default()),
            non_pure_opened: AtomicBool::new(false),
            unmanaged_created: AtomicBool::new(false),
        }
    }

    /// Set the symbol visibility requested for subsequent maps.
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Publish a factory for plugin class `class_name` under base
    /// capability `B`.
    ///
    /// Called from a plugin library's static initializers, normally through
    /// [`register_plugin!`](crate::register_plugin); the current load
    /// context supplies the owning loader and contributing library. This
    /// runs under the platform loader's own lock, so it takes only the
    /// registry's context and factories mutexes and never calls back into
    /// the linker shim.
    ///
    /// A registration outside any loader's control marks the whole process
    /// as non-pure, which permanently disables unmapping. A registration
    /// that collides with an existing `(base, name)` entry overwrites it.
    pub fn register_factory<B: ?Sized + 'static>(
        &self,
        class_name: &str,
        construct: fn() -> Box<B>,
    ) {
        let (library_path, owner) = {
            let context = self.load_context.lock().unwrap();
            (context.path.clone(), context.loader)
        };

        tracing::debug!(
            class = class_name,
            base = std::any::type_name::<B>(),
            library = ?library_path,
            "registering plugin factory"
        );

        if owner.is_none() {
            tracing::warn!(
                class = class_name,
                "plugin factory registered while no loader was active; its library was \
                 opened outside loader control, and no library can be safely unmapped \
                 for the rest of the process"
            );
            self.non_pure_opened.store(true, Ordering::SeqCst);
        }

        let factory: Arc<dyn ErasedFactory> =
            Arc::new(Factory::<B>::new(class_name, library_path, owner, construct));

        let mut factories = self.factories.lock().unwrap();
        let for_base = factories.entry(TypeId::of::<B>()).or_default();
        if for_base.insert(class_name.to_string(), factory).is_some() {
            tracing::warn!(
                class = class_name,
                base = std::any::type_name::<B>(),
                "plugin class name collision: the newer factory replaces the existing one"
            );
        }
    }

    /// Names available to `loader` under base capability `B`: classes whose
    /// factory it owns, followed by classes whose factory has no owner.
    ///
    /// The order is stable across calls with no intervening registration.
    pub(crate) fn available_classes<B: ?Sized + 'static>(&self, loader: LoaderId) -> Vec<String> {
        let factories = self.factories.lock().unwrap();
        let Some(for_base) = factories.get(&TypeId::of::<B>()) else {
            return Vec::new();
        };

        let mut owned = Vec::new();
        let mut unowned = Vec::new();
        for (name, factory) in for_base.iter() {
            if factory.is_owned_by(loader) {
                owned.push(name.clone());
            } else if factory.has_no_owner() {
                unowned.push(name.clone());
            }
        }
        owned.extend(unowned);
        owned
    }

    /// Construct an instance of `class_name` on behalf of `loader`.
    pub(crate) fn create_instance<B: ?Sized + 'static>(
        &self,
        class_name: &str,
        loader: LoaderId,
    ) -> Result<Box<B>, PluginError> {
        let factory = {
            let factories = self.factories.lock().unwrap();
            factories
                .get(&TypeId::of::<B>())
                .and_then(|for_base| for_base.get(class_name))
                .cloned()
        };

        let Some(factory) = factory else {
            return Err(PluginError::CreateClass {
                class: class_name.to_string(),
            });
        };

        if !factory.is_owned_by(loader) {
            if factory.has_no_owner() {
                tracing::debug!(
                    class = class_name,
                    "factory has no owning loader; its library was mapped outside \
                     loader control"
                );
            } else {
                return Err(PluginError::CreateClass {
                    class: class_name.to_string(),
                });
            }
        }

        let typed = factory
            .as_any()
            .downcast_ref::<Factory<B>>()
            .ok_or_else(|| PluginError::CreateClass {
                class: class_name.to_string(),
            })?;
        Ok(typed.construct())
    }

    /// Open `path` on behalf of `loader`.
    ///
    /// If the library is already mapped, the loader adopts its factories
    /// and the record's open count grows. Otherwise the map runs inside the
    /// load-context bracket so the library's initializers can attribute
    /// their registrations.
    pub(crate) fn open_library(&self, path: &Path, loader: LoaderId) -> Result<(), PluginError> {
        let _serial = self.load_lock.lock().unwrap();

        {
            let mut libraries = self.libraries.lock().unwrap();
            if let Some(record) = libraries.iter_mut().find(|record| record.path == path) {
                record.open_count += 1;
                drop(libraries);
                // Already mapped by another loader: share its factories.
                self.for_each_library_factory(path, |factory| factory.add_owner(loader));
                return Ok(());
            }
        }

        self.enter_load(path, loader);
        let mapped = self.backend.open(path, self.visibility);
        self.exit_load();
        let library = mapped?;

        if !self.has_factories_for(path) {
            tracing::warn!(
                library = %path.display(),
                "library was mapped but registered no plugin factories"
            );
        }

        self.libraries.lock().unwrap().push(LibraryRecord {
            path: path.to_path_buf(),
            open_count: 1,
            library,
        });
        Ok(())
    }

    /// Release one logical open of `path` held by `loader`.
    ///
    /// With `release_ownership` set (the loader's last open), the loader is
    /// removed from the owner set of every factory the library contributed.
    /// When the final logical open is released, the library's factories are
    /// erased and the mapping is closed; factories must die first because
    /// their construction thunks point into the library. Unmap failures are
    /// soft: logged, never propagated.
    pub(crate) fn close_library(&self, path: &Path, loader: LoaderId, release_ownership: bool) {
        let _serial = self.load_lock.lock().unwrap();

        if self.non_pure_opened() {
            tracing::warn!(
                library = %path.display(),
                "refusing to unmap: a plugin library was opened outside loader control, \
                 so no library can be safely unmapped for the rest of the process"
            );
            return;
        }

        let mut libraries = self.libraries.lock().unwrap();
        let Some(index) = libraries.iter().position(|record| record.path == path) else {
            return;
        };

        if release_ownership {
            self.for_each_library_factory(path, |factory| factory.remove_owner(loader));
        }

        let record = &mut libraries[index];
        record.open_count = record.open_count.saturating_sub(1);
        if record.open_count > 0 {
            return;
        }

        let record = libraries.remove(index);
        drop(libraries);

        self.purge_factories(path);

        if let Err(err) = record.library.close() {
            tracing::warn!(library = %path.display(), error = %err, "failed to unmap library");
        } else {
            tracing::debug!(library = %path.display(), "unmapped library");
        }
    }

    /// True if a mapped-library record exists for `path`.
    pub fn is_library_open(&self, path: &Path) -> bool {
        self.libraries
            .lock()
            .unwrap()
            .iter()
            .any(|record| record.path == path)
    }

    /// True if some factory contributed by `path` is owned by `loader`.
    pub(crate) fn is_loaded_by(&self, path: &Path, loader: LoaderId) -> bool {
        let factories = self.factories.lock().unwrap();
        factories.values().any(|for_base| {
            for_base
                .values()
                .any(|f| f.library_path() == Some(path) && f.is_owned_by(loader))
        })
    }

    /// Paths of all currently mapped libraries, in mapping order.
    pub fn loaded_libraries(&self) -> Vec<PathBuf> {
        self.libraries
            .lock()
            .unwrap()
            .iter()
            .map(|record| record.path.clone())
            .collect()
    }

    /// Distinct library paths contributing factories owned by `loader`.
    pub(crate) fn libraries_used_by(&self, loader: LoaderId) -> Vec<PathBuf> {
        let factories = self.factories.lock().unwrap();
        let mut paths: Vec<PathBuf> = Vec::new();
        for for_base in factories.values() {
            for factory in for_base.values() {
                if let Some(path) = factory.library_path() {
                    if factory.is_owned_by(loader) && !paths.iter().any(|p| p == path) {
                        paths.push(path.to_path_buf());
                    }
                }
            }
        }
        paths
    }

    /// Address of `symbol` in the mapped library at `path`. Diagnostics
    /// only; plugin entry points are never resolved by symbol.
    pub fn symbol_in_library(&self, path: &Path, symbol: &str) -> Result<usize, PluginError> {
        let libraries = self.libraries.lock().unwrap();
        let record = libraries
            .iter()
            .find(|record| record.path == path)
            .ok_or_else(|| {
                PluginError::NotFound(format!("library {} is not open", path.display()))
            })?;
        record
            .library
            .symbol_address(symbol)
            .ok_or_else(|| {
                PluginError::NotFound(format!("symbol '{symbol}' in {}", path.display()))
            })
    }

    /// True once any factory has been registered outside a loader's
    /// control. Never resets; while set, no library is ever unmapped.
    pub fn non_pure_opened(&self) -> bool {
        self.non_pure_opened.load(Ordering::SeqCst)
    }

    pub(crate) fn note_unmanaged_created(&self) {
        self.unmanaged_created.store(true, Ordering::SeqCst);
    }

    /// True once any unmanaged instance has been created through this
    /// registry; lazy loaders stop auto-unmapping when it is set.
    pub fn unmanaged_created(&self) -> bool {
        self.unmanaged_created.load(Ordering::SeqCst)
    }

    /// Human-readable dump of the registry state, for debugging hosts.
    pub fn debug_report(&self) -> String {
        let mut report = String::from("mapped libraries:\n");
        {
            let libraries = self.libraries.lock().unwrap();
            if libraries.is_empty() {
                report.push_str("  (none)\n");
            }
            for record in libraries.iter() {
                let _ = writeln!(
                    report,
                    "  {} (open count {})",
                    record.path.display(),
                    record.open_count
                );
            }
        }
        report.push_str("registered factories:\n");
        let factories = self.factories.lock().unwrap();
        if factories.is_empty() {
            report.push_str("  (none)\n");
        }
        for for_base in factories.values() {
            for factory in for_base.values() {
                let _ = writeln!(
                    report,
                    "  {} (base {}, library {})",
                    factory.class_name(),
                    factory.base_name(),
                    factory
                        .library_path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "<outside loader control>".to_string()),
                );
            }
        }
        report
    }

    fn enter_load(&self, path: &Path, loader: LoaderId) {
        let mut context = self.load_context.lock().unwrap();
        context.path = Some(path.to_path_buf());
        context.loader = Some(loader);
    }

    fn exit_load(&self) {
        let mut context = self.load_context.lock().unwrap();
        context.path = None;
        context.loader = None;
    }

    fn for_each_library_factory(&self, path: &Path, mut apply: impl FnMut(&dyn ErasedFactory)) {
        let factories = self.factories.lock().unwrap();
        for for_base in factories.values() {
            for factory in for_base.values() {
                if factory.library_path() == Some(path) {
                    apply(factory.as_ref());
                }
            }
        }
    }

    fn has_factories_for(&self, path: &Path) -> bool {
        let factories = self.factories.lock().unwrap();
        factories.values().any(|for_base| {
            for_base
                .values()
                .any(|factory| factory.library_path() == Some(path))
        })
    }

    fn purge_factories(&self, path: &Path) {
        let mut factories = self.factories.lock().unwrap();
        for for_base in factories.values_mut() {
            for_base.retain(|_, factory| factory.library_path() != Some(path));
        }
        factories.retain(|_, for_base| !for_base.is_empty());
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
