//! outlet: a runtime plugin loader
//!
//! `outlet` lets a host process discover and instantiate plugin classes
//! from shared libraries opened at runtime, without compile-time knowledge
//! of those classes. The host declares a base capability (a trait);
//! independently compiled libraries contribute implementations and name
//! them; the host selects them by name.
//!
//! - **Registration** - a plugin library calls [`register_plugin!`] once
//!   per class. The expansion runs during the map call, from the library's
//!   own initializers, and publishes a factory into the process-wide
//!   [`Registry`].
//! - **Loading** - a [`Loader`] is bound to one library path. It counts
//!   loads and unloads symmetrically, tracks the instances it produced, and
//!   never lets its library be unmapped while one of them is alive.
//! - **Aggregation** - a [`MultiLoader`] owns loaders for several paths and
//!   resolves class names across them in insertion order.
//!
//! # Host side
//!
//! ```ignore
//! use outlet::Loader;
//! use zoo_api::Animal;
//!
//! let loader = Loader::new("./libzoo_plugin.so", false)?;
//! for name in loader.available_classes::<dyn Animal>() {
//!     let animal = loader.create_shared::<dyn Animal>(&name)?;
//!     println!("{name} says {}", animal.say_something());
//! }
//! ```
//!
//! # Plugin side
//!
//! ```ignore
//! use zoo_api::Animal;
//!
//! #[derive(Default)]
//! struct Dog;
//!
//! impl Animal for Dog {
//!     fn say_something(&self) -> &'static str {
//!         "Bark"
//!     }
//! }
//!
//! outlet::register_plugin!(Dog, dyn Animal);
//! ```
//!
//! Self-registration reaches the host's registry only when host and plugin
//! share a single copy of this crate, which for separately compiled
//! binaries means linking it as a shared library (`prefer-dynamic`); the
//! same constraint the C and C++ ecosystems have for plugin registries.
//!
//! Libraries mapped by any other means (the host linking a plugin library
//! directly, or the dynamic linker pulling one in transitively) are still
//! usable - their classes show up with no owning loader - but their
//! presence permanently disables unmapping, because no loader can know
//! when their code stops being referenced.

pub mod dl;
pub mod error;
mod factory;
mod instance;
mod loader;
mod macros;
mod multi;
pub mod registry;
pub mod testing;

pub use dl::{
    DlBackend, LibraryBackend, LoadedLibrary, Visibility, default_prefix, default_suffix,
    platform_library_name,
};
pub use error::PluginError;
pub use instance::{Instance, SharedInstance};
pub use loader::Loader;
pub use multi::MultiLoader;
pub use registry::Registry;

#[doc(hidden)]
pub mod __private {
    pub use ctor;
}
