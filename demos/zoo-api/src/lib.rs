//! Base capability shared by the zoo demo host and plugins
//!
//! Both sides depend on this crate: the plugin registers classes under
//! `dyn Animal`, the host enumerates and creates them under the same type.

/// An animal the zoo can exhibit.
pub trait Animal: Send + Sync {
    /// The noise this animal makes.
    fn say_something(&self) -> &'static str;
}
