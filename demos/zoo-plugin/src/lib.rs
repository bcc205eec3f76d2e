//! Zoo plugin - the classic example plugin library
//!
//! Registers five `Animal` implementations. The registrations run from this
//! library's own initializers while a host's `Loader` maps it; nothing here
//! is exported by symbol.
//!
//! ## Building
//!
//! ```bash
//! cargo build -p zoo-plugin
//! ```
//!
//! The host must share this plugin's copy of `outlet` for the registry to
//! be common to both, i.e. both sides link it dynamically
//! (`-C prefer-dynamic`), the same way the C++ ancestors of this pattern
//! share one loader shared-object.

use zoo_api::Animal;

macro_rules! animal {
    ($name:ident, $noise:literal) => {
        #[derive(Default)]
        pub struct $name;

        impl Animal for $name {
            fn say_something(&self) -> &'static str {
                $noise
            }
        }

        outlet::register_plugin!($name, dyn Animal);
    };
}

animal!(Dog, "Bark");
animal!(Cat, "Meow");
animal!(Duck, "Quack");
animal!(Cow, "Moooo");
animal!(Sheep, "Baaah");
