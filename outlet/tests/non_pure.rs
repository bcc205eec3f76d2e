//! Behavior when a plugin library is mapped outside any loader's control
//!
//! Factories registered with no loader active (a plugin library the host
//! links against directly, or one the dynamic linker pulls in transitively)
//! mark the process as non-pure: their classes stay usable, but no library
//! can be unmapped for the rest of the process.

use std::path::Path;
use std::sync::Arc;

use outlet::testing::StubBackend;
use outlet::{Loader, Registry};

trait Animal: Send + Sync {
    fn say_something(&self) -> &'static str;
}

#[derive(Default)]
struct Dog;

impl Animal for Dog {
    fn say_something(&self) -> &'static str {
        "Bark"
    }
}

#[derive(Default)]
struct Gorilla;

impl Animal for Gorilla {
    fn say_something(&self) -> &'static str {
        "Ook"
    }
}

#[test]
fn test_non_pure_registration_disables_all_unmapping() {
    let stub = Arc::new(StubBackend::new());
    let registry = Arc::new(Registry::with_backend(stub.clone()));
    let weak = Arc::downgrade(&registry);
    stub.add_library("./libzoo.so", move |_| {
        if let Some(registry) = weak.upgrade() {
            registry.register_factory::<dyn Animal>("Dog", || Box::new(Dog));
        }
    });

    let loader = Loader::with_registry("./libzoo.so", false, registry.clone()).unwrap();
    assert!(!registry.non_pure_opened());

    // A directly linked library's initializers run with no loader active.
    registry.register_factory::<dyn Animal>("Gorilla", || Box::new(Gorilla));
    assert!(registry.non_pure_opened());

    // The orphan class is visible through any loader, after its own
    // classes, and is usable.
    let names = loader.available_classes::<dyn Animal>();
    assert_eq!(names, vec!["Dog", "Gorilla"]);
    let gorilla = loader.create_shared::<dyn Animal>("Gorilla").unwrap();
    assert_eq!(gorilla.say_something(), "Ook");
    drop(gorilla);

    // Unload is now a no-op for every loader: the count drains, but the
    // library stays mapped and the loader keeps its classes.
    assert_eq!(loader.unload(), 0);
    assert!(stub.is_open(Path::new("./libzoo.so")));
    assert!(loader.is_loaded());

    // A fresh loader on the same path adopts the mapping as usual.
    let second = Loader::with_registry("./libzoo.so", false, registry).unwrap();
    assert_eq!(
        second
            .create_shared::<dyn Animal>("Dog")
            .unwrap()
            .say_something(),
        "Bark"
    );
    drop(second);
    assert!(stub.is_open(Path::new("./libzoo.so")));
}

#[test]
fn test_non_pure_flag_is_sticky() {
    let registry = Registry::with_backend(Arc::new(StubBackend::new()));
    registry.register_factory::<dyn Animal>("Gorilla", || Box::new(Gorilla));
    assert!(registry.non_pure_opened());

    // Nothing resets it.
    registry.register_factory::<dyn Animal>("Dog", || Box::new(Dog));
    assert!(registry.non_pure_opened());
}
