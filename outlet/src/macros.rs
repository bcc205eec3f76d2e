//! Plugin registration macro

/// Register a plugin class for dynamic creation.
///
/// This is the one link between a plugin library's sources and the
/// registry: the macro expands to a static initializer that runs while the
/// library is being mapped, builds a construction thunk for the class, and
/// publishes it under the base capability. The loader performing the map
/// picks the registration up through the registry's load context; no
/// symbols are exported or looked up.
///
/// The class must implement [`Default`] and the base trait.
///
/// # Usage
///
/// ```ignore
/// use zoo_api::Animal;
///
/// #[derive(Default)]
/// pub struct Dog;
///
/// impl Animal for Dog {
///     fn say_something(&self) -> &'static str {
///         "Bark"
///     }
/// }
///
/// outlet::register_plugin!(Dog, dyn Animal);
/// // or, under an explicit name:
/// outlet::register_plugin!(Dog, dyn Animal, "GoodBoy");
/// ```
#[macro_export]
macro_rules! register_plugin {
    ($derived:ty, $base:ty) => {
        $crate::register_plugin!($derived, $base, ::core::stringify!($derived));
    };
    ($derived:ty, $base:ty, $name:expr) => {
        const _: () = {
            use $crate::__private::ctor;

            #[ctor::ctor]
            fn register() {
                $crate::registry::global().register_factory::<$base>($name, || {
                    ::std::boxed::Box::new(<$derived as ::core::default::Default>::default())
                });
            }
        };
    };
}

#[cfg(test)]
mod tests {
    // The macro registers into the process-wide registry, so the expansion
    // is exercised here and the registration protocol itself is covered by
    // the registry tests against isolated instances.

    trait Greeter: Send + Sync {
        fn greet(&self) -> &'static str;
    }

    #[derive(Default)]
    struct EnglishGreeter;

    impl Greeter for EnglishGreeter {
        fn greet(&self) -> &'static str {
            "hello"
        }
    }

    crate::register_plugin!(EnglishGreeter, dyn Greeter);
    crate::register_plugin!(EnglishGreeter, dyn Greeter, "Polite");

    #[test]
    fn test_macro_registers_into_global_registry() {
        use crate::factory::LoaderId;

        let registry = crate::registry::global();
        // Registered from this test binary's own initializers, i.e. outside
        // any loader's control: the process is non-pure and the factories
        // belong to no loader, so any loader may see and use them.
        assert!(registry.non_pure_opened());

        let names = registry.available_classes::<dyn Greeter>(LoaderId::next());
        assert!(names.contains(&"EnglishGreeter".to_string()));
        assert!(names.contains(&"Polite".to_string()));

        let greeter = registry
            .create_instance::<dyn Greeter>("Polite", LoaderId::next())
            .unwrap();
        assert_eq!(greeter.greet(), "hello");
    }
}
