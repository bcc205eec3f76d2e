//! Zoo host - loads the zoo plugin library and makes every animal speak
//!
//! ```bash
//! zoo-host [path-to-plugin-library]
//! ```
//!
//! Defaults to `./libzoo_plugin.so` (with the platform's prefix and
//! suffix). Host and plugin must link `outlet` dynamically so they share
//! one registry; see the `zoo-plugin` crate docs.

use outlet::{Loader, platform_library_name};
use zoo_api::Animal;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| format!("./{}", platform_library_name("zoo_plugin", false)));

    let loader = Loader::new(path, false)?;
    tracing::info!(library = %loader.library_path().display(), "plugin library loaded");

    let names = loader.available_classes::<dyn Animal>();
    println!("{} animals registered", names.len());
    for name in &names {
        let animal = loader.create_shared::<dyn Animal>(name)?;
        println!("{name} says {}", animal.say_something());
    }

    Ok(())
}
