// Build script to handle cross-compilation issues
// Particularly for mimalloc on GNU and musl targets

use std::env;

fn main() {
    let target = env::var("TARGET").unwrap_or_default();
    let target_env = env::var("CARGO_CFG_TARGET_ENV").unwrap_or_default();
    let target_arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=TARGET");

    // Register the custom cfg condition to avoid warnings
    println!("cargo:rustc-check-cfg=cfg(disable_mimalloc)");

    // Disable mimalloc for targets where it is known to misbehave
    let disable_mimalloc = target.contains("gnu")
        || target_env == "musl"
        || target_arch == "arm"
        || target.contains("i686")
        || target.contains("android")
        || target.contains("freebsd");

    if disable_mimalloc {
        println!("cargo:rustc-cfg=disable_mimalloc");
    }
}
