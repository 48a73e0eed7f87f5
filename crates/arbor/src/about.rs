//! Build metadata.

/// Keys understood by [`about`].
pub const KEYS: [&str; 7] = ["version", "library", "type", "debug", "authors", "copyright", "revision"];

/// Look up a piece of library metadata; `None` for unknown keys.
pub fn about(key: &str) -> Option<&'static str> {
    let value = match key {
        "version" => env!("CARGO_PKG_VERSION"),
        "library" => env!("CARGO_PKG_NAME"),
        "type" => "static",
        "debug" => {
            if cfg!(debug_assertions) {
                "debug"
            } else {
                "release"
            }
        }
        "authors" => env!("CARGO_PKG_AUTHORS"),
        "copyright" => concat!("Copyright (c) the ", env!("CARGO_PKG_NAME"), " developers, MIT licensed"),
        "revision" => option_env!("ARBOR_REVISION").unwrap_or("unknown"),
        _ => return None,
    };
    Some(value)
}

/// `(major, minor, patch)` of this build.
pub fn version() -> (u32, u32, u32) {
    let part = |s: &str| -> u32 { s.parse().unwrap_or(0) };
    (
        part(env!("CARGO_PKG_VERSION_MAJOR")),
        part(env!("CARGO_PKG_VERSION_MINOR")),
        part(env!("CARGO_PKG_VERSION_PATCH")),
    )
}
