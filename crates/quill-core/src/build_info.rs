//! Build metadata embedded by `build.rs`, shown by `--version` and logged on
//! start-up.

pub const GIT_HASH: &str = env!("QUILL_GIT_HASH");

/// Unix timestamp of the build.
pub const BUILD_TIMESTAMP: &str = env!("QUILL_BUILD_TIMESTAMP");

/// `debug` or `release`.
pub const BUILD_PROFILE: &str = env!("QUILL_BUILD_PROFILE");

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version with commit and profile, e.g. `0.1.0 (abc1234, debug)`.
pub fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH}, {BUILD_PROFILE})")
}

/// The running platform, e.g. `linux-x86_64`.
pub fn platform() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}
