//! Fuzz target for plugin manifests.
//!
//! Run with: cargo +nightly fuzz run fuzz_plugin_manifest

#![no_main]

use libfuzzer_sys::fuzz_target;
use quill_core::plugin::PluginManifest;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = PluginManifest::parse(s);
    }
});
