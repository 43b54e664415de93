//! Fuzz target for the IPC address record parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_address_record
//!
//! The record is read from a file any local process can write, so parsing
//! must reject garbage without panicking. Anything that parses must format
//! back to a record that parses to the same endpoint.

#![no_main]

use libfuzzer_sys::fuzz_target;
use quill_core::Endpoint;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(endpoint) = s.parse::<Endpoint>() {
            let reparsed: Endpoint = endpoint
                .to_string()
                .parse()
                .expect("formatted endpoint must parse");
            assert_eq!(endpoint, reparsed);
        }
    }
});
