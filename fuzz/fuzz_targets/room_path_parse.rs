//! Fuzz target for RoomPath::parse
//!
//! Parsing never panics, and every accepted path displays back to exactly
//! the input token.

#![no_main]

use libfuzzer_sys::fuzz_target;
use parley_proto::RoomPath;

fuzz_target!(|token: &str| {
    if let Ok(path) = RoomPath::parse(token) {
        assert_eq!(path.to_string(), token);
        assert!(path.group().starts_with('#'));
        assert!(!path.room().is_empty());
    }
});
