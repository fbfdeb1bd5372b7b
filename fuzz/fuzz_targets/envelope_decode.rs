//! Fuzz target for Envelope::decode and Response::decode
//!
//! Arbitrary bytes must never panic the decoders. A decoded envelope always
//! has a positive timestamp and re-encodes to something that decodes to the
//! same envelope.

#![no_main]

use libfuzzer_sys::fuzz_target;
use parley_proto::{Envelope, Response};

fuzz_target!(|data: &[u8]| {
    if let Ok(envelope) = Envelope::decode(data) {
        assert!(envelope.time > 0);
        let _ = envelope.action();

        let encoded = envelope.encode().unwrap();
        assert_eq!(Envelope::decode(encoded.as_bytes()).unwrap(), envelope);
    }

    let _ = Response::decode(data);
});
