#![no_main]

use libfuzzer_sys::fuzz_target;
use kms_core::CipherEnvelope;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        // Parsing must never panic, and a parsed envelope must re-encode
        if let Ok(envelope) = CipherEnvelope::from_json(text) {
            let _ = envelope.header_bytes();
            let json = envelope.to_json().unwrap();
            assert_eq!(CipherEnvelope::from_json(&json).unwrap(), envelope);
        }
        let _ = CipherEnvelope::from_base64(text);
    }
});
