#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use kms_core::prelude::*;

#[derive(Arbitrary, Debug)]
struct DecryptFuzzInput {
    algorithm: u8,
    flip_field: u8,
    flip_index: usize,
    flip_mask: u8,
    plaintext: Vec<u8>,
}

const ALGORITHMS: [&str; 6] = [
    "AES128GCM",
    "AES256GCM",
    "AES256CBC",
    "ChaCha20Poly1305",
    "HMAC256",
    "Ed25519",
];

fuzz_target!(|input: DecryptFuzzInput| {
    let config = EngineConfig::new(&[0x01; 32], &[0x02; 32]).unwrap();
    let kms = Kms::in_memory(config).unwrap();
    let ctx = OperationContext::new("fuzz");
    let algorithm = ALGORITHMS[input.algorithm as usize % ALGORITHMS.len()];
    let key = kms.create_key(&ctx, "fuzz", algorithm).unwrap();

    let mut envelope = kms.encrypt(&ctx, &key.id, &input.plaintext).unwrap();
    let mask = input.flip_mask | 1;
    let field = match input.flip_field % 4 {
        0 => Some(&mut envelope.ciphertext),
        1 => envelope.nonce.as_mut(),
        2 => envelope.authentication_tag.as_mut(),
        _ => envelope.signature.as_mut(),
    };

    // Any single-bit-pattern change must be detected
    if let Some(bytes) = field.filter(|b| !b.is_empty()) {
        let index = input.flip_index % bytes.len();
        bytes[index] ^= mask;
        assert!(kms.decrypt(&ctx, &envelope).is_err());
    }
});
