#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use kms_core::wrapping::{MasterKey, WrappedKey};

#[derive(Arbitrary, Debug)]
struct UnwrapFuzzInput {
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
    tag: Vec<u8>,
    context: Option<Vec<u8>>,
}

fuzz_target!(|input: UnwrapFuzzInput| {
    let master = MasterKey::new(&[0x42; 32]).unwrap();
    let wrapped = WrappedKey {
        nonce: input.nonce,
        ciphertext: input.ciphertext,
        tag: input.tag,
    };

    // Forged blobs must be rejected, never unwrapped
    assert!(master.unwrap(&wrapped, input.context.as_deref()).is_err());
});
