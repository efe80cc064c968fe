use std::sync::Arc;

use proptest::prelude::*;

use super::*;
use crate::error::KmsError;
use crate::key_management::{KeyLifecycle, ResolvedKey};
use crate::keygen;
use crate::storage::MemoryStore;
use crate::types::{Algorithm, KeyId};
use crate::wrapping::MasterKey;

fn engine() -> (CipherEngine, Arc<KeyLifecycle>) {
    let keys = Arc::new(KeyLifecycle::new(
        MasterKey::new(&[0x33; 32]).unwrap(),
        Arc::new(MemoryStore::new()),
        1,
    ));
    (CipherEngine::new(keys.clone()), keys)
}

fn resolved(algorithm: Algorithm) -> ResolvedKey {
    let material = keygen::generate(algorithm).unwrap();
    ResolvedKey {
        key_id: KeyId::generate(),
        algorithm,
        version: 1,
        material: material.secret,
        public_key: material.public_key,
    }
}

const FAST_ALGORITHMS: [Algorithm; 10] = [
    Algorithm::Aes128Gcm,
    Algorithm::Aes256Gcm,
    Algorithm::Aes256Cbc,
    Algorithm::ChaCha20Poly1305,
    Algorithm::Rsa2048,
    Algorithm::Ecc256,
    Algorithm::Ecc384,
    Algorithm::Ed25519,
    Algorithm::Hmac256,
    Algorithm::Hmac512,
];

#[test]
fn test_roundtrip_every_algorithm() {
    let (engine, keys) = engine();
    for algorithm in FAST_ALGORITHMS {
        let record = keys.create(algorithm.as_str(), algorithm, "tester").unwrap();
        for message in [&b""[..], b"hello", &[0xAB; 150][..]] {
            let envelope = engine.encrypt(&record.id, message).unwrap();
            assert_eq!(envelope.algorithm, algorithm);
            assert_eq!(envelope.key_version, 1);
            assert_eq!(engine.decrypt(&envelope).unwrap(), message, "{}", algorithm);
        }
    }
}

#[test]
#[ignore = "RSA-4096 key generation is slow"]
fn test_roundtrip_rsa4096() {
    let (engine, keys) = engine();
    let record = keys.create("big-rsa", Algorithm::Rsa4096, "tester").unwrap();
    let message = vec![0x42; 446];
    let envelope = engine.encrypt(&record.id, &message).unwrap();
    assert_eq!(engine.decrypt(&envelope).unwrap(), message);
}

#[test]
fn test_envelope_fields_per_family() {
    let aead = seal(&resolved(Algorithm::Aes256Gcm), b"data").unwrap();
    assert_eq!(aead.nonce.as_ref().unwrap().len(), AEAD_NONCE_SIZE);
    assert_eq!(aead.authentication_tag.as_ref().unwrap().len(), AEAD_TAG_SIZE);
    assert!(aead.signature.is_none());
    assert_ne!(aead.ciphertext, b"data");

    let cbc = seal(&resolved(Algorithm::Aes256Cbc), b"data").unwrap();
    assert_eq!(cbc.nonce.as_ref().unwrap().len(), 16);
    assert_eq!(cbc.ciphertext.len(), 16);
    assert_eq!(cbc.authentication_tag.as_ref().unwrap().len(), 32);

    let rsa = seal(&resolved(Algorithm::Rsa2048), b"data").unwrap();
    assert_eq!(rsa.ciphertext.len(), 256);
    assert!(rsa.nonce.is_none() && rsa.authentication_tag.is_none());

    let signed = seal(&resolved(Algorithm::Ed25519), b"data").unwrap();
    assert_eq!(signed.ciphertext, b"data");
    assert_eq!(signed.signature.as_ref().unwrap().len(), 64);

    let mac = seal(&resolved(Algorithm::Hmac512), b"data").unwrap();
    assert_eq!(mac.signature.as_ref().unwrap().len(), 64);
}

#[test]
fn test_cbc_layer_padding_and_key_checks() {
    let key = [0x5a; 32];
    let sealed = super::cbc::seal(&key, b"header", &[1u8; 32]).unwrap();
    // Block-aligned input still gains a full padding block
    assert_eq!(sealed.ciphertext.len(), 48);

    let opened =
        super::cbc::open(&key, b"header", &sealed.iv, &sealed.ciphertext, &sealed.mac).unwrap();
    assert_eq!(opened.as_slice(), &[1u8; 32][..]);

    assert!(matches!(
        super::cbc::open(&key, b"other", &sealed.iv, &sealed.ciphertext, &sealed.mac),
        Err(KmsError::IntegrityFailure { .. })
    ));
    assert!(matches!(
        super::cbc::seal(&key[..16], b"header", b"short key"),
        Err(KmsError::CryptoBackend { .. })
    ));
}

#[test]
fn test_hmac_is_deterministic() {
    let key = resolved(Algorithm::Hmac256);
    let a = seal(&key, b"same input").unwrap();
    let b = seal(&key, b"same input").unwrap();
    assert_eq!(a.signature, b.signature);
}

#[test]
fn test_aead_nonce_fresh_per_encryption() {
    let key = resolved(Algorithm::ChaCha20Poly1305);
    let a = seal(&key, b"same input").unwrap();
    let b = seal(&key, b"same input").unwrap();
    assert_ne!(a.nonce, b.nonce);
    assert_ne!(a.ciphertext, b.ciphertext);
}

#[test]
fn test_tampered_ciphertext_is_integrity_failure() {
    for algorithm in [
        Algorithm::Aes128Gcm,
        Algorithm::Aes256Gcm,
        Algorithm::ChaCha20Poly1305,
        Algorithm::Aes256Cbc,
        Algorithm::Rsa2048,
    ] {
        let key = resolved(algorithm);
        let mut envelope = seal(&key, b"attack at dawn").unwrap();
        envelope.ciphertext[0] ^= 0x01;

        let err = open(&key, &envelope).unwrap_err();
        assert!(matches!(err, KmsError::IntegrityFailure { .. }), "{}", algorithm);
    }
}

#[test]
fn test_tampered_tag_is_integrity_failure() {
    for algorithm in [Algorithm::Aes256Gcm, Algorithm::Aes256Cbc] {
        let key = resolved(algorithm);
        let mut envelope = seal(&key, b"attack at dawn").unwrap();
        envelope.authentication_tag.as_mut().unwrap()[5] ^= 0x80;

        assert!(matches!(
            open(&key, &envelope),
            Err(KmsError::IntegrityFailure { .. })
        ));
    }
}

#[test]
fn test_altered_signed_message_is_signature_mismatch() {
    for algorithm in [
        Algorithm::Ecc256,
        Algorithm::Ecc384,
        Algorithm::Ed25519,
        Algorithm::Hmac256,
        Algorithm::Hmac512,
    ] {
        let key = resolved(algorithm);
        let mut envelope = seal(&key, b"pay 10").unwrap();
        envelope.ciphertext = b"pay 99".to_vec();

        let err = open(&key, &envelope).unwrap_err();
        assert!(matches!(err, KmsError::SignatureMismatch { .. }), "{}", algorithm);

        let mut envelope = seal(&key, b"pay 10").unwrap();
        envelope.signature.as_mut().unwrap()[0] ^= 0x01;
        assert!(matches!(
            open(&key, &envelope),
            Err(KmsError::SignatureMismatch { .. })
        ));
    }
}

#[test]
fn test_algorithm_mismatch_is_corrupted() {
    let key = resolved(Algorithm::Aes256Gcm);
    let mut envelope = seal(&key, b"data").unwrap();
    envelope.algorithm = Algorithm::ChaCha20Poly1305;

    assert!(matches!(
        open(&key, &envelope),
        Err(KmsError::EnvelopeCorrupted { .. })
    ));
}

#[test]
fn test_algorithm_mismatch_through_engine() {
    let (engine, keys) = engine();
    let record = keys.create("gcm", Algorithm::Aes256Gcm, "tester").unwrap();
    let mut envelope = engine.encrypt(&record.id, b"data").unwrap();
    envelope.algorithm = Algorithm::Aes128Gcm;

    assert!(matches!(
        engine.decrypt(&envelope),
        Err(KmsError::EnvelopeCorrupted { .. })
    ));
}

#[test]
fn test_missing_or_malformed_fields_are_corrupted() {
    let key = resolved(Algorithm::Aes256Gcm);
    let envelope = seal(&key, b"data").unwrap();

    let mut missing_nonce = envelope.clone();
    missing_nonce.nonce = None;
    assert!(matches!(open(&key, &missing_nonce), Err(KmsError::EnvelopeCorrupted { .. })));

    let mut short_nonce = envelope.clone();
    short_nonce.nonce = Some(vec![0; 8]);
    assert!(matches!(open(&key, &short_nonce), Err(KmsError::EnvelopeCorrupted { .. })));

    let mut missing_tag = envelope.clone();
    missing_tag.authentication_tag = None;
    assert!(matches!(open(&key, &missing_tag), Err(KmsError::EnvelopeCorrupted { .. })));

    let mut stray_signature = envelope;
    stray_signature.signature = Some(vec![1, 2, 3]);
    assert!(matches!(open(&key, &stray_signature), Err(KmsError::EnvelopeCorrupted { .. })));

    let mac_key = resolved(Algorithm::Hmac256);
    let mut unsigned = seal(&mac_key, b"data").unwrap();
    unsigned.signature = None;
    assert!(matches!(open(&mac_key, &unsigned), Err(KmsError::EnvelopeCorrupted { .. })));
}

#[test]
fn test_header_is_authenticated() {
    let (engine, keys) = engine();
    let record = keys.create("bound", Algorithm::Aes256Gcm, "tester").unwrap();
    keys.rotate(&record.id).unwrap();

    // Claim version 1 for a version 2 ciphertext
    let mut envelope = engine.encrypt(&record.id, b"data").unwrap();
    assert_eq!(envelope.key_version, 2);
    envelope.key_version = 1;
    assert!(matches!(
        engine.decrypt(&envelope),
        Err(KmsError::IntegrityFailure { .. })
    ));

    envelope.key_version = 7;
    assert!(matches!(
        engine.decrypt(&envelope),
        Err(KmsError::VersionNotFound { .. })
    ));
}

#[test]
fn test_rsa_plaintext_limit() {
    let key = resolved(Algorithm::Rsa2048);
    assert!(seal(&key, &[0u8; 190]).is_ok());

    let err = seal(&key, &[0u8; 191]).unwrap_err();
    assert!(matches!(err, KmsError::InvalidParameter { .. }));
}

#[test]
fn test_reencrypt_moves_to_current_version() {
    let (engine, keys) = engine();
    let record = keys.create("migrate", Algorithm::Aes256Cbc, "tester").unwrap();
    let old = engine.encrypt(&record.id, b"legacy data").unwrap();

    keys.rotate(&record.id).unwrap();
    let fresh = engine.reencrypt(&old).unwrap();

    assert_eq!(fresh.key_version, 2);
    assert_eq!(engine.decrypt(&fresh).unwrap(), b"legacy data");
    assert_eq!(engine.decrypt(&old).unwrap(), b"legacy data");
}

#[test]
fn test_reencrypt_requires_active_key() {
    let (engine, keys) = engine();
    let record = keys.create("frozen", Algorithm::Aes256Gcm, "tester").unwrap();
    let old = engine.encrypt(&record.id, b"data").unwrap();
    keys.revoke(&record.id).unwrap();

    assert!(matches!(
        engine.reencrypt(&old),
        Err(KmsError::KeyNotActive { .. })
    ));
}

#[test]
fn test_envelope_json_omits_absent_fields() {
    let envelope = seal(&resolved(Algorithm::Hmac256), b"data").unwrap();
    let json = envelope.to_json().unwrap();

    assert!(json.contains("\"algorithm\":\"HMAC256\""));
    assert!(json.contains("\"key_version\":1"));
    assert!(!json.contains("nonce"));
    assert!(!json.contains("authentication_tag"));
    assert!(json.contains("\"signature\""));

    assert_eq!(CipherEnvelope::from_json(&json).unwrap(), envelope);
}

#[test]
fn test_envelope_base64_transport() {
    let key = resolved(Algorithm::Aes256Gcm);
    let envelope = seal(&key, b"transport me").unwrap();

    let encoded = envelope.to_base64().unwrap();
    let decoded = CipherEnvelope::from_base64(&encoded).unwrap();
    assert_eq!(open(&key, &decoded).unwrap(), b"transport me");
}

#[test]
fn test_garbage_envelope_is_corrupted() {
    for input in ["", "{}", "not json", r#"{"key_id":"x","key_version":1}"#] {
        assert!(matches!(
            CipherEnvelope::from_json(input),
            Err(KmsError::EnvelopeCorrupted { .. })
        ));
    }
    assert!(matches!(
        CipherEnvelope::from_base64("@@@"),
        Err(KmsError::EnvelopeCorrupted { .. })
    ));

    let unknown_algorithm = r#"{"key_id":"6f1c2a5e-8d7b-4c3a-9e2f-1a2b3c4d5e6f","key_version":1,"algorithm":"DES","ciphertext":""}"#;
    assert!(matches!(
        CipherEnvelope::from_json(unknown_algorithm),
        Err(KmsError::EnvelopeCorrupted { .. })
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_symmetric_roundtrip(
        algorithm in prop::sample::select(vec![
            Algorithm::Aes128Gcm,
            Algorithm::Aes256Gcm,
            Algorithm::Aes256Cbc,
            Algorithm::ChaCha20Poly1305,
            Algorithm::Hmac256,
            Algorithm::Hmac512,
        ]),
        message in prop::collection::vec(any::<u8>(), 0..512),
    ) {
        let key = resolved(algorithm);
        let envelope = seal(&key, &message).unwrap();
        prop_assert_eq!(open(&key, &envelope).unwrap(), message);
    }

    #[test]
    fn prop_cbc_any_length_pads_to_block(len in 0usize..100) {
        let key = resolved(Algorithm::Aes256Cbc);
        let envelope = seal(&key, &vec![7u8; len]).unwrap();
        prop_assert_eq!(envelope.ciphertext.len(), (len / 16 + 1) * 16);
    }
}
