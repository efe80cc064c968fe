use std::collections::HashSet;

use super::*;
use crate::config::EngineConfig;
use crate::error::KmsError;

fn master() -> MasterKey {
    MasterKey::new(&[0x42; 32]).unwrap()
}

#[test]
fn test_wrap_unwrap_roundtrip() {
    let master = master();
    let material = b"0123456789abcdef0123456789abcdef";

    let wrapped = master.wrap(material, None).unwrap();
    assert_eq!(wrapped.nonce.len(), WRAP_NONCE_SIZE);
    assert_eq!(wrapped.tag.len(), WRAP_TAG_SIZE);
    assert_ne!(wrapped.ciphertext.as_slice(), &material[..]);

    let unwrapped = master.unwrap(&wrapped, None).unwrap();
    assert_eq!(unwrapped.as_bytes(), material);
}

#[test]
fn test_arbitrary_length_material() {
    let master = master();
    for len in [0usize, 1, 16, 64, 1218] {
        let material = vec![0x5A; len];
        let wrapped = master.wrap(&material, Some(b"ctx")).unwrap();
        assert_eq!(master.unwrap(&wrapped, Some(b"ctx")).unwrap().as_bytes(), &material[..]);
    }
}

#[test]
fn test_nonce_never_reused() {
    let master = master();
    let mut seen = HashSet::new();
    for _ in 0..10_000 {
        let wrapped = master.wrap(b"k", None).unwrap();
        assert!(seen.insert(wrapped.nonce), "nonce reused");
    }
}

#[test]
fn test_flipped_tag_bit_fails() {
    let master = master();
    let mut wrapped = master.wrap(b"secret key material", None).unwrap();
    wrapped.tag[0] ^= 0x01;

    let err = master.unwrap(&wrapped, None).unwrap_err();
    assert!(matches!(err, KmsError::IntegrityFailure { .. }));
}

#[test]
fn test_flipped_ciphertext_bit_fails() {
    let master = master();
    let mut wrapped = master.wrap(b"secret key material", None).unwrap();
    wrapped.ciphertext[3] ^= 0x80;

    assert!(master.unwrap(&wrapped, None).unwrap_err().is_integrity_failure());
}

#[test]
fn test_context_is_bound() {
    let master = master();
    let wrapped = master.wrap(b"material", Some(b"key-a:v1")).unwrap();

    let err = master.unwrap(&wrapped, Some(b"key-a:v2")).unwrap_err();
    assert!(matches!(err, KmsError::IntegrityFailure { .. }));
    assert!(master.unwrap(&wrapped, None).is_err());
}

#[test]
fn test_different_master_key_fails() {
    let wrapped = master().wrap(b"material", None).unwrap();
    let other = MasterKey::new(&[0x43; 32]).unwrap();

    assert!(matches!(
        other.unwrap(&wrapped, None),
        Err(KmsError::IntegrityFailure { .. })
    ));
}

#[test]
fn test_malformed_blob_is_integrity_failure() {
    let master = master();
    let mut wrapped = master.wrap(b"material", None).unwrap();
    wrapped.nonce.truncate(8);

    assert!(matches!(
        master.unwrap(&wrapped, None),
        Err(KmsError::IntegrityFailure { .. })
    ));
}

#[test]
fn test_rejects_wrong_key_length() {
    assert!(matches!(
        MasterKey::new(&[0u8; 16]),
        Err(KmsError::Configuration(_))
    ));
}

#[test]
fn test_from_config_uses_master_secret() {
    let config = EngineConfig::new(&[0x42; 40], &[0x17; 32]).unwrap();
    let from_config = MasterKey::from_config(&config).unwrap();

    let wrapped = master().wrap(b"material", None).unwrap();
    assert!(from_config.unwrap(&wrapped, None).is_ok());
}

#[test]
fn test_wrapped_key_serializes_as_base64() {
    let wrapped = master().wrap(b"material", None).unwrap();
    let json = serde_json::to_value(&wrapped).unwrap();

    assert!(json["nonce"].is_string());
    assert!(json["ciphertext"].is_string());
    assert!(json["tag"].is_string());

    let parsed: WrappedKey = serde_json::from_value(json).unwrap();
    assert_eq!(parsed, wrapped);
}

#[test]
fn test_debug_does_not_expose_key() {
    let printed = format!("{:?}", master());
    assert!(printed.contains("AES-256-GCM"));
    assert!(!printed.contains("66"));
}
