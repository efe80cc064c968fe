use std::sync::Arc;

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadCore, AeadInPlace, KeyInit, OsRng};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use chacha20poly1305::ChaCha20Poly1305;
use log::{debug, warn};
use ring::hmac;
use ring::rand::SystemRandom;
use ring::signature::{
    self, EcdsaKeyPair, EcdsaSigningAlgorithm, Ed25519KeyPair, UnparsedPublicKey,
    VerificationAlgorithm,
};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::cbc;
use super::envelope::CipherEnvelope;
use crate::error::{KmsError, KmsResult};
use crate::key_management::{KeyLifecycle, ResolvedKey};
use crate::types::{Algorithm, KeyId};
use crate::utils::put_field;

/// Nonce length of every supported AEAD cipher
pub const AEAD_NONCE_SIZE: usize = 12;

/// Tag length of every supported AEAD cipher
pub const AEAD_TAG_SIZE: usize = 16;

/// OAEP overhead with SHA-256: two digests plus two bytes
const OAEP_SHA256_OVERHEAD: usize = 2 * 32 + 2;

/// Resolves keys through the lifecycle engine and runs cipher operations
#[derive(Debug, Clone)]
pub struct CipherEngine {
    keys: Arc<KeyLifecycle>,
}

impl CipherEngine {
    pub fn new(keys: Arc<KeyLifecycle>) -> Self {
        Self { keys }
    }

    /// Encrypt under the current version of an Active key.
    ///
    /// For signature and MAC keys this signs or tags the input instead.
    ///
    /// # Errors
    ///
    /// * `KeyNotActive` if the key is revoked
    /// * `InvalidParameter` if the plaintext exceeds the RSA-OAEP limit
    pub fn encrypt(&self, key_id: &KeyId, plaintext: &[u8]) -> KmsResult<CipherEnvelope> {
        let key = self.keys.resolve_for_encrypt(key_id)?;
        seal(&key, plaintext)
    }

    /// Decrypt under the exact key version named by the envelope.
    ///
    /// Works for revoked keys. Nothing is returned unless authentication
    /// succeeded.
    pub fn decrypt(&self, envelope: &CipherEnvelope) -> KmsResult<Vec<u8>> {
        let key = self
            .keys
            .resolve_for_decrypt(&envelope.key_id, envelope.key_version)?;
        open(&key, envelope)
    }

    /// Decrypt under the envelope's version and encrypt again under the
    /// key's current version
    pub fn reencrypt(&self, envelope: &CipherEnvelope) -> KmsResult<CipherEnvelope> {
        let plaintext = Zeroizing::new(self.decrypt(envelope)?);
        let fresh = self.encrypt(&envelope.key_id, &plaintext)?;
        debug!(
            "Re-encrypted envelope for key {} from version {} to {}",
            envelope.key_id, envelope.key_version, fresh.key_version
        );
        Ok(fresh)
    }
}

/// Produce an envelope under a resolved key version
pub fn seal(key: &ResolvedKey, plaintext: &[u8]) -> KmsResult<CipherEnvelope> {
    let mut envelope = CipherEnvelope::new(key.key_id, key.version, key.algorithm);
    let header = envelope.header_bytes();
    let secret = key.material.as_bytes();

    match key.algorithm {
        Algorithm::Aes128Gcm => aead_seal::<Aes128Gcm>(secret, &header, plaintext, &mut envelope)?,
        Algorithm::Aes256Gcm => aead_seal::<Aes256Gcm>(secret, &header, plaintext, &mut envelope)?,
        Algorithm::ChaCha20Poly1305 => {
            aead_seal::<ChaCha20Poly1305>(secret, &header, plaintext, &mut envelope)?
        }
        Algorithm::Aes256Cbc => {
            let sealed = cbc::seal(secret, &header, plaintext)?;
            envelope.nonce = Some(sealed.iv);
            envelope.ciphertext = sealed.ciphertext;
            envelope.authentication_tag = Some(sealed.mac);
        }
        Algorithm::Rsa2048 | Algorithm::Rsa4096 => {
            envelope.ciphertext = rsa_encrypt(key, &header, plaintext)?;
        }
        Algorithm::Ecc256 => {
            let message = signed_message(&header, plaintext);
            envelope.signature = Some(ecdsa_sign(
                &signature::ECDSA_P256_SHA256_ASN1_SIGNING,
                secret,
                &message,
            )?);
            envelope.ciphertext = plaintext.to_vec();
        }
        Algorithm::Ecc384 => {
            let message = signed_message(&header, plaintext);
            envelope.signature = Some(ecdsa_sign(
                &signature::ECDSA_P384_SHA384_ASN1_SIGNING,
                secret,
                &message,
            )?);
            envelope.ciphertext = plaintext.to_vec();
        }
        Algorithm::Ed25519 => {
            let key_pair = Ed25519KeyPair::from_pkcs8(secret)
                .map_err(|e| KmsError::backend("ed25519_sign", &e.to_string()))?;
            let message = signed_message(&header, plaintext);
            envelope.signature = Some(key_pair.sign(&message).as_ref().to_vec());
            envelope.ciphertext = plaintext.to_vec();
        }
        Algorithm::Hmac256 => {
            envelope.signature = Some(mac_sign(hmac::HMAC_SHA256, secret, &header, plaintext));
            envelope.ciphertext = plaintext.to_vec();
        }
        Algorithm::Hmac512 => {
            envelope.signature = Some(mac_sign(hmac::HMAC_SHA512, secret, &header, plaintext));
            envelope.ciphertext = plaintext.to_vec();
        }
    }

    Ok(envelope)
}

/// Reverse `seal`: decrypt, or verify a signature or MAC and return the message
///
/// # Errors
///
/// * `EnvelopeCorrupted` if the envelope names another key, version or
///   algorithm, or lacks the fields its algorithm needs
/// * `IntegrityFailure` if decryption does not authenticate
/// * `SignatureMismatch` if a signature or MAC does not verify
pub fn open(key: &ResolvedKey, envelope: &CipherEnvelope) -> KmsResult<Vec<u8>> {
    if envelope.algorithm != key.algorithm {
        warn!(
            "Envelope algorithm {} does not match key {} algorithm {}",
            envelope.algorithm, key.key_id, key.algorithm
        );
        return Err(KmsError::corrupted(&format!(
            "envelope declares {} but key uses {}",
            envelope.algorithm, key.algorithm
        )));
    }
    if envelope.key_id != key.key_id || envelope.key_version != key.version {
        return Err(KmsError::corrupted("envelope does not name the resolved key version"));
    }

    let header = envelope.header_bytes();
    let secret = key.material.as_bytes();

    let result = match key.algorithm {
        Algorithm::Aes128Gcm => aead_open::<Aes128Gcm>(secret, &header, envelope),
        Algorithm::Aes256Gcm => aead_open::<Aes256Gcm>(secret, &header, envelope),
        Algorithm::ChaCha20Poly1305 => aead_open::<ChaCha20Poly1305>(secret, &header, envelope),
        Algorithm::Aes256Cbc => {
            expect_fields(envelope, Some(cbc::IV_SIZE), Some(cbc::MAC_SIZE), false)?;
            cbc::open(
                secret,
                &header,
                envelope.nonce.as_deref().unwrap_or_default(),
                &envelope.ciphertext,
                envelope.authentication_tag.as_deref().unwrap_or_default(),
            )
            .map(|plaintext| plaintext.to_vec())
        }
        Algorithm::Rsa2048 | Algorithm::Rsa4096 => {
            expect_fields(envelope, None, None, false)?;
            rsa_decrypt(secret, &header, &envelope.ciphertext)
        }
        Algorithm::Ecc256 => verify_signature(
            &signature::ECDSA_P256_SHA256_ASN1,
            key,
            &header,
            envelope,
        ),
        Algorithm::Ecc384 => verify_signature(
            &signature::ECDSA_P384_SHA384_ASN1,
            key,
            &header,
            envelope,
        ),
        Algorithm::Ed25519 => verify_signature(&signature::ED25519, key, &header, envelope),
        Algorithm::Hmac256 => mac_verify(hmac::HMAC_SHA256, key, &header, envelope),
        Algorithm::Hmac512 => mac_verify(hmac::HMAC_SHA512, key, &header, envelope),
    };

    if let Err(e) = &result {
        if e.is_integrity_failure() {
            warn!(
                "Authentication failed for key {} version {}: {}",
                key.key_id,
                key.version,
                e.error_type()
            );
        }
    }
    result
}

/// Check which optional envelope fields are present and their lengths
fn expect_fields(
    envelope: &CipherEnvelope,
    nonce_len: Option<usize>,
    tag_len: Option<usize>,
    signature: bool,
) -> KmsResult<()> {
    check_field("nonce", envelope.nonce.as_deref(), nonce_len)?;
    check_field("authentication_tag", envelope.authentication_tag.as_deref(), tag_len)?;

    match (signature, envelope.signature.is_some()) {
        (true, false) => Err(KmsError::corrupted("missing signature")),
        (false, true) => Err(KmsError::corrupted("unexpected signature")),
        _ => Ok(()),
    }
}

fn check_field(name: &str, value: Option<&[u8]>, expected_len: Option<usize>) -> KmsResult<()> {
    match (value, expected_len) {
        (None, None) => Ok(()),
        (Some(v), Some(len)) if v.len() == len => Ok(()),
        (Some(v), Some(len)) => Err(KmsError::corrupted(&format!(
            "{} must be {} bytes, got {}",
            name,
            len,
            v.len()
        ))),
        (None, Some(_)) => Err(KmsError::corrupted(&format!("missing {}", name))),
        (Some(_), None) => Err(KmsError::corrupted(&format!("unexpected {}", name))),
    }
}

fn aead_seal<C: KeyInit + AeadCore + AeadInPlace>(
    key: &[u8],
    header: &[u8],
    plaintext: &[u8],
    envelope: &mut CipherEnvelope,
) -> KmsResult<()> {
    let cipher =
        C::new_from_slice(key).map_err(|_| KmsError::backend("aead_encrypt", "invalid key length"))?;
    let nonce = C::generate_nonce(&mut OsRng);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(&nonce, header, &mut buffer)
        .map_err(|_| KmsError::backend("aead_encrypt", "encryption failed"))?;

    envelope.nonce = Some(nonce.to_vec());
    envelope.ciphertext = buffer;
    envelope.authentication_tag = Some(tag.to_vec());
    Ok(())
}

fn aead_open<C: KeyInit + AeadInPlace>(
    key: &[u8],
    header: &[u8],
    envelope: &CipherEnvelope,
) -> KmsResult<Vec<u8>> {
    expect_fields(envelope, Some(AEAD_NONCE_SIZE), Some(AEAD_TAG_SIZE), false)?;
    let cipher =
        C::new_from_slice(key).map_err(|_| KmsError::backend("aead_decrypt", "invalid key length"))?;

    let nonce = envelope.nonce.as_deref().unwrap_or_default();
    let tag = envelope.authentication_tag.as_deref().unwrap_or_default();

    let mut buffer = envelope.ciphertext.clone();
    match cipher.decrypt_in_place_detached(
        GenericArray::from_slice(nonce),
        header,
        &mut buffer,
        GenericArray::from_slice(tag),
    ) {
        Ok(()) => Ok(buffer),
        Err(_) => Err(KmsError::integrity("AEAD authentication failed")),
    }
}

fn oaep(header: &[u8]) -> Oaep {
    Oaep::new_with_label::<Sha256, _>(hex::encode(header))
}

fn rsa_encrypt(key: &ResolvedKey, header: &[u8], plaintext: &[u8]) -> KmsResult<Vec<u8>> {
    let public_der = key
        .public_key
        .as_deref()
        .ok_or_else(|| KmsError::backend("rsa_encrypt", "key version has no public key"))?;
    let public_key = RsaPublicKey::from_public_key_der(public_der)
        .map_err(|e| KmsError::backend("rsa_encrypt", &e.to_string()))?;

    let limit = public_key.size().saturating_sub(OAEP_SHA256_OVERHEAD);
    if plaintext.len() > limit {
        return Err(KmsError::invalid_parameter(
            "plaintext",
            &format!("at most {} bytes for {}", limit, key.algorithm),
            &format!("{} bytes", plaintext.len()),
        ));
    }

    public_key
        .encrypt(&mut OsRng, oaep(header), plaintext)
        .map_err(|e| KmsError::backend("rsa_encrypt", &e.to_string()))
}

fn rsa_decrypt(secret: &[u8], header: &[u8], ciphertext: &[u8]) -> KmsResult<Vec<u8>> {
    let private_key = RsaPrivateKey::from_pkcs8_der(secret)
        .map_err(|e| KmsError::backend("rsa_decrypt", &e.to_string()))?;

    private_key
        .decrypt(oaep(header), ciphertext)
        .map_err(|_| KmsError::integrity("RSA-OAEP decryption failed"))
}

/// Message covered by signatures and MACs: header then payload
fn signed_message(header: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(header.len() + payload.len() + 8);
    put_field(&mut message, header);
    put_field(&mut message, payload);
    message
}

fn ecdsa_sign(
    algorithm: &'static EcdsaSigningAlgorithm,
    secret: &[u8],
    message: &[u8],
) -> KmsResult<Vec<u8>> {
    let rng = SystemRandom::new();
    let key_pair = EcdsaKeyPair::from_pkcs8(algorithm, secret, &rng)
        .map_err(|e| KmsError::backend("ecdsa_sign", &e.to_string()))?;
    let signature = key_pair
        .sign(&rng, message)
        .map_err(|_| KmsError::backend("ecdsa_sign", "signing failed"))?;
    Ok(signature.as_ref().to_vec())
}

fn verify_signature(
    algorithm: &'static dyn VerificationAlgorithm,
    key: &ResolvedKey,
    header: &[u8],
    envelope: &CipherEnvelope,
) -> KmsResult<Vec<u8>> {
    expect_fields(envelope, None, None, true)?;
    let public_key = key
        .public_key
        .as_deref()
        .ok_or_else(|| KmsError::backend("verify", "key version has no public key"))?;
    let signature = envelope.signature.as_deref().unwrap_or_default();

    UnparsedPublicKey::new(algorithm, public_key)
        .verify(&signed_message(header, &envelope.ciphertext), signature)
        .map_err(|_| KmsError::SignatureMismatch {
            key_id: key.key_id.to_string(),
        })?;
    Ok(envelope.ciphertext.clone())
}

fn mac_sign(algorithm: hmac::Algorithm, secret: &[u8], header: &[u8], payload: &[u8]) -> Vec<u8> {
    let mac_key = hmac::Key::new(algorithm, secret);
    hmac::sign(&mac_key, &signed_message(header, payload))
        .as_ref()
        .to_vec()
}

fn mac_verify(
    algorithm: hmac::Algorithm,
    key: &ResolvedKey,
    header: &[u8],
    envelope: &CipherEnvelope,
) -> KmsResult<Vec<u8>> {
    expect_fields(envelope, None, None, true)?;
    let mac_key = hmac::Key::new(algorithm, key.material.as_bytes());
    let tag = envelope.signature.as_deref().unwrap_or_default();

    hmac::verify(&mac_key, &signed_message(header, &envelope.ciphertext), tag).map_err(|_| {
        KmsError::SignatureMismatch {
            key_id: key.key_id.to_string(),
        }
    })?;
    Ok(envelope.ciphertext.clone())
}
