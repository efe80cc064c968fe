use rand::rngs::OsRng;
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, EcdsaSigningAlgorithm, Ed25519KeyPair, KeyPair, ECDSA_P256_SHA256_ASN1_SIGNING,
    ECDSA_P384_SHA384_ASN1_SIGNING,
};
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::error::{KmsError, KmsResult};
use crate::secure_memory::SecureBytes;
use crate::types::Algorithm;
use crate::utils;

/// Public exponent used for every RSA key
pub const RSA_PUBLIC_EXPONENT: u64 = 65537;

/// Freshly generated key material for one key version
#[derive(Debug, Clone)]
pub struct KeyMaterial {
    /// Raw symmetric key, or the PKCS#8 DER private key for asymmetric algorithms
    pub secret: SecureBytes,
    /// Public half of an asymmetric key pair
    ///
    /// SPKI DER for RSA, the uncompressed point for ECDSA, raw 32 bytes for Ed25519
    pub public_key: Option<Vec<u8>>,
}

/// Generate key material for the given algorithm.
///
/// # Arguments
///
/// * `algorithm` - The algorithm the material will be used with
///
/// # Returns
///
/// The secret material (and public key for asymmetric algorithms)
///
/// # Errors
///
/// Returns `KmsError::CryptoBackend` if the underlying library fails to
/// generate a key pair
pub fn generate(algorithm: Algorithm) -> KmsResult<KeyMaterial> {
    match algorithm {
        Algorithm::Aes128Gcm
        | Algorithm::Aes256Gcm
        | Algorithm::Aes256Cbc
        | Algorithm::ChaCha20Poly1305
        | Algorithm::Hmac256
        | Algorithm::Hmac512 => {
            let len = algorithm
                .symmetric_key_len()
                .ok_or_else(|| KmsError::backend("generate", "missing symmetric key length"))?;
            Ok(KeyMaterial {
                secret: SecureBytes::from(utils::random_bytes(len)),
                public_key: None,
            })
        }
        Algorithm::Rsa2048 => generate_rsa(2048),
        Algorithm::Rsa4096 => generate_rsa(4096),
        Algorithm::Ecc256 => generate_ecdsa(&ECDSA_P256_SHA256_ASN1_SIGNING),
        Algorithm::Ecc384 => generate_ecdsa(&ECDSA_P384_SHA384_ASN1_SIGNING),
        Algorithm::Ed25519 => generate_ed25519(),
    }
}

/// Generate key material from an algorithm tag string.
///
/// Fails with `UnsupportedAlgorithm` for tags outside the closed set.
pub fn generate_for_tag(tag: &str) -> KmsResult<KeyMaterial> {
    generate(tag.parse()?)
}

fn generate_rsa(bits: usize) -> KmsResult<KeyMaterial> {
    let exponent = rsa::BigUint::from(RSA_PUBLIC_EXPONENT);
    let private_key = RsaPrivateKey::new_with_exp(&mut OsRng, bits, &exponent)
        .map_err(|e| KmsError::backend("rsa_keygen", &e.to_string()))?;
    let public_key = RsaPublicKey::from(&private_key);

    let private_der = private_key
        .to_pkcs8_der()
        .map_err(|e| KmsError::backend("rsa_encode_private", &e.to_string()))?;
    let public_der = public_key
        .to_public_key_der()
        .map_err(|e| KmsError::backend("rsa_encode_public", &e.to_string()))?;

    Ok(KeyMaterial {
        secret: SecureBytes::new(private_der.as_bytes()),
        public_key: Some(public_der.as_bytes().to_vec()),
    })
}

fn generate_ecdsa(signing: &'static EcdsaSigningAlgorithm) -> KmsResult<KeyMaterial> {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(signing, &rng)
        .map_err(|_| KmsError::backend("ecdsa_keygen", "key pair generation failed"))?;
    let key_pair = EcdsaKeyPair::from_pkcs8(signing, pkcs8.as_ref(), &rng)
        .map_err(|e| KmsError::backend("ecdsa_keygen", &e.to_string()))?;

    Ok(KeyMaterial {
        secret: SecureBytes::new(pkcs8.as_ref()),
        public_key: Some(key_pair.public_key().as_ref().to_vec()),
    })
}

fn generate_ed25519() -> KmsResult<KeyMaterial> {
    let rng = SystemRandom::new();
    let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
        .map_err(|_| KmsError::backend("ed25519_keygen", "key pair generation failed"))?;
    let key_pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
        .map_err(|e| KmsError::backend("ed25519_keygen", &e.to_string()))?;

    Ok(KeyMaterial {
        secret: SecureBytes::new(pkcs8.as_ref()),
        public_key: Some(key_pair.public_key().as_ref().to_vec()),
    })
}
