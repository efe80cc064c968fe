use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hkdf::Hkdf;
use ring::hmac;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{KmsError, KmsResult};
use crate::utils::{self, put_field};

pub const BLOCK_SIZE: usize = 16;
pub const IV_SIZE: usize = 16;
pub const MAC_SIZE: usize = 32;

const ENC_INFO: &[u8] = b"kms:aes256cbc:enc";
const MAC_INFO: &[u8] = b"kms:aes256cbc:mac";

/// Output of one CBC encryption
pub(crate) struct CbcSealed {
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub mac: Vec<u8>,
}

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

struct Subkeys {
    enc: Zeroizing<[u8; 32]>,
    mac: hmac::Key,
}

fn subkeys(key: &[u8]) -> KmsResult<Subkeys> {
    if key.len() != 32 {
        return Err(KmsError::backend("aes256cbc", "key must be 32 bytes"));
    }

    let hkdf = Hkdf::<Sha256>::new(None, key);
    let mut enc_key = Zeroizing::new([0u8; 32]);
    let mut mac_key = Zeroizing::new([0u8; 32]);
    hkdf.expand(ENC_INFO, &mut enc_key[..])
        .map_err(|_| KmsError::backend("aes256cbc", "HKDF expansion failed"))?;
    hkdf.expand(MAC_INFO, &mut mac_key[..])
        .map_err(|_| KmsError::backend("aes256cbc", "HKDF expansion failed"))?;

    Ok(Subkeys {
        enc: enc_key,
        mac: hmac::Key::new(hmac::HMAC_SHA256, &mac_key[..]),
    })
}

fn mac_input(header: &[u8], iv: &[u8], ciphertext: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(header.len() + iv.len() + ciphertext.len() + 12);
    put_field(&mut data, header);
    put_field(&mut data, iv);
    put_field(&mut data, ciphertext);
    data
}

/// AES-256-CBC with PKCS#7 padding, then HMAC-SHA256 over header, IV and ciphertext
pub(crate) fn seal(key: &[u8], header: &[u8], plaintext: &[u8]) -> KmsResult<CbcSealed> {
    let keys = subkeys(key)?;
    let iv = utils::random_bytes(IV_SIZE);

    let buffer = Aes256CbcEnc::new_from_slices(&keys.enc[..], &iv)
        .map_err(|_| KmsError::backend("aes256cbc", "invalid key or IV length"))?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mac = hmac::sign(&keys.mac, &mac_input(header, &iv, &buffer));
    Ok(CbcSealed {
        iv,
        ciphertext: buffer,
        mac: mac.as_ref().to_vec(),
    })
}

/// Verify the MAC, then decrypt and strip padding
pub(crate) fn open(
    key: &[u8],
    header: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    mac: &[u8],
) -> KmsResult<Zeroizing<Vec<u8>>> {
    let keys = subkeys(key)?;

    hmac::verify(&keys.mac, &mac_input(header, iv, ciphertext), mac)
        .map_err(|_| KmsError::integrity("AES-CBC MAC verification failed"))?;

    if iv.len() != IV_SIZE || ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(KmsError::integrity("AES-CBC ciphertext has invalid length"));
    }

    let plaintext = Aes256CbcDec::new_from_slices(&keys.enc[..], iv)
        .map_err(|_| KmsError::integrity("AES-CBC IV has invalid length"))?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| KmsError::integrity("AES-CBC padding is invalid"))?;
    Ok(Zeroizing::new(plaintext))
}
