/*!
 * Cipher Operation Engine
 *
 * Turns a resolved key version into a self-describing `CipherEnvelope` and
 * back. The envelope names the key id, the exact key version and the
 * algorithm, so it can be decrypted after any number of later rotations.
 *
 * The envelope header is authenticated on every path: as associated data
 * for the AEAD ciphers, inside the MAC for AES-CBC, as the OAEP label for
 * RSA, and inside the signed message for signature and MAC keys.
 */

mod cbc;
mod engine;
mod envelope;

pub use engine::*;
pub use envelope::*;

#[cfg(test)]
mod tests;
