/*!
 * Key Material Generator
 *
 * Produces raw key bytes for symmetric and MAC algorithms and full key
 * pairs for RSA, ECDSA and Ed25519. All randomness comes from the OS
 * CSPRNG.
 */

mod generator;

pub use generator::*;
