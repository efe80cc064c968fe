/*!
 * Master Wrapping Unit
 *
 * Envelope-encryption root: every piece of raw key material is sealed with
 * AES-256-GCM under the operator-supplied master secret before it reaches
 * storage. Each wrap draws a fresh random nonce, and an optional context
 * string is bound as associated data so a wrapped blob only opens for the
 * record and version it was produced for.
 */

mod master;

pub use master::*;

#[cfg(test)]
mod tests;
