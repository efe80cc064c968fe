/*!
 * Key Lifecycle Engine
 *
 * Owns the per-key state machine (Active to Revoked, plus terminal deletion)
 * and the append-only version history of every logical key. Raw material
 * is generated by `keygen`, sealed by `wrapping`, and persisted through a
 * `KeyStore`.
 *
 * Mutations on one key are serialized by a per-key lock and guarded by an
 * optimistic revision check at the store; operations on different keys do
 * not contend.
 */

mod lifecycle;
mod record;
mod rotation;

pub use lifecycle::*;
pub use record::*;
pub use rotation::*;
