/*!
 * Tamper-Evident Audit Chain
 *
 * Every lifecycle and cipher operation is recorded as an immutable event.
 * Each event carries a chain tag, HMAC-SHA256 under the audit secret over
 * the previous tag and the event's canonical encoding, so the tag of event
 * `n` commits to the whole history `1..=n`. Editing, reordering or deleting
 * any past event breaks verification from that position onward.
 *
 * Appends are globally serialized: one mutex guards the chain head (next
 * sequence number and last tag) across the store write.
 */

mod chain;
mod event;

pub use chain::*;
pub use event::*;
