/*!
 * Append-only audit log
 *
 * Every key-lifecycle and crypto operation leaves exactly one entry.
 * Recording never blocks the crypto critical path beyond a bounded
 * timeout: a dedicated writer task signs entries with the service's
 * Dilithium audit identity and appends them to the durable store, and
 * a drop under load is itself counted and escalated.
 */

mod logger;

pub use logger::*;
