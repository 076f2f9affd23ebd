/*!
 * Key record store
 *
 * The single source of truth for key material and lifecycle state. All
 * status and use-count mutations go through `KeyStore`; every other
 * component treats `KeyRecord` as read-only.
 */

mod record;
mod store;

pub use record::*;
pub use store::*;
