//! On-disk binary cache
//!
//! Deterministic cache paths, staleness checks, atomic commits and the id
//! index used for id-addressed lookups.

pub mod index;
pub mod store;

pub use index::{matches_binary, parse_id_file_name, BinaryIndex};
pub use store::CacheStore;
