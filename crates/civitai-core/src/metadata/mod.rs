//! Metadata persistence.
//!
//! Atomic JSON and byte writes used by the index store, the settings file,
//! the pending-download list and the companion files.

mod atomic;

pub use atomic::{atomic_read_json, atomic_write_bytes, atomic_write_json};
