//! Domain layer - pure types with no I/O.
//!
//! - Cache and counter keys
//! - TTLs, window policies and rate decisions
//! - Value codecs
//!
//! Everything here is synchronous and validated at construction.

pub mod codec;
pub mod key;
pub mod policy;
