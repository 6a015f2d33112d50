//! strata-core — wire format, transformation codec, routing hash, config,
//! and the shared error taxonomy. Every other Strata crate depends on this
//! one.

pub mod config;
pub mod error;
pub mod hash;
pub mod message;
pub mod transform;
pub mod wire;

pub use error::StrataError;
pub use hash::route_index;
