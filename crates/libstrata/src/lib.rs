//! Strata client library — connection pooling, the batched operation
//! pipeline, and the transformation-object abstractions built on top of
//! `strata-core`'s wire format.

pub mod batch;
pub mod chunked;
pub mod client;
pub mod object;
pub mod pool;

pub use batch::{target_key, Batch, Operation};
pub use chunked::ChunkedTransformationObject;
pub use client::Client;
pub use object::TransformationObject;
pub use pool::{BackendKind, ConnectionPool, PooledConnection};
