//! strata-backend — the `ObjectBackend`/`KvBackend` capability traits and
//! the reference implementations this workspace ships so it is runnable
//! end-to-end without an external storage service.
//!
//! The concrete production backends (RADOS/GIO object stores, LevelDB/
//! MongoDB KV stores) are external collaborators and are not built here;
//! this crate only carries the trait boundary plus a POSIX filesystem
//! object backend, a SQLite KV backend, and `DashMap`-backed in-memory
//! variants of both for the client-local fast path and for tests.

pub mod memory;
pub mod object;
pub mod posix;
pub mod kv;
pub mod sqlite;

pub use kv::{KvBackend, KvOp};
pub use memory::{MemoryKvBackend, MemoryObjectBackend};
pub use object::{ObjectBackend, ObjectHandle};
pub use posix::PosixObjectBackend;
pub use sqlite::SqliteKvBackend;
