//! Object backend capability set (spec §4.3).

use std::any::Any;

use strata_core::StrataError;

/// A handle to an open object. Opaque to callers beyond the namespace/name
/// it was opened for; each backend stashes whatever state it needs (an open
/// `File`, an `Arc` into an in-memory map) behind the `Any` payload and
/// downcasts it back in its own trait methods.
pub struct ObjectHandle {
    pub namespace: String,
    pub name: String,
    state: Box<dyn Any + Send + Sync>,
}

impl ObjectHandle {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        state: impl Any + Send + Sync,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            state: Box::new(state),
        }
    }

    pub fn state<T: Any>(&self) -> &T {
        self.state
            .downcast_ref()
            .expect("object handle opened by a different backend")
    }
}

/// Uniform object storage operations over a pluggable backend. `create`/
/// `open` return a handle; every other operation takes one. There is no
/// explicit `close` — the handle's `Drop` (or simply letting it go out of
/// scope) releases backend-side resources, since Rust has no need for the
/// C API's explicit lifetime management here.
pub trait ObjectBackend: Send + Sync {
    fn create(&self, namespace: &str, name: &str) -> Result<ObjectHandle, StrataError>;
    fn open(&self, namespace: &str, name: &str) -> Result<ObjectHandle, StrataError>;
    fn delete(&self, namespace: &str, name: &str) -> Result<(), StrataError>;

    /// `(mtime_unix_secs, physical_size)`.
    fn status(&self, handle: &ObjectHandle) -> Result<(u64, u64), StrataError>;
    fn sync(&self, handle: &ObjectHandle) -> Result<(), StrataError>;

    fn read(&self, handle: &ObjectHandle, buf: &mut [u8], offset: u64) -> Result<usize, StrataError>;
    fn write(&self, handle: &ObjectHandle, buf: &[u8], offset: u64) -> Result<usize, StrataError>;
}
