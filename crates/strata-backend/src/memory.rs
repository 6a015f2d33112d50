//! `DashMap`-backed in-memory object and KV backends. Used on the
//! client-local fast path (no round trip when a local backend is
//! configured) and by tests that need real backend semantics without real
//! disk/SQLite I/O.

use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

use strata_core::StrataError;

use crate::kv::{KvBackend, KvOp};
use crate::object::{ObjectBackend, ObjectHandle};

struct ObjectState {
    bytes: RwLock<Vec<u8>>,
    mtime: RwLock<u64>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Default)]
pub struct MemoryObjectBackend {
    objects: DashMap<(String, String), Arc<ObjectState>>,
}

impl MemoryObjectBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectBackend for MemoryObjectBackend {
    fn create(&self, namespace: &str, name: &str) -> Result<ObjectHandle, StrataError> {
        let key = (namespace.to_string(), name.to_string());
        let state = Arc::new(ObjectState {
            bytes: RwLock::new(Vec::new()),
            mtime: RwLock::new(now_secs()),
        });
        self.objects.insert(key, state.clone());
        Ok(ObjectHandle::new(namespace, name, state))
    }

    fn open(&self, namespace: &str, name: &str) -> Result<ObjectHandle, StrataError> {
        let key = (namespace.to_string(), name.to_string());
        let state = self
            .objects
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StrataError::BackendOpFailed(format!("no such object: {name}")))?;
        Ok(ObjectHandle::new(namespace, name, state))
    }

    fn delete(&self, namespace: &str, name: &str) -> Result<(), StrataError> {
        self.objects
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }

    fn status(&self, handle: &ObjectHandle) -> Result<(u64, u64), StrataError> {
        let state: &Arc<ObjectState> = handle.state();
        let size = state.bytes.read().unwrap().len() as u64;
        let mtime = *state.mtime.read().unwrap();
        Ok((mtime, size))
    }

    fn sync(&self, _handle: &ObjectHandle) -> Result<(), StrataError> {
        Ok(())
    }

    fn read(&self, handle: &ObjectHandle, buf: &mut [u8], offset: u64) -> Result<usize, StrataError> {
        let state: &Arc<ObjectState> = handle.state();
        let bytes = state.bytes.read().unwrap();
        let offset = offset as usize;
        if offset >= bytes.len() {
            return Ok(0);
        }
        let n = buf.len().min(bytes.len() - offset);
        buf[..n].copy_from_slice(&bytes[offset..offset + n]);
        Ok(n)
    }

    fn write(&self, handle: &ObjectHandle, buf: &[u8], offset: u64) -> Result<usize, StrataError> {
        let state: &Arc<ObjectState> = handle.state();
        let mut bytes = state.bytes.write().unwrap();
        let offset = offset as usize;
        let end = offset + buf.len();
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[offset..end].copy_from_slice(buf);
        *state.mtime.write().unwrap() = now_secs();
        Ok(buf.len())
    }
}

#[derive(Default)]
pub struct MemoryKvBackend {
    store: DashMap<(String, String), Vec<u8>>,
}

impl MemoryKvBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvBackend for MemoryKvBackend {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StrataError> {
        Ok(self
            .store
            .get(&(namespace.to_string(), key.to_string()))
            .map(|entry| entry.value().clone()))
    }

    fn get_all(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>, StrataError> {
        let mut out: Vec<_> = self
            .store
            .iter()
            .filter(|entry| entry.key().0 == namespace)
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    fn get_by_prefix(
        &self,
        namespace: &str,
        prefix: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, StrataError> {
        Ok(self
            .get_all(namespace)?
            .into_iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .collect())
    }

    fn batch_execute(&self, namespace: &str, ops: &[KvOp]) -> Result<(), StrataError> {
        for op in ops {
            match op {
                KvOp::Put { key, value } => {
                    self.store
                        .insert((namespace.to_string(), key.clone()), value.clone());
                }
                KvOp::Delete { key } => {
                    self.store.remove(&(namespace.to_string(), key.clone()));
                }
            }
        }
        Ok(())
    }
}
