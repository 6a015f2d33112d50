//! POSIX filesystem object backend — one file per `(namespace, name)` under
//! a root directory. Writes land in a temp file first and are renamed into
//! place, so a crash mid-write never leaves a partially-written object
//! visible at its real path.

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use strata_core::StrataError;

use crate::object::{ObjectBackend, ObjectHandle};

pub struct PosixObjectBackend {
    root: PathBuf,
}

impl PosixObjectBackend {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StrataError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| StrataError::BackendUnavailable(format!("{}: {e}", root.display())))?;
        Ok(Self { root })
    }

    fn path_for(&self, namespace: &str, name: &str) -> PathBuf {
        self.root.join(namespace).join(name)
    }

    fn ensure_parent(path: &Path) -> Result<(), StrataError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StrataError::BackendOpFailed(format!("{}: {e}", parent.display())))?;
        }
        Ok(())
    }
}

impl ObjectBackend for PosixObjectBackend {
    fn create(&self, namespace: &str, name: &str) -> Result<ObjectHandle, StrataError> {
        let path = self.path_for(namespace, name);
        Self::ensure_parent(&path)?;

        // Atomic creation: write into a temp file in the same directory,
        // then rename into place, so a concurrent open never observes a
        // partially-created object.
        let tmp_path = path.with_extension("tmp");
        File::create(&tmp_path)
            .map_err(|e| StrataError::BackendOpFailed(format!("{}: {e}", tmp_path.display())))?;
        fs::rename(&tmp_path, &path)
            .map_err(|e| StrataError::BackendOpFailed(format!("{}: {e}", path.display())))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| StrataError::BackendOpFailed(format!("{}: {e}", path.display())))?;
        Ok(ObjectHandle::new(namespace, name, file))
    }

    fn open(&self, namespace: &str, name: &str) -> Result<ObjectHandle, StrataError> {
        let path = self.path_for(namespace, name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| StrataError::BackendOpFailed(format!("{}: {e}", path.display())))?;
        Ok(ObjectHandle::new(namespace, name, file))
    }

    fn delete(&self, namespace: &str, name: &str) -> Result<(), StrataError> {
        let path = self.path_for(namespace, name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StrataError::BackendOpFailed(format!(
                "{}: {e}",
                path.display()
            ))),
        }
    }

    fn status(&self, handle: &ObjectHandle) -> Result<(u64, u64), StrataError> {
        let file: &File = handle.state();
        let meta = file
            .metadata()
            .map_err(|e| StrataError::BackendOpFailed(e.to_string()))?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Ok((mtime, meta.len()))
    }

    fn sync(&self, handle: &ObjectHandle) -> Result<(), StrataError> {
        let file: &File = handle.state();
        file.sync_all()
            .map_err(|e| StrataError::BackendOpFailed(e.to_string()))
    }

    fn read(&self, handle: &ObjectHandle, buf: &mut [u8], offset: u64) -> Result<usize, StrataError> {
        let file: &File = handle.state();
        // read_at never advances a shared cursor, so concurrent readers of
        // the same handle never race on position the way seek+read would.
        match file.read_at(buf, offset) {
            Ok(n) => Ok(n),
            Err(e) => Err(StrataError::BackendOpFailed(e.to_string())),
        }
    }

    fn write(&self, handle: &ObjectHandle, buf: &[u8], offset: u64) -> Result<usize, StrataError> {
        let file: &File = handle.state();
        file.write_at(buf, offset)
            .map_err(|e| StrataError::BackendOpFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> (PosixObjectBackend, PathBuf) {
        let root = std::env::temp_dir().join(format!(
            "strata-posix-test-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        (PosixObjectBackend::new(&root).unwrap(), root)
    }

    #[test]
    fn create_write_read_round_trip() {
        let (backend, root) = backend();
        let handle = backend.create("bench", "o1").unwrap();
        backend.write(&handle, b"hello world", 0).unwrap();

        let mut buf = [0u8; 5];
        let n = backend.read(&handle, &mut buf, 6).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"world");

        let (_, size) = backend.status(&handle).unwrap();
        assert_eq!(size, 11);

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn delete_is_idempotent() {
        let (backend, root) = backend();
        backend.create("bench", "o1").unwrap();
        backend.delete("bench", "o1").unwrap();
        backend.delete("bench", "o1").unwrap();
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn open_missing_object_fails() {
        let (backend, root) = backend();
        assert!(backend.open("bench", "does-not-exist").is_err());
        let _ = fs::remove_dir_all(root);
    }
}
