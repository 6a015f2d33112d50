//! Builds the process-wide object/KV backends named in a `ServerConfig`.

use std::sync::Arc;

use strata_backend::{KvBackend, ObjectBackend, PosixObjectBackend, SqliteKvBackend};
use strata_core::config::ServerConfig;
use strata_core::StrataError;

pub fn object_backend(config: &ServerConfig) -> Result<Arc<dyn ObjectBackend>, StrataError> {
    match config.object_backend.name.as_str() {
        "posix" => Ok(Arc::new(PosixObjectBackend::new(
            &config.object_backend.path,
        )?)),
        other => Err(StrataError::BackendUnavailable(format!(
            "unknown object backend: {other}"
        ))),
    }
}

pub fn kv_backend(config: &ServerConfig) -> Result<Arc<dyn KvBackend>, StrataError> {
    match config.kv_backend.name.as_str() {
        "sqlite" => Ok(Arc::new(SqliteKvBackend::open(&config.kv_backend.path)?)),
        other => Err(StrataError::BackendUnavailable(format!(
            "unknown kv backend: {other}"
        ))),
    }
}
