//! Chunked transformation object (spec §4.7) — tiles a logical object
//! across many flat transformation objects named `"{name}_{i}"` in the same
//! namespace, so a single logical byte range can outgrow what any one
//! backend object would hold.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use strata_core::transform::{TransformMode, TransformType};
use strata_core::wire::Safety;
use strata_core::StrataError;

use crate::client::Client;
use crate::object::TransformationObject;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct WireChunkedMetadata {
    ty: u8,
    mode: u8,
    chunk_count: u64,
    chunk_size: u64,
}

#[derive(Debug, Clone, Copy)]
struct ChunkedMetadata {
    ty: TransformType,
    mode: TransformMode,
    chunk_count: u64,
    chunk_size: u64,
}

impl From<ChunkedMetadata> for WireChunkedMetadata {
    fn from(m: ChunkedMetadata) -> Self {
        WireChunkedMetadata {
            ty: m.ty as u8,
            mode: m.mode as u8,
            chunk_count: m.chunk_count,
            chunk_size: m.chunk_size,
        }
    }
}

impl From<WireChunkedMetadata> for ChunkedMetadata {
    fn from(w: WireChunkedMetadata) -> Self {
        ChunkedMetadata {
            ty: TransformType::from(w.ty),
            mode: TransformMode::from(w.mode),
            chunk_count: w.chunk_count,
            chunk_size: w.chunk_size,
        }
    }
}

pub struct ChunkedTransformationObject {
    client: Arc<Client>,
    namespace: String,
    name: String,
    server_count: u32,
    metadata: Mutex<Option<ChunkedMetadata>>,
}

impl ChunkedTransformationObject {
    pub fn new(client: Arc<Client>, namespace: &str, name: &str, server_count: u32) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            name: name.to_string(),
            server_count: server_count.max(1),
            metadata: Mutex::new(None),
        }
    }

    fn chunk_name(&self, chunk_id: u64) -> String {
        format!("{}_{}", self.name, chunk_id)
    }

    fn chunk(&self, chunk_id: u64) -> TransformationObject {
        TransformationObject::new(
            self.client.clone(),
            &self.namespace,
            &self.chunk_name(chunk_id),
            self.server_count,
        )
    }

    pub async fn create(
        &self,
        chunk_size: u64,
        ty: TransformType,
        mode: TransformMode,
        safety: Safety,
    ) -> Result<(), StrataError> {
        self.chunk(0).create(ty, mode, safety).await?;
        let meta = ChunkedMetadata {
            ty,
            mode,
            chunk_count: 1,
            chunk_size,
        };
        self.save_metadata(meta).await
    }

    pub async fn delete(&self) -> Result<(), StrataError> {
        let meta = self.load_metadata().await?;
        for i in 0..meta.chunk_count {
            self.chunk(i).delete().await?;
        }
        self.client.kv_delete(&self.namespace, &self.name).await?;
        *self.metadata.lock().await = None;
        Ok(())
    }

    /// `(mtime_max, original_size_sum, transformed_size_sum, type)`.
    pub async fn status(&self) -> Result<(u64, u64, u64, TransformType), StrataError> {
        let meta = self.load_metadata().await?;
        let mut mtime_max = 0u64;
        let mut original_sum = 0u64;
        let mut transformed_sum = 0u64;
        for i in 0..meta.chunk_count {
            let (mtime, original, transformed, _ty) = self.chunk(i).status().await?;
            mtime_max = mtime_max.max(mtime);
            original_sum += original;
            transformed_sum += transformed;
        }
        Ok((mtime_max, original_sum, transformed_sum, meta.ty))
    }

    pub async fn read(&self, buf: &mut [u8], offset: u64) -> Result<u64, StrataError> {
        let len = buf.len() as u64;
        if len == 0 {
            return Ok(0);
        }
        let meta = self.load_metadata().await?;
        let mut total = 0u64;
        let mut pos = offset;
        let mut remaining = len;
        let mut written = 0usize;

        while remaining > 0 {
            let chunk_id = pos / meta.chunk_size;
            let local_off = pos % meta.chunk_size;
            let local_len = remaining.min(meta.chunk_size - local_off);

            let n = self
                .chunk(chunk_id)
                .read(&mut buf[written..written + local_len as usize], local_off)
                .await?;
            total += n;
            written += local_len as usize;
            pos += local_len;
            remaining -= local_len;
        }
        Ok(total)
    }

    pub async fn write(&self, data: &[u8], offset: u64, safety: Safety) -> Result<u64, StrataError> {
        let len = data.len() as u64;
        if len == 0 {
            return Ok(0);
        }
        let mut meta = self.load_metadata().await?;
        let mut total = 0u64;
        let mut pos = offset;
        let mut remaining = len;
        let mut read_off = 0usize;

        while remaining > 0 {
            let chunk_id = pos / meta.chunk_size;
            let local_off = pos % meta.chunk_size;
            let local_len = remaining.min(meta.chunk_size - local_off);

            if chunk_id >= meta.chunk_count {
                self.chunk(chunk_id).create(meta.ty, meta.mode, safety).await?;
                meta.chunk_count = chunk_id + 1;
                self.save_metadata(meta).await?;
            }

            let n = self
                .chunk(chunk_id)
                .write(
                    &data[read_off..read_off + local_len as usize],
                    local_off,
                    safety,
                )
                .await?;
            total += n;
            read_off += local_len as usize;
            pos += local_len;
            remaining -= local_len;
        }
        Ok(total)
    }

    async fn load_metadata(&self) -> Result<ChunkedMetadata, StrataError> {
        {
            let cached = self.metadata.lock().await;
            if let Some(meta) = *cached {
                return Ok(meta);
            }
        }
        let raw = self
            .client
            .kv_get(&self.namespace, &self.name)
            .await?
            .ok_or_else(|| {
                StrataError::BackendOpFailed(format!(
                    "no chunked metadata for {}/{}",
                    self.namespace, self.name
                ))
            })?;
        let wire: WireChunkedMetadata =
            serde_json::from_slice(&raw).map_err(|e| StrataError::ProtocolMismatch(e.to_string()))?;
        let meta: ChunkedMetadata = wire.into();
        *self.metadata.lock().await = Some(meta);
        Ok(meta)
    }

    async fn save_metadata(&self, meta: ChunkedMetadata) -> Result<(), StrataError> {
        let wire: WireChunkedMetadata = meta.into();
        let bytes =
            serde_json::to_vec(&wire).map_err(|e| StrataError::ProtocolMismatch(e.to_string()))?;
        self.client.kv_put(&self.namespace, &self.name, &bytes).await?;
        *self.metadata.lock().await = Some(meta);
        Ok(())
    }
}
