//! The client front end: routes each object/KV operation either to a
//! local backend (when the client is configured with one, bypassing the
//! network entirely) or to the pooled remote connection for the server
//! that owns it (`index = hash(name) mod server_count`).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use strata_backend::{KvBackend, KvOp, ObjectBackend};
use strata_core::config::StrataConfig;
use strata_core::hash::route_index;
use strata_core::message::{read_header, Message, MessageBuilder, OpRecord};
use strata_core::transform::{TransformMode, TransformType};
use strata_core::wire::{MessageType, Safety};
use strata_core::StrataError;

use crate::pool::{BackendKind, ConnectionPool};

pub struct Client {
    config: StrataConfig,
    pool: ConnectionPool,
    object_backend: Option<Arc<dyn ObjectBackend>>,
    kv_backend: Option<Arc<dyn KvBackend>>,
    next_id: AtomicU32,
}

impl Client {
    pub fn new(config: StrataConfig) -> Self {
        let pool = ConnectionPool::new(config.client.connection_pool_size);
        Self {
            config,
            pool,
            object_backend: None,
            kv_backend: None,
            next_id: AtomicU32::new(1),
        }
    }

    pub fn with_object_backend(mut self, backend: Arc<dyn ObjectBackend>) -> Self {
        self.object_backend = Some(backend);
        self
    }

    pub fn with_kv_backend(mut self, backend: Arc<dyn KvBackend>) -> Self {
        self.kv_backend = Some(backend);
        self
    }

    pub fn max_operation_size(&self) -> u64 {
        self.config.client.max_operation_size
    }

    fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Routes the same way `TransformationObject::new` computes its
    /// `index` field, so a plain object's direct `Client` calls and a
    /// transformation object wrapping the same name always land on the
    /// same server (every operation against an object carries that
    /// object's index).
    fn object_server(&self, name: &str) -> Result<(u32, String), StrataError> {
        let count = self.config.client.object_servers.len() as u32;
        if count == 0 {
            return Err(StrataError::BackendUnavailable(
                "no object servers configured and no local object backend".into(),
            ));
        }
        let idx = route_index(name, count);
        Ok((idx, self.config.client.object_servers[idx as usize].clone()))
    }

    fn kv_server(&self, key: &str) -> Result<(u32, String), StrataError> {
        let count = self.config.client.kv_servers.len() as u32;
        if count == 0 {
            return Err(StrataError::BackendUnavailable(
                "no kv servers configured and no local kv backend".into(),
            ));
        }
        let idx = route_index(key, count);
        Ok((idx, self.config.client.kv_servers[idx as usize].clone()))
    }

    /// Send a fully-built request and, if `expect_reply`, read back one
    /// complete reply message over a pooled connection.
    async fn roundtrip(
        &self,
        kind: BackendKind,
        server_index: u32,
        addr: &str,
        request: bytes::BytesMut,
        expect_reply: bool,
    ) -> Result<Option<Message>, StrataError> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let mut conn = self.pool.pop(kind, server_index, addr).await?;
        let write_result = conn.stream.write_all(&request).await;
        if let Err(e) = write_result {
            return Err(StrataError::NetworkTransient(e));
        }

        if !expect_reply {
            self.pool.push(conn).await;
            return Ok(None);
        }

        let mut header_buf = [0u8; 12];
        if let Err(e) = conn.stream.read_exact(&mut header_buf).await {
            return Err(StrataError::NetworkTransient(e));
        }
        let header = read_header(&header_buf)?;
        let mut body = vec![0u8; header.length as usize];
        if let Err(e) = conn.stream.read_exact(&mut body).await {
            return Err(StrataError::NetworkTransient(e));
        }
        self.pool.push(conn).await;

        let message = Message::parse(header, Bytes::from(body))?;
        Ok(Some(message))
    }

    // ── Object operations ──────────────────────────────────────────────

    pub async fn create_objects(
        &self,
        namespace: &str,
        names: &[String],
        safety: Safety,
    ) -> Result<(), StrataError> {
        if let Some(backend) = &self.object_backend {
            for name in names {
                backend.create(namespace, name)?;
            }
            return Ok(());
        }

        let (idx, addr) = self.object_server(&names[0])?;
        let mut builder = MessageBuilder::new(MessageType::ObjectCreate, self.next_id(), safety)
            .with_namespace(namespace);
        for name in names {
            builder.add_name(name);
        }
        let request = builder.finish();
        let expect_reply = safety.requires_reply_for_write();
        self.roundtrip(BackendKind::Object, idx, &addr, request, expect_reply)
            .await?;
        Ok(())
    }

    pub async fn delete_objects(
        &self,
        namespace: &str,
        names: &[String],
        safety: Safety,
    ) -> Result<(), StrataError> {
        if let Some(backend) = &self.object_backend {
            for name in names {
                backend.delete(namespace, name)?;
            }
            return Ok(());
        }

        let (idx, addr) = self.object_server(&names[0])?;
        let mut builder = MessageBuilder::new(MessageType::ObjectDelete, self.next_id(), safety)
            .with_namespace(namespace);
        for name in names {
            builder.add_name(name);
        }
        let request = builder.finish();
        let expect_reply = safety.requires_reply_for_write();
        self.roundtrip(BackendKind::Object, idx, &addr, request, expect_reply)
            .await?;
        Ok(())
    }

    /// Read exactly one `(length, offset)` window of the raw stored bytes.
    /// `transform` is `Some((mode, type))` when this targets a
    /// transformation object and the server must run the codec itself.
    pub async fn read_raw(
        &self,
        namespace: &str,
        name: &str,
        length: u64,
        offset: u64,
        transform: Option<(TransformMode, TransformType)>,
    ) -> Result<Vec<u8>, StrataError> {
        let mut replies = self
            .read_raw_multi(namespace, name, &[(length, offset)], transform)
            .await?;
        Ok(replies.pop().unwrap_or_default())
    }

    /// Read `requests.len()` `(length, offset)` windows against the same
    /// object in a single network message, returning one buffer per
    /// request in the same order (one OBJECT_READ/TRANSFORMATION_OBJECT_READ
    /// message carrying N read operation records).
    pub async fn read_raw_multi(
        &self,
        namespace: &str,
        name: &str,
        requests: &[(u64, u64)],
        transform: Option<(TransformMode, TransformType)>,
    ) -> Result<Vec<Vec<u8>>, StrataError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(backend) = &self.object_backend {
            let handle = backend.open(namespace, name)?;
            let mut out = Vec::with_capacity(requests.len());
            for &(length, offset) in requests {
                let mut buf = vec![0u8; length as usize];
                let n = backend.read(&handle, &mut buf, offset)?;
                buf.truncate(n);
                out.push(buf);
            }
            return Ok(out);
        }

        let (idx, addr) = self.object_server(name)?;
        let kind = if transform.is_some() {
            MessageType::TransformationObjectRead
        } else {
            MessageType::ObjectRead
        };
        let mut builder = MessageBuilder::new(kind, self.next_id(), Safety::None)
            .with_namespace(namespace)
            .with_target_name(name);
        if let Some((mode, ty)) = transform {
            builder = builder.with_transform(mode, ty);
        }
        for &(length, offset) in requests {
            builder.add_read_req(length, offset);
        }
        let request = builder.finish();

        let reply = self
            .roundtrip(BackendKind::Object, idx, &addr, request, true)
            .await?
            .ok_or_else(|| StrataError::ProtocolMismatch("read got no reply".into()))?;

        let mut out = Vec::with_capacity(requests.len());
        for op in &reply.ops {
            match op {
                OpRecord::ReadReply { nbytes } => {
                    out.push(reply.next_bulk(*nbytes as usize)?.to_vec())
                }
                _ => {
                    return Err(StrataError::ProtocolMismatch(
                        "expected a read reply op".into(),
                    ))
                }
            }
        }
        if out.len() != requests.len() {
            return Err(StrataError::ProtocolMismatch(
                "read reply op count did not match request count".into(),
            ));
        }
        Ok(out)
    }

    /// Write exactly one `(offset, payload)` window of the raw stored bytes.
    /// Returns the byte count the caller should record: a real count if the
    /// server replied, or `payload.len()` faked locally when `safety ==
    /// NONE` (the server sends no reply, so the client trusts its own
    /// request).
    pub async fn write_raw(
        &self,
        namespace: &str,
        name: &str,
        offset: u64,
        payload: &[u8],
        safety: Safety,
        transform: Option<(TransformMode, TransformType)>,
    ) -> Result<u64, StrataError> {
        let mut replies = self
            .write_raw_multi(namespace, name, &[(offset, payload)], safety, transform)
            .await?;
        Ok(replies.pop().unwrap_or(0))
    }

    /// Write `writes.len()` `(offset, payload)` windows against the same
    /// object in a single network message, returning one byte count per
    /// write in the same order.
    pub async fn write_raw_multi(
        &self,
        namespace: &str,
        name: &str,
        writes: &[(u64, &[u8])],
        safety: Safety,
        transform: Option<(TransformMode, TransformType)>,
    ) -> Result<Vec<u64>, StrataError> {
        if writes.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(backend) = &self.object_backend {
            let handle = backend.open(namespace, name)?;
            let mut out = Vec::with_capacity(writes.len());
            for &(offset, payload) in writes {
                out.push(backend.write(&handle, payload, offset)? as u64);
            }
            if safety.requires_sync() {
                backend.sync(&handle)?;
            }
            return Ok(out);
        }

        let (idx, addr) = self.object_server(name)?;
        let kind = if transform.is_some() {
            MessageType::TransformationObjectWrite
        } else {
            MessageType::ObjectWrite
        };
        let mut builder = MessageBuilder::new(kind, self.next_id(), safety)
            .with_namespace(namespace)
            .with_target_name(name);
        if let Some((mode, ty)) = transform {
            builder = builder.with_transform(mode, ty);
        }
        for &(offset, payload) in writes {
            builder.add_write_req(offset, payload);
        }
        let request = builder.finish();

        let expect_reply = safety.requires_reply_for_write();
        let reply = self
            .roundtrip(BackendKind::Object, idx, &addr, request, expect_reply)
            .await?;

        match reply {
            Some(message) => {
                let mut out = Vec::with_capacity(writes.len());
                for op in &message.ops {
                    match op {
                        OpRecord::WriteReply { nbytes } => out.push(*nbytes),
                        _ => {
                            return Err(StrataError::ProtocolMismatch(
                                "expected a write reply op".into(),
                            ))
                        }
                    }
                }
                if out.len() != writes.len() {
                    return Err(StrataError::ProtocolMismatch(
                        "write reply op count did not match request count".into(),
                    ));
                }
                Ok(out)
            }
            None => Ok(writes.iter().map(|(_, payload)| payload.len() as u64).collect()),
        }
    }

    pub async fn status_raw(
        &self,
        namespace: &str,
        name: &str,
        transform: Option<(TransformMode, TransformType)>,
    ) -> Result<(u64, u64), StrataError> {
        if let Some(backend) = &self.object_backend {
            let handle = backend.open(namespace, name)?;
            return Ok(backend.status(&handle)?);
        }

        let (idx, addr) = self.object_server(name)?;
        let kind = if transform.is_some() {
            MessageType::TransformationObjectStatus
        } else {
            MessageType::ObjectStatus
        };
        let mut builder = MessageBuilder::new(kind, self.next_id(), Safety::None)
            .with_namespace(namespace);
        if let Some((mode, ty)) = transform {
            builder = builder.with_transform(mode, ty);
        }
        builder.add_name(name);
        let request = builder.finish();

        let reply = self
            .roundtrip(BackendKind::Object, idx, &addr, request, true)
            .await?
            .ok_or_else(|| StrataError::ProtocolMismatch("status got no reply".into()))?;

        match reply.ops.first() {
            Some(OpRecord::StatusReply { mtime, size }) => Ok((*mtime, *size)),
            _ => Err(StrataError::ProtocolMismatch(
                "expected a single status reply op".into(),
            )),
        }
    }

    // ── KV operations ──────────────────────────────────────────────────

    pub async fn kv_put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StrataError> {
        if let Some(backend) = &self.kv_backend {
            return Ok(backend.put(namespace, key, value)?);
        }
        let (idx, addr) = self.kv_server(key)?;
        let mut builder = MessageBuilder::new(MessageType::KvPut, self.next_id(), Safety::Network)
            .with_namespace(namespace);
        builder.add_kv_put(key, value);
        let request = builder.finish();
        self.roundtrip(BackendKind::Kv, idx, &addr, request, true)
            .await?;
        Ok(())
    }

    pub async fn kv_delete(&self, namespace: &str, key: &str) -> Result<(), StrataError> {
        if let Some(backend) = &self.kv_backend {
            return Ok(backend.delete(namespace, key)?);
        }
        let (idx, addr) = self.kv_server(key)?;
        let mut builder =
            MessageBuilder::new(MessageType::KvDelete, self.next_id(), Safety::Network)
                .with_namespace(namespace);
        builder.add_kv_key(key);
        let request = builder.finish();
        self.roundtrip(BackendKind::Kv, idx, &addr, request, true)
            .await?;
        Ok(())
    }

    pub async fn kv_get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StrataError> {
        if let Some(backend) = &self.kv_backend {
            return Ok(backend.get(namespace, key)?);
        }
        let (idx, addr) = self.kv_server(key)?;
        let mut builder = MessageBuilder::new(MessageType::KvGet, self.next_id(), Safety::None)
            .with_namespace(namespace);
        builder.add_kv_key(key);
        let request = builder.finish();

        let reply = self
            .roundtrip(BackendKind::Kv, idx, &addr, request, true)
            .await?
            .ok_or_else(|| StrataError::ProtocolMismatch("kv get got no reply".into()))?;

        match reply.ops.first() {
            Some(OpRecord::KvValue { value_len }) if *value_len > 0 => {
                Ok(Some(reply.next_bulk(*value_len as usize)?.to_vec()))
            }
            _ => Ok(None),
        }
    }

    pub async fn kv_get_all(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>, StrataError> {
        if let Some(backend) = &self.kv_backend {
            return Ok(backend.get_all(namespace)?);
        }
        self.kv_list(namespace, MessageType::KvGetAll, "").await
    }

    pub async fn kv_get_by_prefix(
        &self,
        namespace: &str,
        prefix: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, StrataError> {
        if let Some(backend) = &self.kv_backend {
            return Ok(backend.get_by_prefix(namespace, prefix)?);
        }
        self.kv_list(namespace, MessageType::KvGetByPrefix, prefix).await
    }

    /// `KV_GET_ALL`/`KV_GET_BY_PREFIX` carry a run of `KvValue` reply ops,
    /// zero-length signalling end of iteration (spec §4.8). Since the wire
    /// shape only specifies a length-prefixed value per entry, the key
    /// travels inside the value as a small envelope the server and client
    /// both agree on — an Open Question resolution recorded in DESIGN.md.
    async fn kv_list(
        &self,
        namespace: &str,
        kind: MessageType,
        prefix: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, StrataError> {
        let (idx, addr) = self.kv_server(namespace)?;
        let mut builder = MessageBuilder::new(kind, self.next_id(), Safety::None)
            .with_namespace(namespace);
        if kind == MessageType::KvGetByPrefix {
            builder.add_kv_prefix(prefix);
        } else {
            builder.add_kv_prefix("");
        }
        let request = builder.finish();

        let reply = self
            .roundtrip(BackendKind::Kv, idx, &addr, request, true)
            .await?
            .ok_or_else(|| StrataError::ProtocolMismatch("kv list got no reply".into()))?;

        let mut out = Vec::new();
        for op in &reply.ops {
            if let OpRecord::KvValue { value_len } = op {
                if *value_len == 0 {
                    continue;
                }
                let bytes = reply.next_bulk(*value_len as usize)?;
                let entry: KvEntry = serde_json::from_slice(&bytes)
                    .map_err(|e| StrataError::ProtocolMismatch(e.to_string()))?;
                out.push((entry.key, entry.value));
            }
        }
        Ok(out)
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct KvEntry {
    key: String,
    value: Vec<u8>,
}
