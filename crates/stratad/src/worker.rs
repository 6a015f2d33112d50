//! Per-connection dispatcher (spec §4.8). One worker owns one accepted
//! connection; it runs single-threaded over that connection until the peer
//! closes it or a protocol error makes the connection unrecoverable.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use strata_backend::{KvBackend, ObjectBackend, ObjectHandle};
use strata_core::message::{read_header, Message, MessageBuilder, OpRecord};
use strata_core::transform::{self, TransformMode, TransformType};
use strata_core::wire::{MessageHeader, MessageType};
use strata_core::StrataError;

pub struct Backends {
    pub object: Arc<dyn ObjectBackend>,
    pub kv: Arc<dyn KvBackend>,
}

#[derive(Serialize, Deserialize)]
struct KvEntry {
    key: String,
    value: Vec<u8>,
}

/// Drive one accepted connection until it closes or errors.
pub async fn serve_connection(mut stream: TcpStream, backends: Arc<Backends>, stripe_size: usize) {
    loop {
        let (header, message) = match read_request(&mut stream).await {
            Ok(Some(pair)) => pair,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read request, closing connection");
                return;
            }
        };

        if let Err(e) = dispatch(&mut stream, header, &message, &backends, stripe_size).await {
            tracing::warn!(error = %e, kind = ?header.kind(), "dispatch failed, closing connection");
            return;
        }
    }
}

async fn read_request(
    stream: &mut TcpStream,
) -> Result<Option<(MessageHeader, Message)>, StrataError> {
    let mut header_buf = [0u8; 12];
    match stream.read_exact(&mut header_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let header = read_header(&header_buf)?;
    let mut body = vec![0u8; header.length as usize];
    stream.read_exact(&mut body).await?;
    let message = Message::parse(header, Bytes::from(body))?;
    Ok(Some((header, message)))
}

async fn send(stream: &mut TcpStream, bytes: &[u8]) -> Result<(), StrataError> {
    stream.write_all(bytes).await.map_err(StrataError::from)
}

async fn dispatch(
    stream: &mut TcpStream,
    header: MessageHeader,
    msg: &Message,
    backends: &Backends,
    stripe_size: usize,
) -> Result<(), StrataError> {
    use MessageType::*;
    match header.kind()? {
        ObjectCreate | TransformationObjectCreate => {
            handle_create_delete(stream, header, msg, backends, true).await
        }
        ObjectDelete | TransformationObjectDelete => {
            handle_create_delete(stream, header, msg, backends, false).await
        }
        ObjectRead | TransformationObjectRead => {
            handle_read(stream, header, msg, backends, stripe_size).await
        }
        ObjectWrite | TransformationObjectWrite => {
            handle_write(stream, header, msg, backends, stripe_size).await
        }
        ObjectStatus | TransformationObjectStatus => {
            handle_status(stream, header, msg, backends).await
        }
        KvPut => handle_kv_put(stream, header, msg, backends).await,
        KvDelete => handle_kv_delete(stream, header, msg, backends).await,
        KvGet => handle_kv_get(stream, header, msg, backends).await,
        KvGetAll | KvGetByPrefix => handle_kv_list(stream, header, msg, backends).await,
        Statistics | Ping => handle_trivial(stream, header).await,
        None => Ok(()),
    }
}

fn namespace_of(msg: &Message) -> Result<&str, StrataError> {
    msg.namespace
        .as_deref()
        .ok_or_else(|| StrataError::ProtocolMismatch("request carries no namespace".into()))
}

fn target(msg: &Message) -> Result<(&str, &str), StrataError> {
    let namespace = namespace_of(msg)?;
    let name = msg
        .target_name
        .as_deref()
        .ok_or_else(|| StrataError::ProtocolMismatch("request carries no target name".into()))?;
    Ok((namespace, name))
}

async fn handle_create_delete(
    stream: &mut TcpStream,
    header: MessageHeader,
    msg: &Message,
    backends: &Backends,
    create: bool,
) -> Result<(), StrataError> {
    let namespace = namespace_of(msg)?;
    let safety = header.flags().safety();
    let mut reply = MessageBuilder::reply_to(&header);

    for op in &msg.ops {
        let OpRecord::Name(name) = op else { continue };
        if create {
            let handle = backends.object.create(namespace, name)?;
            if safety.requires_sync() {
                backends.object.sync(&handle)?;
            }
        } else {
            backends.object.delete(namespace, name)?;
        }
        if safety.requires_reply_for_write() {
            reply.add_ack();
        }
    }

    if safety.requires_reply_for_write() {
        send(stream, &reply.finish()).await?;
    }
    Ok(())
}

fn read_payload(
    object: &dyn ObjectBackend,
    handle: &ObjectHandle,
    offset: u64,
    length: usize,
    transform_prefix: Option<(TransformMode, TransformType)>,
) -> Result<Vec<u8>, StrataError> {
    match transform_prefix {
        Some((TransformMode::Server, ty)) if !ty.partial_access() => {
            let (_, phys_size) = object.status(handle)?;
            let mut encoded = vec![0u8; phys_size as usize];
            let n = object.read(handle, &mut encoded, 0)?;
            encoded.truncate(n);
            let decoded = transform::undo(ty, &encoded)?;
            let start = (offset as usize).min(decoded.len());
            let end = (offset as usize + length).min(decoded.len());
            Ok(decoded[start..end].to_vec())
        }
        Some((TransformMode::Server, ty)) => {
            let mut buf = vec![0u8; length];
            let n = object.read(handle, &mut buf, offset)?;
            buf.truncate(n);
            Ok(transform::undo(ty, &buf)?)
        }
        _ => {
            let mut buf = vec![0u8; length];
            let n = object.read(handle, &mut buf, offset)?;
            buf.truncate(n);
            Ok(buf)
        }
    }
}

async fn handle_read(
    stream: &mut TcpStream,
    header: MessageHeader,
    msg: &Message,
    backends: &Backends,
    stripe_size: usize,
) -> Result<(), StrataError> {
    let (namespace, name) = target(msg)?;
    let handle = backends.object.open(namespace, name)?;
    let transform_prefix = msg.transform;

    let mut reply = MessageBuilder::reply_to(&header);
    let mut bulk_used = 0usize;

    for op in &msg.ops {
        let OpRecord::ReadReq { length, offset } = op else {
            continue;
        };
        let (length, offset) = (*length as usize, *offset);
        if bulk_used > 0 && bulk_used + length > stripe_size {
            send(stream, &reply.finish()).await?;
            reply = MessageBuilder::reply_to(&header);
            bulk_used = 0;
        }
        let payload = read_payload(&*backends.object, &handle, offset, length, transform_prefix)?;
        bulk_used += payload.len();
        reply.add_read_reply(&payload);
    }

    send(stream, &reply.finish()).await
}

fn flush_write(
    object: &dyn ObjectBackend,
    handle: &ObjectHandle,
    offset: u64,
    data: &[u8],
    transform_prefix: Option<(TransformMode, TransformType)>,
) -> Result<(), StrataError> {
    match transform_prefix {
        Some((TransformMode::Server, ty)) if !ty.partial_access() => {
            let (_, phys_size) = object.status(handle)?;
            let mut encoded = vec![0u8; phys_size as usize];
            let n = object.read(handle, &mut encoded, 0)?;
            encoded.truncate(n);
            let mut decoded = if encoded.is_empty() {
                Vec::new()
            } else {
                transform::undo(ty, &encoded)?
            };
            let end = offset as usize + data.len();
            if decoded.len() < end {
                decoded.resize(end, 0);
            }
            decoded[offset as usize..end].copy_from_slice(data);
            let re_encoded = transform::apply(ty, &decoded);
            object.write(handle, &re_encoded, 0)?;
        }
        Some((TransformMode::Server, ty)) => {
            let encoded = transform::apply(ty, data);
            object.write(handle, &encoded, offset)?;
        }
        _ => {
            object.write(handle, data, offset)?;
        }
    }
    tracing::debug!(offset, len = data.len(), "flushed coalesced write");
    Ok(())
}

async fn handle_write(
    stream: &mut TcpStream,
    header: MessageHeader,
    msg: &Message,
    backends: &Backends,
    stripe_size: usize,
) -> Result<(), StrataError> {
    let (namespace, name) = target(msg)?;
    let handle = backends.object.open(namespace, name)?;
    let safety = header.flags().safety();
    let transform_prefix = msg.transform;

    let mut reply = MessageBuilder::reply_to(&header);
    let mut merge_off: u64 = 0;
    let mut merge_buf: Vec<u8> = Vec::new();
    let mut pending_lens: Vec<u64> = Vec::new();

    for op in &msg.ops {
        let OpRecord::WriteReq { length, offset } = op else {
            continue;
        };
        let (length, offset) = (*length, *offset);
        let payload = msg.next_bulk(length as usize)?;

        let abuts = !merge_buf.is_empty() && offset == merge_off + merge_buf.len() as u64;
        let fits = merge_buf.len() + payload.len() <= stripe_size;
        if !merge_buf.is_empty() && (!abuts || !fits) {
            flush_write(&*backends.object, &handle, merge_off, &merge_buf, transform_prefix)?;
            for l in pending_lens.drain(..) {
                reply.add_write_reply(l);
            }
            merge_buf.clear();
        }
        if merge_buf.is_empty() {
            merge_off = offset;
        }
        merge_buf.extend_from_slice(&payload);
        pending_lens.push(length);
    }

    if !merge_buf.is_empty() {
        flush_write(&*backends.object, &handle, merge_off, &merge_buf, transform_prefix)?;
        for l in pending_lens.drain(..) {
            reply.add_write_reply(l);
        }
    }

    if safety.requires_sync() {
        backends.object.sync(&handle)?;
    }
    if safety.requires_reply_for_write() {
        send(stream, &reply.finish()).await?;
    }
    Ok(())
}

async fn handle_status(
    stream: &mut TcpStream,
    header: MessageHeader,
    msg: &Message,
    backends: &Backends,
) -> Result<(), StrataError> {
    let namespace = namespace_of(msg)?;
    let mut reply = MessageBuilder::reply_to(&header);

    for op in &msg.ops {
        let OpRecord::Name(name) = op else { continue };
        let handle = backends.object.open(namespace, name)?;
        let (mtime, size) = backends.object.status(&handle)?;
        reply.add_status_reply(mtime, size);
    }

    send(stream, &reply.finish()).await
}

async fn handle_kv_put(
    stream: &mut TcpStream,
    header: MessageHeader,
    msg: &Message,
    backends: &Backends,
) -> Result<(), StrataError> {
    let namespace = namespace_of(msg)?;
    let safety = header.flags().safety();
    let mut reply = MessageBuilder::reply_to(&header);

    for op in &msg.ops {
        let OpRecord::KvPut { key, value_len } = op else {
            continue;
        };
        let value = msg.next_bulk(*value_len as usize)?;
        backends.kv.put(namespace, key, &value)?;
        if safety.requires_reply_for_write() {
            reply.add_ack();
        }
    }

    if safety.requires_reply_for_write() {
        send(stream, &reply.finish()).await?;
    }
    Ok(())
}

async fn handle_kv_delete(
    stream: &mut TcpStream,
    header: MessageHeader,
    msg: &Message,
    backends: &Backends,
) -> Result<(), StrataError> {
    let namespace = namespace_of(msg)?;
    let safety = header.flags().safety();
    let mut reply = MessageBuilder::reply_to(&header);

    for op in &msg.ops {
        let OpRecord::KvKey(key) = op else { continue };
        backends.kv.delete(namespace, key)?;
        if safety.requires_reply_for_write() {
            reply.add_ack();
        }
    }

    if safety.requires_reply_for_write() {
        send(stream, &reply.finish()).await?;
    }
    Ok(())
}

async fn handle_kv_get(
    stream: &mut TcpStream,
    header: MessageHeader,
    msg: &Message,
    backends: &Backends,
) -> Result<(), StrataError> {
    let namespace = namespace_of(msg)?;
    let mut reply = MessageBuilder::reply_to(&header);

    for op in &msg.ops {
        let OpRecord::KvKey(key) = op else { continue };
        let value = backends.kv.get(namespace, key)?;
        reply.add_kv_value(value.as_deref());
    }

    send(stream, &reply.finish()).await
}

/// `KV_GET_ALL`/`KV_GET_BY_PREFIX`: each entry's key travels inside the
/// value as a small JSON envelope, resolving the wire shape's lack of a
/// key field (see DESIGN.md). A trailing zero-length `KvValue` signals
/// end of iteration.
async fn handle_kv_list(
    stream: &mut TcpStream,
    header: MessageHeader,
    msg: &Message,
    backends: &Backends,
) -> Result<(), StrataError> {
    let namespace = namespace_of(msg)?;

    let entries = match header.kind()? {
        MessageType::KvGetByPrefix => {
            let prefix = match msg.ops.first() {
                Some(OpRecord::KvPrefix(p)) => p.as_str(),
                _ => "",
            };
            backends.kv.get_by_prefix(namespace, prefix)?
        }
        _ => backends.kv.get_all(namespace)?,
    };

    let mut reply = MessageBuilder::reply_to(&header);
    for (key, value) in entries {
        let envelope = KvEntry { key, value };
        let bytes = serde_json::to_vec(&envelope)
            .map_err(|e| StrataError::ProtocolMismatch(e.to_string()))?;
        reply.add_kv_value(Some(&bytes));
    }
    reply.add_kv_value(None);

    send(stream, &reply.finish()).await
}

/// `Ping`/`Statistics` carry no op records in either direction (spec §6
/// leaves both minimal); the reply is the empty, zero-op message itself.
async fn handle_trivial(stream: &mut TcpStream, header: MessageHeader) -> Result<(), StrataError> {
    let reply = MessageBuilder::reply_to(&header);
    send(stream, &reply.finish()).await
}
