//! Message schema — operation records, the append-only builder, and the
//! matching reader.
//!
//! A message is the fixed `MessageHeader` (§wire) followed by an optional
//! `(mode, type)` transformation prefix, an optional namespace string, an
//! optional target object name (read/write messages only — every op in
//! such a message shares one target), a `count`-element array of
//! fixed-width operation records, and an append-only bulk region holding
//! strings and bulk payload bytes. `MessageBuilder` APPENDs in order;
//! `MessageReader` CONSUMEs in the same order — the two halves of one
//! contract.

use bytes::{Buf, Bytes, BytesMut};

use crate::transform::{TransformMode, TransformType};
use crate::wire::{Flags, MessageHeader, MessageType, Safety, WireError};

// ── Operation records ─────────────────────────────────────────────────────────

/// One logical operation, as carried on the wire. Variant shape matches
/// spec §6 exactly; the same shapes serve both `OBJECT_*` and
/// `TRANSFORMATION_OBJECT_*` message families (the transformation prefix
/// lives in the header area, not per-op).
#[derive(Debug, Clone, PartialEq)]
pub enum OpRecord {
    /// create/delete/status request: a single NUL-terminated name.
    Name(String),
    /// read request: `(length, offset)`.
    ReadReq { length: u64, offset: u64 },
    /// write request: `(length, offset)`; payload bytes follow in the bulk
    /// region, in op order.
    WriteReq { length: u64, offset: u64 },
    /// read reply: `nbytes`; payload bytes follow in the bulk region.
    ReadReply { nbytes: u64 },
    /// write reply: bytes actually written.
    WriteReply { nbytes: u64 },
    /// status reply: `(mtime, size)`.
    StatusReply { mtime: u64, size: u64 },
    /// create/delete/status reply: empty acknowledgement.
    Ack,
    /// KV put request: key plus a value length; value bytes follow in bulk.
    KvPut { key: String, value_len: u32 },
    /// KV delete / get request: just a key.
    KvKey(String),
    /// KV get-all / get-by-prefix request: an optional prefix (empty = all).
    KvPrefix(String),
    /// KV get/get-all/get-by-prefix reply entry: a value length (0 = end of
    /// iteration); value bytes follow in bulk when length > 0.
    KvValue { value_len: u32 },
}

// ── Primitives ────────────────────────────────────────────────────────────────

fn write_cstr(out: &mut Vec<u8>, s: &str) {
    debug_assert!(!s.as_bytes().contains(&0), "namespace/key must not contain NUL");
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

fn read_cstr(buf: &mut Bytes) -> Result<String, WireError> {
    let nul_at = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or(WireError::UnterminatedString)?;
    let raw = buf.split_to(nul_at);
    buf.advance(1); // the NUL terminator
    String::from_utf8(raw.to_vec()).map_err(|_| WireError::InvalidUtf8)
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Accumulates operation records and bulk bytes into one framed message.
pub struct MessageBuilder {
    kind: MessageType,
    id: u32,
    flags: Flags,
    transform: Option<(TransformMode, TransformType)>,
    namespace: Option<String>,
    target_name: Option<String>,
    ops: Vec<u8>,
    bulk: Vec<u8>,
    count: u16,
}

impl MessageBuilder {
    pub fn new(kind: MessageType, id: u32, safety: Safety) -> Self {
        Self {
            kind,
            id,
            flags: Flags::for_safety(safety),
            transform: None,
            namespace: None,
            target_name: None,
            ops: Vec::new(),
            bulk: Vec::new(),
            count: 0,
        }
    }

    pub fn reply_to(header: &MessageHeader) -> Self {
        let kind = header.kind().unwrap_or(MessageType::None);
        Self {
            kind,
            id: header.id,
            flags: header.flags().as_reply(),
            transform: None,
            namespace: None,
            target_name: None,
            ops: Vec::new(),
            bulk: Vec::new(),
            count: 0,
        }
    }

    pub fn with_transform(mut self, mode: TransformMode, ty: TransformType) -> Self {
        self.transform = Some((mode, ty));
        self
    }

    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = Some(ns.into());
        self
    }

    /// Set the single object name every read/write op in this message
    /// targets (spec §6 — read/write ops carry no name of their own).
    pub fn with_target_name(mut self, name: impl Into<String>) -> Self {
        self.target_name = Some(name.into());
        self
    }

    fn bump(&mut self) {
        self.count += 1;
    }

    pub fn add_name(&mut self, name: &str) -> &mut Self {
        write_cstr(&mut self.ops, name);
        self.bump();
        self
    }

    pub fn add_read_req(&mut self, length: u64, offset: u64) -> &mut Self {
        self.ops.extend_from_slice(&length.to_le_bytes());
        self.ops.extend_from_slice(&offset.to_le_bytes());
        self.bump();
        self
    }

    pub fn add_write_req(&mut self, offset: u64, payload: &[u8]) -> &mut Self {
        self.ops
            .extend_from_slice(&(payload.len() as u64).to_le_bytes());
        self.ops.extend_from_slice(&offset.to_le_bytes());
        self.bulk.extend_from_slice(payload);
        self.bump();
        self
    }

    pub fn add_read_reply(&mut self, payload: &[u8]) -> &mut Self {
        self.ops
            .extend_from_slice(&(payload.len() as u64).to_le_bytes());
        self.bulk.extend_from_slice(payload);
        self.bump();
        self
    }

    pub fn add_write_reply(&mut self, nbytes: u64) -> &mut Self {
        self.ops.extend_from_slice(&nbytes.to_le_bytes());
        self.bump();
        self
    }

    pub fn add_status_reply(&mut self, mtime: u64, size: u64) -> &mut Self {
        self.ops.extend_from_slice(&mtime.to_le_bytes());
        self.ops.extend_from_slice(&size.to_le_bytes());
        self.bump();
        self
    }

    pub fn add_ack(&mut self) -> &mut Self {
        self.bump();
        self
    }

    pub fn add_kv_put(&mut self, key: &str, value: &[u8]) -> &mut Self {
        write_cstr(&mut self.ops, key);
        self.ops
            .extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.bulk.extend_from_slice(value);
        self.bump();
        self
    }

    pub fn add_kv_key(&mut self, key: &str) -> &mut Self {
        write_cstr(&mut self.ops, key);
        self.bump();
        self
    }

    pub fn add_kv_prefix(&mut self, prefix: &str) -> &mut Self {
        write_cstr(&mut self.ops, prefix);
        self.bump();
        self
    }

    pub fn add_kv_value(&mut self, value: Option<&[u8]>) -> &mut Self {
        let len = value.map(|v| v.len()).unwrap_or(0) as u32;
        self.ops.extend_from_slice(&len.to_le_bytes());
        if let Some(v) = value {
            self.bulk.extend_from_slice(v);
        }
        self.bump();
        self
    }

    /// Assemble the complete framed message.
    pub fn finish(self) -> BytesMut {
        let mut area = Vec::new();
        if let Some((mode, ty)) = self.transform {
            area.push(mode as u8);
            area.push(ty as u8);
        }
        if let Some(ns) = &self.namespace {
            write_cstr(&mut area, ns);
        }
        if let Some(name) = &self.target_name {
            write_cstr(&mut area, name);
        }
        area.extend_from_slice(&self.ops);
        area.extend_from_slice(&self.bulk);

        let header = MessageHeader {
            length: area.len() as u32,
            id: self.id,
            flags: self.flags.bits(),
            kind: self.kind as u8,
            count: self.count,
        };

        let mut out = BytesMut::with_capacity(12 + area.len());
        out.extend_from_slice(header_bytes(&header).as_ref());
        out.extend_from_slice(&area);
        out
    }
}

fn header_bytes(header: &MessageHeader) -> [u8; 12] {
    // Packed-field reads require a local copy to avoid unaligned references.
    let length = header.length;
    let id = header.id;
    let count = header.count;
    let mut out = [0u8; 12];
    out[0..4].copy_from_slice(&length.to_le_bytes());
    out[4..8].copy_from_slice(&id.to_le_bytes());
    out[8] = header.flags;
    out[9] = header.kind;
    out[10..12].copy_from_slice(&count.to_le_bytes());
    out
}

pub fn read_header(buf: &[u8]) -> Result<MessageHeader, WireError> {
    if buf.len() < 12 {
        return Err(WireError::Truncated {
            needed: 12,
            available: buf.len(),
        });
    }
    Ok(MessageHeader {
        length: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
        id: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
        flags: buf[8],
        kind: buf[9],
        count: u16::from_le_bytes(buf[10..12].try_into().unwrap()),
    })
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// A fully parsed message: header, transformation prefix, namespace, the
/// `count` operation records, and the trailing bulk region.
pub struct Message {
    pub header: MessageHeader,
    pub transform: Option<(TransformMode, TransformType)>,
    pub namespace: Option<String>,
    /// The single object every read/write op in this message targets
    /// (`None` for message kinds that name their target per-op instead).
    pub target_name: Option<String>,
    pub ops: Vec<OpRecord>,
    bulk: Bytes,
    bulk_cursor: std::cell::Cell<usize>,
}

impl Message {
    /// Parse a complete framed message: `header_bytes` is the 12-byte
    /// header, `body` is exactly `header.length` further bytes.
    pub fn parse(header: MessageHeader, body: Bytes) -> Result<Self, WireError> {
        let kind = header.kind()?;
        let mut cursor = body;

        let transform = if kind.carries_transform_prefix() {
            if cursor.len() < 2 {
                return Err(WireError::Truncated {
                    needed: 2,
                    available: cursor.len(),
                });
            }
            let mode = TransformMode::from(cursor[0]);
            let ty = TransformType::from(cursor[1]);
            cursor.advance(2);
            Some((mode, ty))
        } else {
            None
        };

        let is_reply = header.flags().is_reply();
        let namespace = if kind.carries_namespace() && !is_reply {
            Some(read_cstr(&mut cursor)?)
        } else {
            None
        };

        let target_name = if kind.carries_target_name() && !is_reply {
            Some(read_cstr(&mut cursor)?)
        } else {
            None
        };

        let mut ops = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            ops.push(read_op(kind, is_reply, &mut cursor)?);
        }

        Ok(Message {
            header,
            transform,
            namespace,
            target_name,
            ops,
            bulk: cursor,
            bulk_cursor: std::cell::Cell::new(0),
        })
    }

    /// Pull the next `len` bytes out of the bulk region, in order. Used to
    /// walk write-request payloads / read-reply payloads / KV values that
    /// follow their fixed-size op record.
    pub fn next_bulk(&self, len: usize) -> Result<Bytes, WireError> {
        let start = self.bulk_cursor.get();
        let end = start + len;
        if end > self.bulk.len() {
            return Err(WireError::Truncated {
                needed: end,
                available: self.bulk.len(),
            });
        }
        self.bulk_cursor.set(end);
        Ok(self.bulk.slice(start..end))
    }
}

fn read_op(kind: MessageType, is_reply: bool, buf: &mut Bytes) -> Result<OpRecord, WireError> {
    use MessageType::*;
    let need = |buf: &Bytes, n: usize| -> Result<(), WireError> {
        if buf.len() < n {
            Err(WireError::Truncated {
                needed: n,
                available: buf.len(),
            })
        } else {
            Ok(())
        }
    };

    Ok(match (kind, is_reply) {
        (ObjectCreate | ObjectDelete | ObjectStatus | TransformationObjectCreate, false) => {
            OpRecord::Name(read_cstr(buf)?)
        }
        (ObjectDelete | TransformationObjectDelete, true) => OpRecord::Ack,
        (ObjectCreate | TransformationObjectCreate, true) => OpRecord::Ack,
        (TransformationObjectDelete, false) | (TransformationObjectStatus, false) => {
            OpRecord::Name(read_cstr(buf)?)
        }
        (ObjectRead | TransformationObjectRead, false) => {
            need(buf, 16)?;
            let length = u64::from_le_bytes(buf[0..8].try_into().unwrap());
            let offset = u64::from_le_bytes(buf[8..16].try_into().unwrap());
            buf.advance(16);
            OpRecord::ReadReq { length, offset }
        }
        (ObjectWrite | TransformationObjectWrite, false) => {
            need(buf, 16)?;
            let length = u64::from_le_bytes(buf[0..8].try_into().unwrap());
            let offset = u64::from_le_bytes(buf[8..16].try_into().unwrap());
            buf.advance(16);
            OpRecord::WriteReq { length, offset }
        }
        (ObjectRead | TransformationObjectRead, true) => {
            need(buf, 8)?;
            let nbytes = u64::from_le_bytes(buf[0..8].try_into().unwrap());
            buf.advance(8);
            OpRecord::ReadReply { nbytes }
        }
        (ObjectWrite | TransformationObjectWrite, true) => {
            need(buf, 8)?;
            let nbytes = u64::from_le_bytes(buf[0..8].try_into().unwrap());
            buf.advance(8);
            OpRecord::WriteReply { nbytes }
        }
        (ObjectStatus | TransformationObjectStatus, true) => {
            need(buf, 16)?;
            let mtime = u64::from_le_bytes(buf[0..8].try_into().unwrap());
            let size = u64::from_le_bytes(buf[8..16].try_into().unwrap());
            buf.advance(16);
            OpRecord::StatusReply { mtime, size }
        }
        (KvPut, false) => {
            let key = read_cstr(buf)?;
            need(buf, 4)?;
            let value_len = u32::from_le_bytes(buf[0..4].try_into().unwrap());
            buf.advance(4);
            OpRecord::KvPut { key, value_len }
        }
        (KvDelete | KvGet, false) => OpRecord::KvKey(read_cstr(buf)?),
        (KvGetAll, false) => OpRecord::KvPrefix(String::new()),
        (KvGetByPrefix, false) => OpRecord::KvPrefix(read_cstr(buf)?),
        (KvPut | KvDelete, true) => OpRecord::Ack,
        (KvGet | KvGetAll | KvGetByPrefix, true) => {
            need(buf, 4)?;
            let value_len = u32::from_le_bytes(buf[0..4].try_into().unwrap());
            buf.advance(4);
            OpRecord::KvValue { value_len }
        }
        (other, reply) => {
            return Err(WireError::UnknownMessageType(other as u8 + if reply { 128 } else { 0 }))
        }
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Safety;

    fn roundtrip(msg: BytesMut) -> Message {
        let header = read_header(&msg).unwrap();
        let body = Bytes::copy_from_slice(&msg[12..]);
        Message::parse(header, body).unwrap()
    }

    #[test]
    fn object_create_round_trip() {
        let mut b = MessageBuilder::new(MessageType::ObjectCreate, 1, Safety::None)
            .with_namespace("bench");
        b.add_name("o1").add_name("o2");
        let msg = roundtrip(b.finish());
        assert_eq!(msg.namespace.as_deref(), Some("bench"));
        assert_eq!(msg.header.count, 2);
        assert_eq!(msg.ops[0], OpRecord::Name("o1".into()));
        assert_eq!(msg.ops[1], OpRecord::Name("o2".into()));
    }

    #[test]
    fn object_write_round_trip_with_bulk() {
        let mut b = MessageBuilder::new(MessageType::ObjectWrite, 9, Safety::Network)
            .with_namespace("bench");
        b.add_write_req(0, b"hello").add_write_req(5, b"world!");
        let msg = roundtrip(b.finish());
        assert_eq!(msg.ops[0], OpRecord::WriteReq { length: 5, offset: 0 });
        assert_eq!(
            msg.ops[1],
            OpRecord::WriteReq {
                length: 6,
                offset: 5
            }
        );
        assert_eq!(&msg.next_bulk(5).unwrap()[..], b"hello");
        assert_eq!(&msg.next_bulk(6).unwrap()[..], b"world!");
    }

    #[test]
    fn transformation_object_read_carries_prefix() {
        let mut b = MessageBuilder::new(MessageType::TransformationObjectRead, 3, Safety::None)
            .with_transform(TransformMode::Client, TransformType::Xor)
            .with_namespace("bench");
        b.add_read_req(4, 0);
        let msg = roundtrip(b.finish());
        assert_eq!(
            msg.transform,
            Some((TransformMode::Client, TransformType::Xor))
        );
        assert_eq!(msg.ops[0], OpRecord::ReadReq { length: 4, offset: 0 });
    }

    #[test]
    fn reply_copies_id_and_sets_reply_flag() {
        let req = MessageBuilder::new(MessageType::ObjectWrite, 42, Safety::Network)
            .with_namespace("bench")
            .finish();
        let header = read_header(&req).unwrap();

        let mut reply = MessageBuilder::reply_to(&header);
        reply.add_write_reply(5);
        let reply_msg = reply.finish();
        let reply_header = read_header(&reply_msg).unwrap();
        assert_eq!(reply_header.id, 42);
        assert!(reply_header.flags().is_reply());
    }

    #[test]
    fn reply_has_no_namespace() {
        let req = MessageBuilder::new(MessageType::ObjectRead, 1, Safety::None)
            .with_namespace("bench")
            .finish();
        let header = read_header(&req).unwrap();
        let mut reply = MessageBuilder::reply_to(&header);
        reply.add_read_reply(b"payload");
        let bytes = reply.finish();
        let reply_header = read_header(&bytes).unwrap();
        let body = Bytes::copy_from_slice(&bytes[12..]);
        let parsed = Message::parse(reply_header, body).unwrap();
        assert!(parsed.namespace.is_none());
        assert_eq!(parsed.ops[0], OpRecord::ReadReply { nbytes: 7 });
        assert_eq!(&parsed.next_bulk(7).unwrap()[..], b"payload");
    }

    #[test]
    fn kv_put_and_get_reply_round_trip() {
        let mut b = MessageBuilder::new(MessageType::KvPut, 2, Safety::Network);
        b.add_kv_put("name", b"bench\0o1");
        let msg = roundtrip(b.finish());
        assert_eq!(
            msg.ops[0],
            OpRecord::KvPut {
                key: "name".into(),
                value_len: 8
            }
        );
        assert_eq!(&msg.next_bulk(8).unwrap()[..], b"bench\0o1");

        let mut reply = MessageBuilder::new(MessageType::KvGet, 2, Safety::None);
        reply.add_kv_value(Some(b"value"));
        reply.add_kv_value(None);
        let reply_msg = roundtrip(reply.finish());
        assert_eq!(reply_msg.ops[0], OpRecord::KvValue { value_len: 5 });
        assert_eq!(reply_msg.ops[1], OpRecord::KvValue { value_len: 0 });
    }

    #[test]
    fn truncated_header_is_rejected() {
        assert!(read_header(&[0u8; 4]).is_err());
    }

    #[test]
    fn read_write_requests_carry_a_target_name() {
        let mut b = MessageBuilder::new(MessageType::ObjectWrite, 4, Safety::None)
            .with_namespace("bench")
            .with_target_name("o1");
        b.add_write_req(0, b"hi");
        let msg = roundtrip(b.finish());
        assert_eq!(msg.namespace.as_deref(), Some("bench"));
        assert_eq!(msg.target_name.as_deref(), Some("o1"));
        assert_eq!(msg.ops[0], OpRecord::WriteReq { length: 2, offset: 0 });
    }

    #[test]
    fn target_name_absent_for_kinds_that_name_per_op() {
        let mut b = MessageBuilder::new(MessageType::ObjectCreate, 5, Safety::None)
            .with_namespace("bench");
        b.add_name("o1");
        let msg = roundtrip(b.finish());
        assert!(msg.target_name.is_none());
    }
}
