//! Strata wire format — the on-wire header, message type numbering, and
//! safety flags. These types ARE the protocol: field order and size are
//! fixed across client and server. All header types are `#[repr(C, packed)]`
//! with `zerocopy` derives for safe, allocation-free (de)serialization —
//! there is no unsafe code in this module.
//!
//! Layout is native byte order. Every platform Strata targets is
//! little-endian, so this matches spec's "little-endian" requirement
//! without pulling in an explicit byteorder conversion step.

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Message Header ────────────────────────────────────────────────────────────

/// Fixed 12-byte header preceding every message.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct MessageHeader {
    /// Total payload bytes following this header (ops array + bulk region).
    pub length: u32,
    /// Monotonic per-connection message id. A reply copies its request's id.
    pub id: u32,
    /// Bitfield: 0x01 reply, 0x02 safety=STORAGE, 0x04 safety=NETWORK.
    pub flags: u8,
    /// Message kind — see `MessageType`.
    pub kind: u8,
    /// Number of logical operations carried by this message.
    pub count: u16,
}

assert_eq_size!(MessageHeader, [u8; 12]);

impl MessageHeader {
    pub fn new(id: u32, kind: MessageType, flags: Flags, count: u16) -> Self {
        Self {
            length: 0,
            id,
            flags: flags.bits(),
            kind: kind as u8,
            count,
        }
    }

    pub fn flags(&self) -> Flags {
        Flags::from_bits(self.flags)
    }

    pub fn kind(&self) -> Result<MessageType, WireError> {
        MessageType::try_from(self.kind)
    }
}

// ── Flags ─────────────────────────────────────────────────────────────────────

/// Bitfield flags carried in `MessageHeader::flags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u8);

pub const FLAG_REPLY: u8 = 0x01;
pub const FLAG_SAFETY_STORAGE: u8 = 0x02;
pub const FLAG_SAFETY_NETWORK: u8 = 0x04;

impl Flags {
    pub const NONE: Flags = Flags(0);

    pub fn from_bits(bits: u8) -> Self {
        Flags(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn for_safety(safety: Safety) -> Self {
        match safety {
            Safety::None => Flags(0),
            Safety::Network => Flags(FLAG_SAFETY_NETWORK),
            Safety::Storage => Flags(FLAG_SAFETY_STORAGE),
        }
    }

    pub fn is_reply(self) -> bool {
        self.0 & FLAG_REPLY != 0
    }

    pub fn as_reply(self) -> Self {
        Flags(self.0 | FLAG_REPLY)
    }

    pub fn safety(self) -> Safety {
        if self.0 & FLAG_SAFETY_STORAGE != 0 {
            Safety::Storage
        } else if self.0 & FLAG_SAFETY_NETWORK != 0 {
            Safety::Network
        } else {
            Safety::None
        }
    }
}

/// Per-batch safety level. Governs reply synchrony and, server-side,
/// whether a `sync` is issued before acknowledging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Safety {
    /// No reply required for write/create/delete; server MAY send none.
    #[default]
    None,
    /// Server MUST reply after each write/create/delete group.
    Network,
    /// Like `Network`, plus the server syncs to stable storage first.
    Storage,
}

impl Safety {
    /// Reads and status always require a reply, independent of safety.
    pub fn requires_reply_for_write(self) -> bool {
        !matches!(self, Safety::None)
    }

    pub fn requires_sync(self) -> bool {
        matches!(self, Safety::Storage)
    }
}

// ── Message Type ──────────────────────────────────────────────────────────────

/// Message kind — fixed numeric assignment, must match across client and
/// server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    None = 0,
    ObjectCreate = 1,
    ObjectDelete = 2,
    ObjectRead = 3,
    ObjectWrite = 4,
    ObjectStatus = 5,
    TransformationObjectCreate = 6,
    TransformationObjectDelete = 7,
    TransformationObjectRead = 8,
    TransformationObjectWrite = 9,
    TransformationObjectStatus = 10,
    KvPut = 11,
    KvDelete = 12,
    KvGet = 13,
    KvGetAll = 14,
    KvGetByPrefix = 15,
    Statistics = 16,
    Ping = 17,
}

impl MessageType {
    /// True for the five `TRANSFORMATION_OBJECT_*` kinds, which carry an
    /// extra `(mode, type)` prefix in the header area (spec §6).
    pub fn carries_transform_prefix(self) -> bool {
        matches!(
            self,
            MessageType::TransformationObjectCreate
                | MessageType::TransformationObjectDelete
                | MessageType::TransformationObjectRead
                | MessageType::TransformationObjectWrite
                | MessageType::TransformationObjectStatus
        )
    }

    /// True for kinds whose header area carries a namespace string once.
    pub fn carries_namespace(self) -> bool {
        !matches!(
            self,
            MessageType::None | MessageType::Statistics | MessageType::Ping
        )
    }

    /// True for the kinds whose per-op records omit a name (`ReadReq`,
    /// `WriteReq`) because every op in the message targets the same
    /// object — that object's name is instead carried once in the header
    /// area, directly after the namespace.
    pub fn carries_target_name(self) -> bool {
        matches!(
            self,
            MessageType::ObjectRead
                | MessageType::ObjectWrite
                | MessageType::TransformationObjectRead
                | MessageType::TransformationObjectWrite
        )
    }
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use MessageType::*;
        Ok(match value {
            0 => None,
            1 => ObjectCreate,
            2 => ObjectDelete,
            3 => ObjectRead,
            4 => ObjectWrite,
            5 => ObjectStatus,
            6 => TransformationObjectCreate,
            7 => TransformationObjectDelete,
            8 => TransformationObjectRead,
            9 => TransformationObjectWrite,
            10 => TransformationObjectStatus,
            11 => KvPut,
            12 => KvDelete,
            13 => KvGet,
            14 => KvGetAll,
            15 => KvGetByPrefix,
            16 => Statistics,
            17 => Ping,
            other => return Err(WireError::UnknownMessageType(other)),
        })
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Default connection-pool cap per `(backend_kind, server_index)`.
pub const DEFAULT_POOL_SIZE: u32 = 8;

/// Default per-worker scratch region size (spec §4.8, §8 S6).
pub const DEFAULT_STRIPE_SIZE: u64 = 1024 * 1024;

/// Default `max_operation_size` — large per-op payloads are split above this.
pub const DEFAULT_MAX_OPERATION_SIZE: u64 = 8 * 1024 * 1024;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown message type byte: {0}")]
    UnknownMessageType(u8),

    #[error("message truncated: needed {needed} bytes, had {available}")]
    Truncated { needed: usize, available: usize },

    #[error("string is not NUL-terminated")]
    UnterminatedString,

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("reply id {got} does not match request id {expected}")]
    IdMismatch { expected: u32, got: u32 },

    #[error("reply operation count {got} does not match request count {expected}")]
    CountMismatch { expected: u16, got: u16 },
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = MessageHeader {
            length: 128,
            id: 7,
            flags: FLAG_SAFETY_NETWORK,
            kind: MessageType::ObjectRead as u8,
            count: 3,
        };
        let bytes = header.as_bytes();
        assert_eq!(bytes.len(), 12);

        let recovered = MessageHeader::read_from(bytes).unwrap();
        let length = recovered.length;
        let id = recovered.id;
        let count = recovered.count;
        assert_eq!(length, 128);
        assert_eq!(id, 7);
        assert_eq!(count, 3);
        assert_eq!(recovered.kind().unwrap(), MessageType::ObjectRead);
        assert!(recovered.flags().safety() == Safety::Network);
    }

    #[test]
    fn flags_round_trip_each_safety() {
        for safety in [Safety::None, Safety::Network, Safety::Storage] {
            let flags = Flags::for_safety(safety);
            assert_eq!(flags.safety(), safety);
            assert!(!flags.is_reply());
            assert!(flags.as_reply().is_reply());
        }
    }

    #[test]
    fn message_type_round_trip() {
        for raw in 0u8..=17 {
            let kind = MessageType::try_from(raw).unwrap();
            assert_eq!(kind as u8, raw);
        }
        assert!(MessageType::try_from(18).is_err());
    }

    #[test]
    fn transform_prefix_only_on_transformation_kinds() {
        assert!(MessageType::TransformationObjectRead.carries_transform_prefix());
        assert!(!MessageType::ObjectRead.carries_transform_prefix());
        assert!(!MessageType::KvGet.carries_transform_prefix());
    }

    #[test]
    fn target_name_only_on_read_write_kinds() {
        assert!(MessageType::ObjectRead.carries_target_name());
        assert!(MessageType::TransformationObjectWrite.carries_target_name());
        assert!(!MessageType::ObjectCreate.carries_target_name());
        assert!(!MessageType::ObjectStatus.carries_target_name());
        assert!(!MessageType::KvGet.carries_target_name());
    }

    #[test]
    fn namespace_absent_for_control_kinds() {
        assert!(!MessageType::Ping.carries_namespace());
        assert!(!MessageType::Statistics.carries_namespace());
        assert!(MessageType::ObjectCreate.carries_namespace());
    }

    #[test]
    fn safety_requires_reply_for_write_except_none() {
        assert!(!Safety::None.requires_reply_for_write());
        assert!(Safety::Network.requires_reply_for_write());
        assert!(Safety::Storage.requires_reply_for_write());
        assert!(Safety::Storage.requires_sync());
        assert!(!Safety::Network.requires_sync());
    }
}
