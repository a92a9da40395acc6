//! The atomic unit of durability: one recorded mutation.

use serde::{Deserialize, Serialize};

/// Monotonically increasing position of an [`Event`] within a single log.
///
/// Assigned exclusively by the logger on append; callers never supply it.
pub type Sequence = u64;

/// Kind of mutation an [`Event`] records.
///
/// The numeric encoding is stable and used in persisted form: `Delete = 1`,
/// `Put = 2`. `0` is reserved and must never appear on the wire or on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventKind {
    Delete = 1,
    Put = 2,
}

impl EventKind {
    /// Decodes the stable numeric encoding, rejecting the reserved `0` and
    /// any value outside `{1, 2}`.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Delete),
            2 => Some(Self::Put),
            _ => None,
        }
    }

    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// One recorded mutation: a sequence number, its kind, and the key/value it
/// applies to. `value` is empty when `kind` is [`EventKind::Delete`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub sequence: Sequence,
    pub kind: EventKind,
    pub key: String,
    pub value: String,
}

impl Event {
    #[must_use]
    pub fn put(sequence: Sequence, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            sequence,
            kind: EventKind::Put,
            key: key.into(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn delete(sequence: Sequence, key: impl Into<String>) -> Self {
        Self {
            sequence,
            kind: EventKind::Delete,
            key: key.into(),
            value: String::new(),
        }
    }
}
