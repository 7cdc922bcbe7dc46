//! Wire status enums and the application-facing error taxonomy.
//!
//! [`FrameError`] (see [`crate::frame`]) never crosses into application
//! code: the channel's decode loop maps every frame-level fault into a
//! transport reset and drives the retry machinery internally. What the
//! application actually observes is [`ChannelError`], returned through a
//! command's future.

use thiserror::Error;

/// Outcome of a `COMMAND_RESP` frame, from §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CommandStatus {
    Success = 0,
    SlotUncached = 1,
    SlotIdInvalid = 2,
    SlotMaxInvalid = 3,
    SlotSeqMisordered = 4,
    SlotFalseRetry = 5,
}

impl CommandStatus {
    pub fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            0 => Self::Success,
            1 => Self::SlotUncached,
            2 => Self::SlotIdInvalid,
            3 => Self::SlotMaxInvalid,
            4 => Self::SlotSeqMisordered,
            5 => Self::SlotFalseRetry,
            _ => return None,
        })
    }
}

/// Outcome of a `TASKMGMT_RESP` frame, from §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TaskMgmtStatus {
    AlreadyCompleted = 0,
    AbortedBeforeArrival = 1,
    AbortedBeforeStart = 2,
    AbortedAfterStart = 3,
    Unabortable = 4,
    AbortedSlotFailure = 5,
}

impl TaskMgmtStatus {
    pub fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            0 => Self::AlreadyCompleted,
            1 => Self::AbortedBeforeArrival,
            2 => Self::AbortedBeforeStart,
            3 => Self::AbortedAfterStart,
            4 => Self::Unabortable,
            5 => Self::AbortedSlotFailure,
            _ => return None,
        })
    }

    /// Whether the slot table should confirm (true) or roll back (false)
    /// per §4.2's "confirm-or-rollback according to TaskMgmtStatus".
    pub fn confirms_slot(self) -> bool {
        matches!(self, Self::AlreadyCompleted | Self::AbortedAfterStart)
    }
}

/// Outcome of a login collaborator exchange. Not exercised by the core;
/// carried so `ChannelError::NexusReset` can report why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum LoginStatus {
    Success = 0,
    AuthenticationFailed = 1,
    VersionMismatch = 2,
    CapabilityRejected = 3,
}

/// Outcome of a logout collaborator exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum LogoutStatus {
    Success = 0,
    Timeout = 1,
}

/// The application-facing error sum. One variant per §7 propagation rule
/// that is not "invisible to the application".
#[derive(Debug, Error)]
pub enum ChannelError {
    /// §7.2: a `SLOT_*` status other than `SLOT_UNCACHED` on an idempotent command.
    #[error("command failed with slot status {0:?}")]
    CommandFailed(CommandStatus),

    /// §7.3: `SLOT_UNCACHED` on an idempotent command whose cached response
    /// was evicted server-side; the application must reissue.
    #[error("idempotent command's cached response was evicted; reissue")]
    IdempotentRetry,

    /// §7.5: the channel can no longer make progress; every outstanding
    /// command completes with this.
    #[error("nexus reset: channel can no longer make progress")]
    NexusReset,

    /// §5: a synchronous or asynchronous cancel completed the command.
    #[error("command cancelled")]
    Cancelled,

    /// §7.6: task management returned `UNABORTABLE`.
    #[error("abort failed: target command is unabortable")]
    AbortFailed,

    /// §7: application codec failure, passed through opaquely.
    #[error("service codec error: {0}")]
    Codec(#[source] anyhow::Error),

    /// §7: transport I/O failure that the retry machinery could not absorb.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}
