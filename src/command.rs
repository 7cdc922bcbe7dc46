//! Client command lifecycle: state machine (§4.3) and the `Command` value
//! it's attached to (§3).

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{ChannelError, CommandStatus, TaskMgmtStatus};
use crate::serial::{ExchangeId, SerialNumber};
use crate::slot::SlotId;
use crate::taskmgmt::TaskMgmtBarrier;
use crate::transport::TransportId;

/// States from §4.3. Once `Final`, no further transitions are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Initial,
    Active,
    Pending,
    Retry,
    Indoubt,
    Abort,
    Final,
}

/// Named transitions from the table in §4.3, kept distinct from the
/// resulting state so logs and errors can name *why* a transition happened,
/// not just what it landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// INITIAL → ACTIVE: immediate start.
    T1,
    /// ACTIVE → FINAL: response received.
    T2,
    /// INITIAL → PENDING: no slot / stale / throttled.
    T3,
    /// PENDING → ACTIVE: channel ready.
    T4,
    /// ACTIVE → RETRY: transport reset.
    T5,
    /// ACTIVE → ABORT: abort in-flight.
    T6,
    /// RETRY → ABORT: abort while waiting.
    T7,
    /// ABORT → FINAL: target done.
    T8,
    /// RETRY → ACTIVE: resent.
    T9,
    /// PENDING → FINAL: aborted while pending.
    T10,
    /// INDOUBT → ABORT: abort issued (re-send).
    T11,
    /// ABORT → INDOUBT: abort's own transport failed.
    T12,
    /// RETRY → FINAL: reset (disconnect).
    T13,
}

#[derive(Debug, Error)]
#[error("illegal command transition: {transition:?} does not go from {from:?} to {to:?}")]
pub struct IllegalTransition {
    pub from: CommandState,
    pub to: CommandState,
    pub transition: Transition,
}

impl Transition {
    fn endpoints(self) -> (CommandState, CommandState) {
        use CommandState::*;
        match self {
            Transition::T1 => (Initial, Active),
            Transition::T2 => (Active, Final),
            Transition::T3 => (Initial, Pending),
            Transition::T4 => (Pending, Active),
            Transition::T5 => (Active, Retry),
            Transition::T6 => (Active, Abort),
            Transition::T7 => (Retry, Abort),
            Transition::T8 => (Abort, Final),
            Transition::T9 => (Retry, Active),
            Transition::T10 => (Pending, Final),
            Transition::T11 => (Indoubt, Abort),
            Transition::T12 => (Abort, Indoubt),
            Transition::T13 => (Retry, Final),
        }
    }
}

/// Subordinate exchange bound to one command (§3).
#[derive(Debug, Clone)]
pub struct Abort {
    pub target_xid: ExchangeId,
    pub target_command_sn: SerialNumber,
    pub target_slot_id: SlotId,
    pub target_slot_sn: SerialNumber,
    pub status: Option<TaskMgmtStatus>,
}

/// One in-flight or completed command, per §3's data model.
pub struct Command {
    pub xid: ExchangeId,
    pub command_sn: Option<SerialNumber>,
    pub idempotent: bool,
    pub request: Vec<u8>,
    pub slot: Option<SlotId>,
    pub transport: Option<TransportId>,
    pub status: Option<CommandStatus>,
    pub abort: Option<Abort>,
    state: CommandState,
    /// `Arc`-wrapped so callers can clone it out from under a registry
    /// borrow before blocking on it — see `Channel::retry_task`.
    pub barrier: std::sync::Arc<TaskMgmtBarrier>,
    /// Fulfilled exactly once, when the command reaches FINAL.
    completion: Option<oneshot::Sender<Result<Vec<u8>, ChannelError>>>,
}

impl Command {
    pub fn new(xid: ExchangeId, request: Vec<u8>, idempotent: bool) -> (Self, oneshot::Receiver<Result<Vec<u8>, ChannelError>>) {
        let (tx, rx) = oneshot::channel();
        let command = Self {
            xid,
            command_sn: None,
            idempotent,
            request,
            slot: None,
            transport: None,
            status: None,
            abort: None,
            state: CommandState::Initial,
            barrier: std::sync::Arc::new(TaskMgmtBarrier::new()),
            completion: Some(tx),
        };
        (command, rx)
    }

    pub fn state(&self) -> CommandState {
        self.state
    }

    pub fn is_final(&self) -> bool {
        self.state == CommandState::Final
    }

    /// Apply a named transition, validating it against the table in §4.3.
    pub fn transition(&mut self, transition: Transition) -> Result<(), IllegalTransition> {
        let (from, to) = transition.endpoints();
        if self.state != from {
            return Err(IllegalTransition { from: self.state, to, transition });
        }
        debug!(xid = %self.xid, transition = ?transition, from = ?self.state, to = ?to, "command state transition");
        self.state = to;
        Ok(())
    }

    /// Complete the command's future. Must only be called once, when
    /// entering FINAL; subsequent calls are a no-op (the receiver simply
    /// observes the channel closed if this is ever hit twice due to a bug).
    pub fn complete(&mut self, result: Result<Vec<u8>, ChannelError>) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(result);
        }
    }
}
