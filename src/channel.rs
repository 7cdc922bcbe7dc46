//! Client channel: command registry, queues, and the three background
//! tasks (restart, retry, abort) that drive commands through the state
//! machine in §4.3. One `Channel` is the fore or back side of a [`crate::session::Nexus`].
//!
//! This implementation covers the no-sync dispatch mode in full; sync
//! dispatch (parking the caller's own context while PENDING instead of
//! returning immediately) collapses naturally here: `execute` is itself an
//! `async fn`, so the calling task already suspends at the `.await` on its
//! completion channel. There is no separate "dispatching thread" to park
//! the way a thread-per-call model needs — the restart task performs the
//! actual send once conditions allow, and the caller's future simply
//! resolves when the completion channel fires.
//!
//! Simplification carried over into `DESIGN.md`: outbound frames advertise
//! this channel's *own* slot table sizes in `currentMaxSlotID`/`targetMaxSlotID`,
//! and inbound frames are applied to this same table via `SlotTable::update`.
//! The source material keeps these strictly directional (the responder's
//! table size advertised to the requester); collapsing them to one shared
//! table per channel instance is simpler and preserves every invariant
//! `SlotTable::update` cares about, at the cost of not modeling asymmetric
//! table sizes between the two endpoints.
//!
//! `execute` is a thin wrapper over [`Channel::submit`] for callers that
//! only want the eventual result. Callers that need §5's cancel semantics
//! call `submit` directly and hold onto the returned [`CommandHandle`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::command::{Abort, Command, CommandState, Transition};
use crate::error::{ChannelError, CommandStatus, TaskMgmtStatus};
use crate::frame::{Frame, FrameType};
use crate::options::SessionOptions;
use crate::scheduler::TransportScheduler;
use crate::serial::{ExchangeId, ExchangeIdAllocator, SerialNumber};
use crate::slot::SlotId;
use crate::throttler::Throttler;
use crate::transport::TransportId;

struct Inner {
    registry: HashMap<ExchangeId, Command>,
    pending: VecDeque<ExchangeId>,
    retry: VecDeque<ExchangeId>,
    abort_queue: VecDeque<ExchangeId>,
    active: HashSet<ExchangeId>,
    abort_set: HashSet<ExchangeId>,
    stale: HashSet<ExchangeId>,
    /// Maps a task-management exchange's own id back to the command it targets.
    abort_exchange_targets: HashMap<ExchangeId, ExchangeId>,
    slot_table: crate::slot::SlotTable,
    command_sn: SerialNumber,
    senders: HashMap<TransportId, mpsc::UnboundedSender<Frame>>,
    shutting_down: bool,
}

impl Inner {
    fn connected(&self) -> bool {
        !self.senders.is_empty()
    }
}

/// One direction of command traffic within a session (fore or back).
pub struct Channel {
    options: Arc<SessionOptions>,
    scheduler: TransportScheduler,
    throttler: Arc<Throttler>,
    xid_alloc: Arc<ExchangeIdAllocator>,
    inner: Mutex<Inner>,
    wake_restart: mpsc::Sender<()>,
    wake_retry: mpsc::Sender<()>,
    wake_abort: mpsc::Sender<()>,
    /// The sibling channel's next expected `commandSN`, advertised in every
    /// outbound frame per §3's `expectedCommandSN` invariant. Wired up by
    /// the owning `Nexus` at construction; this channel only reads it.
    sibling_expected_command_sn: Arc<AtomicU32>,
    /// This channel's own next expected `commandSN`, advanced as commands
    /// activate. The sibling channel holds the same `Arc` as its
    /// `sibling_expected_command_sn` and reads it to fill in its outbound
    /// frames, per §3's cross-channel invariant.
    self_expected_command_sn: Arc<AtomicU32>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Channel {
    pub fn new(
        options: Arc<SessionOptions>,
        queue_depth: usize,
        xid_alloc: Arc<ExchangeIdAllocator>,
        sibling_expected_command_sn: Arc<AtomicU32>,
        self_expected_command_sn: Arc<AtomicU32>,
    ) -> Arc<Self> {
        let (wake_restart, restart_rx) = mpsc::channel(1);
        let (wake_retry, retry_rx) = mpsc::channel(1);
        let (wake_abort, abort_rx) = mpsc::channel(1);

        let channel = Arc::new(Self {
            scheduler: TransportScheduler::new(options.xport_scheduler),
            throttler: Arc::new(Throttler::new(options.bandwidth_limit)),
            xid_alloc,
            inner: Mutex::new(Inner {
                registry: HashMap::new(),
                pending: VecDeque::new(),
                retry: VecDeque::new(),
                abort_queue: VecDeque::new(),
                active: HashSet::new(),
                abort_set: HashSet::new(),
                stale: HashSet::new(),
                abort_exchange_targets: HashMap::new(),
                slot_table: crate::slot::SlotTable::new(queue_depth),
                command_sn: SerialNumber::new31(0),
                senders: HashMap::new(),
                shutting_down: false,
            }),
            wake_restart,
            wake_retry,
            wake_abort,
            sibling_expected_command_sn,
            self_expected_command_sn,
            tasks: std::sync::Mutex::new(Vec::new()),
            options,
        });

        let mut tasks = channel.tasks.lock().unwrap();
        tasks.push(tokio::spawn(Self::restart_task(channel.clone(), restart_rx)));
        tasks.push(tokio::spawn(Self::retry_task(channel.clone(), retry_rx)));
        tasks.push(tokio::spawn(Self::abort_task(channel.clone(), abort_rx)));
        drop(tasks);
        channel
    }

    fn frame_for(&self, frame_type: FrameType, xid: ExchangeId, command: &Command, slot_sn: SerialNumber, current_max: u32, target_max: u32) -> Frame {
        let mut frame = Frame::new(frame_type, command.request.clone())
            .with_exchange(xid.0)
            .with_slot(command.slot.map_or(0, |s| s.0), slot_sn.value());
        frame.command_sn = command.command_sn.map_or(0, |sn| sn.value());
        frame.expected_command_sn = self.sibling_expected_command_sn.load(Ordering::Relaxed);
        frame.current_max_slot_id = current_max;
        frame.target_max_slot_id = target_max;
        frame
    }

    /// Submit a new command and await it to FINAL, with either the response
    /// bytes or the applicable [`ChannelError`]. Equivalent to
    /// `self.submit(..).await.await` — most callers don't need the
    /// in-flight [`CommandHandle`], only the eventual result.
    pub async fn execute(self: &Arc<Self>, request: Vec<u8>, idempotent: bool) -> Result<Vec<u8>, ChannelError> {
        self.submit(request, idempotent).await.await
    }

    /// Submit a new command, returning a [`CommandHandle`] immediately
    /// rather than awaiting completion. The handle carries the command's
    /// [`ExchangeId`] and exposes §5's synchronous/asynchronous cancel, and
    /// itself implements `Future` for the eventual result.
    pub async fn submit(self: &Arc<Self>, request: Vec<u8>, idempotent: bool) -> CommandHandle {
        let xid = self.xid_alloc.alloc();
        let (mut command, rx) = Command::new(xid, request, idempotent);

        let mut inner = self.inner.lock().await;
        if inner.shutting_down {
            drop(inner);
            return CommandHandle::already_final(xid, self.clone(), Err(ChannelError::NexusReset));
        }

        let eligible = inner.connected() && inner.stale.is_empty();
        let cost = self.throttler.estimate_cost(command.request.len());
        let throttle_ok = if eligible { self.throttler.try_consume(cost).await } else { false };

        if eligible && throttle_ok {
            if let Some((slot_id, slot_sn)) = inner.slot_table.reserve() {
                self.activate_locked(&mut inner, xid, &mut command, slot_id, slot_sn).await;
            } else {
                to_pending(&mut inner, xid, &mut command);
            }
        } else {
            to_pending(&mut inner, xid, &mut command);
        }
        inner.registry.insert(xid, command);
        drop(inner);
        let _ = self.wake_restart.try_send(());

        CommandHandle { xid, channel: self.clone(), state: HandleState::Pending(rx), cancelled: false }
    }

    /// Advance this channel's own `commandSN` counter, publishing the new
    /// value to `self_expected_command_sn` so the sibling channel's outbound
    /// frames carry it (§3's `expectedCommandSN` invariant).
    fn advance_command_sn(&self, inner: &mut Inner) -> SerialNumber {
        let sn = inner.command_sn;
        inner.command_sn = inner.command_sn.next();
        self.self_expected_command_sn.store(inner.command_sn.value(), Ordering::Relaxed);
        sn
    }

    async fn activate_locked(&self, inner: &mut Inner, xid: ExchangeId, command: &mut Command, slot_id: SlotId, slot_sn: SerialNumber) {
        let sn = self.advance_command_sn(inner);
        command.command_sn = Some(sn);
        command.slot = Some(slot_id);
        command.transition(Transition::T1).expect("INITIAL -> ACTIVE always legal");
        inner.active.insert(xid);

        let current_max = inner.slot_table.current_max() as u32;
        let target_max = inner.slot_table.target_max() as u32;
        let frame = self.frame_for(FrameType::CommandReq, xid, command, slot_sn, current_max, target_max);

        match self.dispatch(inner, frame).await {
            Some(transport) => {
                command.transport = Some(transport);
                debug!(xid = %xid, transport_id = transport.0, "command dispatched");
            }
            None => {
                warn!(xid = %xid, "no live transport at dispatch time; releasing slot, command stays pending");
                inner.slot_table.release(slot_id);
                command.slot = None;
                inner.active.remove(&xid);
                command.transport = None;
            }
        }
    }

    async fn dispatch(&self, inner: &mut Inner, frame: Frame) -> Option<TransportId> {
        let id = self.scheduler.schedule().await?;
        let sender = inner.senders.get(&id)?;
        let _ = sender.send(frame);
        Some(id)
    }

    /// Attach a transport's outbound sender. The transport's own reader
    /// task is expected to forward decoded frames into [`Channel::handle_inbound`].
    pub async fn attach(self: &Arc<Self>, id: TransportId, sender: mpsc::UnboundedSender<Frame>) {
        let mut inner = self.inner.lock().await;
        let was_disconnected = !inner.connected();
        inner.senders.insert(id, sender);
        drop(inner);
        self.scheduler.attach(id).await;
        if was_disconnected {
            info!(transport_id = id.0, "channel reconnected, resuming restart/retry/abort tasks");
            let _ = self.wake_restart.try_send(());
            let _ = self.wake_retry.try_send(());
            let _ = self.wake_abort.try_send(());
        }
    }

    /// Detach a transport. If it was the last one, quiesces the channel:
    /// commands still ACTIVE on it reset to RETRY, and abort-queue entries
    /// not already stale are marked stale and completed early (with
    /// [`ChannelError::NexusReset`]) rather than blocking the application
    /// indefinitely. The command itself stays in the registry and abort
    /// queue so task management can still synchronize with the server for
    /// real once the channel reconnects; [`Channel::handle_taskmgmt_resp`]
    /// clears the entry out of `stale` when that real resolution lands.
    pub async fn detach(self: &Arc<Self>, id: TransportId) {
        self.scheduler.detach(id).await;
        let mut inner = self.inner.lock().await;
        inner.senders.remove(&id);

        let affected: Vec<ExchangeId> = inner
            .registry
            .iter()
            .filter(|(xid, c)| c.transport == Some(id) && inner.active.contains(xid) && c.state() == CommandState::Active)
            .map(|(xid, _)| *xid)
            .collect();
        for xid in affected {
            if let Some(command) = inner.registry.get_mut(&xid) {
                if command.transition(Transition::T5).is_ok() {
                    inner.active.remove(&xid);
                    inner.retry.push_back(xid);
                    warn!(xid = %xid, transport_id = id.0, "transport reset, command moved to retry");
                }
            }
        }

        if !inner.connected() {
            warn!("last transport detached; resetting non-stale abort-queue commands early");
            let newly_stale: Vec<ExchangeId> = inner.abort_queue.iter().copied().filter(|xid| !inner.stale.contains(xid)).collect();
            for xid in newly_stale {
                inner.stale.insert(xid);
                if let Some(command) = inner.registry.get_mut(&xid) {
                    command.complete(Err(ChannelError::NexusReset));
                }
            }
        }
        drop(inner);
        let _ = self.wake_retry.try_send(());
    }

    /// Synchronously initiate task management on a command: tries pending,
    /// then retry, then marks ABORT on the active set, per §4.3's race
    /// resolution. Whichever queue owns the command at the instant of the
    /// race completes the abort.
    ///
    /// Returns `true` the one time this call actually moved the command
    /// towards cancellation, `false` if `xid` is unknown, already FINAL, or
    /// already under task management from an earlier `abort` call (§5: cancel
    /// is idempotent).
    pub async fn abort(self: &Arc<Self>, xid: ExchangeId) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(command) = inner.registry.get(&xid) else {
            return false;
        };
        if command.is_final() {
            return false;
        }

        if let Some(pos) = inner.pending.iter().position(|x| *x == xid) {
            inner.pending.remove(pos);
            let slot = inner.registry.get(&xid).and_then(|c| c.slot);
            if let Some(slot) = slot {
                inner.slot_table.release(slot);
            }
            let command = inner.registry.get_mut(&xid).unwrap();
            command.transition(Transition::T10).expect("PENDING -> FINAL always legal");
            command.complete(Err(ChannelError::Cancelled));
            inner.registry.remove(&xid);
            return true;
        }
        if let Some(pos) = inner.retry.iter().position(|x| *x == xid) {
            inner.retry.remove(pos);
            let command = inner.registry.get_mut(&xid).unwrap();
            command.transition(Transition::T7).expect("RETRY -> ABORT always legal");
            inner.abort_set.insert(xid);
            inner.abort_queue.push_back(xid);
            drop(inner);
            let _ = self.wake_abort.try_send(());
            return true;
        }
        if inner.active.contains(&xid) {
            let command = inner.registry.get_mut(&xid).unwrap();
            command.transition(Transition::T6).expect("ACTIVE -> ABORT always legal");
            inner.active.remove(&xid);
            inner.abort_set.insert(xid);
            inner.abort_queue.push_back(xid);
            drop(inner);
            let _ = self.wake_abort.try_send(());
            return true;
        }
        false
    }

    /// Quiesce and finalize every still-live command with nexus-reset
    /// semantics; the registry is guaranteed empty on return.
    pub async fn shutdown(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        inner.shutting_down = true;
        for (_, mut command) in inner.registry.drain() {
            if !command.is_final() {
                command.complete(Err(ChannelError::NexusReset));
            }
        }
        inner.pending.clear();
        inner.retry.clear();
        inner.abort_queue.clear();
        inner.active.clear();
        inner.abort_set.clear();
        inner.stale.clear();
        debug_assert!(inner.registry.is_empty());
        drop(inner);

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            task.abort();
        }
    }

    /// Handle a decoded inbound frame addressed to this channel.
    pub async fn handle_inbound(self: &Arc<Self>, frame: Frame) {
        match frame.frame_type {
            FrameType::CommandResp => self.handle_command_resp(frame).await,
            FrameType::TaskmgmtResp => self.handle_taskmgmt_resp(frame).await,
            other => debug!(?other, "frame type not handled by channel directly"),
        }
    }

    async fn handle_command_resp(self: &Arc<Self>, frame: Frame) {
        let xid = ExchangeId(frame.exchange_id);
        let mut inner = self.inner.lock().await;
        inner.slot_table.update(frame.current_max_slot_id as usize, frame.target_max_slot_id as usize);
        inner.slot_table.finalize_shrink();

        let Some(status) = CommandStatus::from_u16(frame.status) else {
            warn!(xid = %xid, status = frame.status, "unknown command status");
            return;
        };

        let Some(command) = inner.registry.get_mut(&xid) else {
            return;
        };
        let slot_id = command.slot;
        command.status = Some(status);
        let idempotent = command.idempotent;

        let result = match status {
            CommandStatus::Success => {
                if let Some(id) = slot_id {
                    inner.slot_table.confirm(id, idempotent, Some(frame.payload.clone()));
                }
                Ok(frame.payload)
            }
            CommandStatus::SlotUncached if idempotent => {
                if let Some(id) = slot_id {
                    inner.slot_table.rollback(id);
                }
                Err(ChannelError::IdempotentRetry)
            }
            other => {
                if let Some(id) = slot_id {
                    inner.slot_table.rollback(id);
                }
                Err(ChannelError::CommandFailed(other))
            }
        };

        let command = inner.registry.get_mut(&xid).unwrap();
        let mut completed_transport = None;
        if command.transition(Transition::T2).is_ok() {
            if let Some(id) = slot_id {
                inner.slot_table.release(id);
            }
            inner.active.remove(&xid);
            completed_transport = command.transport;
            command.complete(result);
            inner.registry.remove(&xid);
        }
        drop(inner);
        if let Some(transport) = completed_transport {
            self.scheduler.note_completed(transport).await;
        }
        let _ = self.wake_restart.try_send(());
    }

    async fn handle_taskmgmt_resp(self: &Arc<Self>, frame: Frame) {
        let abort_xid = ExchangeId(frame.exchange_id);
        let mut inner = self.inner.lock().await;
        let Some(target_xid) = inner.abort_exchange_targets.remove(&abort_xid) else {
            return;
        };
        let Some(status) = TaskMgmtStatus::from_u16(frame.status) else {
            return;
        };
        let Some(command) = inner.registry.get_mut(&target_xid) else {
            return;
        };

        if let Some(slot_id) = command.slot {
            if status.confirms_slot() {
                inner.slot_table.confirm(slot_id, command.idempotent, None);
            } else {
                inner.slot_table.rollback(slot_id);
            }
            inner.slot_table.release(slot_id);
        }

        let completed = match command.state() {
            CommandState::Abort => command.transition(Transition::T8).is_ok(),
            CommandState::Indoubt => command.transition(Transition::T11).is_ok() && command.transition(Transition::T8).is_ok(),
            _ => false,
        };
        if completed {
            inner.abort_set.remove(&target_xid);
            // A stale entry resolving for real is the "task management
            // synchronizes with the server on reconnect" moment that lets
            // the channel resume normal dispatch again.
            inner.stale.remove(&target_xid);
            let result = match status {
                TaskMgmtStatus::Unabortable => Err(ChannelError::AbortFailed),
                _ => Err(ChannelError::Cancelled),
            };
            let command = inner.registry.get_mut(&target_xid).unwrap();
            let transport = command.transport;
            command.complete(result);
            inner.registry.remove(&target_xid);
            drop(inner);
            if let Some(transport) = transport {
                self.scheduler.note_completed(transport).await;
            }
        }
    }

    async fn restart_task(self: Arc<Self>, mut wake: mpsc::Receiver<()>) {
        loop {
            let timeout = self.options.recovery_interval();
            let _ = tokio::time::timeout(timeout, wake.recv()).await;
            let mut inner = self.inner.lock().await;
            if inner.shutting_down {
                return;
            }
            if !inner.connected() || !inner.stale.is_empty() {
                continue;
            }
            while let Some(xid) = inner.pending.front().copied() {
                let Some((slot_id, slot_sn)) = inner.slot_table.reserve() else {
                    break;
                };
                let cost = {
                    let command = inner.registry.get(&xid).unwrap();
                    self.throttler.estimate_cost(command.request.len())
                };
                self.throttler.force_consume(cost).await;
                inner.pending.pop_front();

                let sn = self.advance_command_sn(&mut *inner);
                inner.active.insert(xid);
                let current_max = inner.slot_table.current_max() as u32;
                let target_max = inner.slot_table.target_max() as u32;

                let command = inner.registry.get_mut(&xid).unwrap();
                command.transition(Transition::T4).expect("PENDING -> ACTIVE always legal");
                command.command_sn = Some(sn);
                command.slot = Some(slot_id);
                let frame = self.frame_for(FrameType::CommandReq, xid, command, slot_sn, current_max, target_max);

                match self.dispatch(&mut inner, frame).await {
                    Some(transport) => {
                        let command = inner.registry.get_mut(&xid).unwrap();
                        command.transport = Some(transport);
                    }
                    None => break,
                }
            }
        }
    }

    async fn retry_task(self: Arc<Self>, mut wake: mpsc::Receiver<()>) {
        loop {
            wake.recv().await;
            let mut inner = self.inner.lock().await;
            if inner.shutting_down {
                return;
            }
            while let Some(xid) = inner.retry.front().copied() {
                if !inner.connected() {
                    break;
                }
                let Some(barrier) = inner.registry.get(&xid).map(|c| c.barrier.clone()) else {
                    inner.retry.pop_front();
                    continue;
                };
                let Some(_guard) = barrier.block() else {
                    // A concurrent abort already owns this command.
                    inner.retry.pop_front();
                    continue;
                };
                inner.retry.pop_front();

                let slot_id = inner.registry.get(&xid).unwrap().slot.expect("retried command always still holds its slot");
                let slot_sn = inner.slot_table.slot_sn(slot_id);
                let current_max = inner.slot_table.current_max() as u32;
                let target_max = inner.slot_table.target_max() as u32;

                let command = inner.registry.get_mut(&xid).unwrap();
                command.transition(Transition::T9).expect("RETRY -> ACTIVE always legal");
                inner.active.insert(xid);
                let frame = self.frame_for(FrameType::CommandReq, xid, command, slot_sn, current_max, target_max);
                if let Some(transport) = self.dispatch(&mut inner, frame).await {
                    let command = inner.registry.get_mut(&xid).unwrap();
                    command.transport = Some(transport);
                }
            }
        }
    }

    async fn abort_task(self: Arc<Self>, mut wake: mpsc::Receiver<()>) {
        loop {
            wake.recv().await;
            let mut inner = self.inner.lock().await;
            if inner.shutting_down {
                return;
            }
            while let Some(xid) = inner.abort_queue.front().copied() {
                if !inner.connected() {
                    break;
                }
                inner.abort_queue.pop_front();
                let Some(target) = inner.registry.get(&xid) else { continue };
                let target_command_sn = target.command_sn.unwrap_or_else(|| SerialNumber::new31(0));
                let target_slot_id = target.slot.unwrap_or(SlotId(0));
                let target_slot_sn = target.slot.map_or(SerialNumber::new31(0), |s| inner.slot_table.slot_sn(s));

                let abort_xid = self.xid_alloc.alloc();
                let abort = Abort { target_xid: xid, target_command_sn, target_slot_id, target_slot_sn, status: None };
                inner.registry.get_mut(&xid).unwrap().abort = Some(abort);
                inner.abort_exchange_targets.insert(abort_xid, xid);

                let mut frame = Frame::new(FrameType::TaskmgmtReq, Vec::new()).with_exchange(abort_xid.0);
                frame.command_sn = target_command_sn.value();
                frame.slot_id = target_slot_id.0;
                frame.slot_sn = target_slot_sn.value();
                self.dispatch(&mut inner, frame).await;
            }
        }
    }
}

fn to_pending(inner: &mut Inner, xid: ExchangeId, command: &mut Command) {
    command.transition(Transition::T3).expect("INITIAL -> PENDING always legal");
    inner.pending.push_back(xid);
}

enum HandleState {
    Pending(oneshot::Receiver<Result<Vec<u8>, ChannelError>>),
    Ready(Option<Result<Vec<u8>, ChannelError>>),
}

/// Handle to a command submitted via [`Channel::submit`] (§4.4's
/// `execute(request, doneCallback, timeout) -> Future`). Implements
/// [`Future`] directly, so `channel.execute(..).await` still resolves to the
/// command's result; hold the handle instead when §5's cancel semantics are
/// needed.
pub struct CommandHandle {
    xid: ExchangeId,
    channel: Arc<Channel>,
    state: HandleState,
    cancelled: bool,
}

impl CommandHandle {
    fn already_final(xid: ExchangeId, channel: Arc<Channel>, result: Result<Vec<u8>, ChannelError>) -> Self {
        Self { xid, channel, state: HandleState::Ready(Some(result)), cancelled: true }
    }

    /// The command's exchange id, for correlating with logs or a later
    /// out-of-band abort.
    pub fn exchange_id(&self) -> ExchangeId {
        self.xid
    }

    /// Synchronous cancel (§5): initiates task management and waits for the
    /// channel to acknowledge the attempt. Idempotent — returns `true` the
    /// first time it actually moves the command towards cancellation,
    /// `false` on every call after (including when the command already
    /// reached FINAL on its own).
    pub async fn cancel(&mut self) -> bool {
        if self.cancelled {
            return false;
        }
        self.cancelled = true;
        self.channel.abort(self.xid).await
    }

    /// Asynchronous cancel (§5): initiates task management without waiting
    /// for it to land. Same idempotence as [`CommandHandle::cancel`]; the
    /// return value only reflects whether this call was the first to try.
    pub fn cancel_async(&mut self) -> bool {
        if self.cancelled {
            return false;
        }
        self.cancelled = true;
        let channel = self.channel.clone();
        let xid = self.xid;
        tokio::spawn(async move {
            channel.abort(xid).await;
        });
        true
    }
}

impl Future for CommandHandle {
    type Output = Result<Vec<u8>, ChannelError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            HandleState::Pending(rx) => Pin::new(rx).poll(cx).map(|r| r.unwrap_or(Err(ChannelError::NexusReset))),
            HandleState::Ready(slot) => Poll::Ready(slot.take().expect("CommandHandle polled after completion")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unattached_channel() -> Arc<Channel> {
        let options = Arc::new(SessionOptions::default());
        let xid_alloc = Arc::new(ExchangeIdAllocator::new());
        let sibling_sn = Arc::new(AtomicU32::new(0));
        let self_sn = Arc::new(AtomicU32::new(0));
        Channel::new(options, 4, xid_alloc, sibling_sn, self_sn)
    }

    #[tokio::test]
    async fn cancel_on_a_pending_command_resolves_cancelled() {
        let channel = unattached_channel();
        let mut handle = channel.submit(b"hi".to_vec(), true).await;
        assert!(handle.cancel().await);
        let result = handle.await;
        assert!(matches!(result, Err(ChannelError::Cancelled)));
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let channel = unattached_channel();
        let mut handle = channel.submit(b"hi".to_vec(), true).await;
        assert!(handle.cancel().await);
        assert!(!handle.cancel().await);
    }

    #[tokio::test]
    async fn abort_on_unknown_exchange_is_a_no_op() {
        let channel = unattached_channel();
        let bogus = ExchangeId(999);
        assert!(!channel.abort(bogus).await);
    }

    #[tokio::test]
    async fn abort_by_exchange_id_completes_a_bare_awaited_handle() {
        let channel = unattached_channel();
        let handle = channel.submit(b"hi".to_vec(), true).await;
        let xid = handle.exchange_id();
        let channel_for_cancel = channel.clone();
        tokio::spawn(async move {
            assert!(channel_for_cancel.abort(xid).await);
        });
        let result = handle.await;
        assert!(matches!(result, Err(ChannelError::Cancelled)));
    }
}
