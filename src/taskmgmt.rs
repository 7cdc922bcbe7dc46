//! Task-management barrier (§5): serializes a command's critical dispatch
//! and retry sections against a concurrent abort.
//!
//! States `{INACTIVE, ACTIVE, PENDING, ABORTING}` collapse here to a
//! reentrant counter (`INACTIVE` is `active_count == 0`, `ACTIVE` is
//! `active_count > 0`) plus two booleans: `pending_abort` (an abort is
//! waiting for the counter to drain) and `aborting` (the abort won the
//! race and owns the command now). `block` is reentrant: dispatch and
//! retry can both be in their respective critical sections at once, and
//! the barrier only excludes abort, never excludes them from each other.

use std::sync::Mutex;

use tokio::sync::Notify;

#[derive(Debug)]
struct Inner {
    active_count: u32,
    pending_abort: bool,
    aborting: bool,
}

/// Per-command barrier guarding dispatch/retry against a racing abort.
pub struct TaskMgmtBarrier {
    inner: Mutex<Inner>,
    notify: Notify,
}

/// Returned by `request_abort` telling the caller whether it won the race
/// to own the command's fate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortOutcome {
    /// This call transitioned the barrier to ABORTING; the caller now owns
    /// finalizing the command.
    Won,
    /// Another abort already owns the command; this caller should treat the
    /// command as already being finalized elsewhere.
    AlreadyAborting,
}

impl TaskMgmtBarrier {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner { active_count: 0, pending_abort: false, aborting: false }), notify: Notify::new() }
    }

    /// Enter a critical section (dispatch or retry). Fails once the barrier
    /// has transitioned to ABORTING — the caller must halt and let the
    /// abort path own the command.
    pub fn block(&self) -> Option<BarrierGuard<'_>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.aborting {
            return None;
        }
        inner.active_count += 1;
        Some(BarrierGuard { barrier: self })
    }

    fn unblock(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.active_count -= 1;
        let should_wake = inner.active_count == 0 && inner.pending_abort;
        drop(inner);
        if should_wake {
            self.notify.notify_one();
        }
    }

    /// Request exclusive ownership for abort processing. Waits for any
    /// in-flight `block` sections to drain, then transitions to ABORTING so
    /// future `block` calls fail. If another abort already won, returns
    /// immediately with [`AbortOutcome::AlreadyAborting`].
    pub async fn request_abort(&self) -> AbortOutcome {
        loop {
            // Register interest before checking the condition so a
            // notify_one() fired between the check and the await is not lost.
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().unwrap();
                if inner.aborting {
                    return AbortOutcome::AlreadyAborting;
                }
                if inner.active_count == 0 {
                    inner.aborting = true;
                    inner.pending_abort = false;
                    return AbortOutcome::Won;
                }
                inner.pending_abort = true;
            }
            notified.await;
        }
    }

    pub fn is_aborting(&self) -> bool {
        self.inner.lock().unwrap().aborting
    }
}

impl Default for TaskMgmtBarrier {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII handle for a `block()` critical section; releases on drop.
pub struct BarrierGuard<'a> {
    barrier: &'a TaskMgmtBarrier,
}

impl Drop for BarrierGuard<'_> {
    fn drop(&mut self) {
        self.barrier.unblock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn block_is_reentrant() {
        let b = TaskMgmtBarrier::new();
        let g1 = b.block().unwrap();
        let g2 = b.block().unwrap();
        drop(g1);
        drop(g2);
        assert!(!b.is_aborting());
    }

    #[tokio::test]
    async fn abort_with_no_active_sections_wins_immediately() {
        let b = TaskMgmtBarrier::new();
        assert_eq!(b.request_abort().await, AbortOutcome::Won);
        assert!(b.is_aborting());
    }

    #[tokio::test]
    async fn block_fails_once_aborting() {
        let b = TaskMgmtBarrier::new();
        b.request_abort().await;
        assert!(b.block().is_none());
    }

    #[tokio::test]
    async fn abort_waits_for_active_section_to_release() {
        let b = Arc::new(TaskMgmtBarrier::new());
        let guard = b.block().unwrap();

        let b2 = b.clone();
        let abort_task = tokio::spawn(async move { b2.request_abort().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!abort_task.is_finished());

        drop(guard);
        let outcome = tokio::time::timeout(Duration::from_secs(1), abort_task).await.unwrap().unwrap();
        assert_eq!(outcome, AbortOutcome::Won);
    }

    #[tokio::test]
    async fn second_abort_sees_already_aborting() {
        let b = TaskMgmtBarrier::new();
        assert_eq!(b.request_abort().await, AbortOutcome::Won);
        assert_eq!(b.request_abort().await, AbortOutcome::AlreadyAborting);
    }
}
