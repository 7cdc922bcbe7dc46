//! Transport scheduling / multipath layer.
//!
//! Selects one live transport per outbound exchange using a configurable
//! policy (§4.5). `detach` returns immediately, but any context that was
//! handed a transport just before it died can [`TransportScheduler::wait_for_drain`]
//! until the scheduler confirms it gone, instead of hot-looping the retry
//! or abort task against a dead connection.

use std::collections::HashMap;

use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::options::SchedulerPolicy;
use crate::transport::TransportId;

struct Inner {
    /// Live transports in attach order; round-robin rotates over this.
    order: Vec<TransportId>,
    outstanding: HashMap<TransportId, u32>,
    cursor: usize,
}

/// Selects a live transport per `SessionOptions::xport_scheduler`. One
/// instance per channel.
pub struct TransportScheduler {
    policy: SchedulerPolicy,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl TransportScheduler {
    pub fn new(policy: SchedulerPolicy) -> Self {
        Self { policy, inner: Mutex::new(Inner { order: Vec::new(), outstanding: HashMap::new(), cursor: 0 }), notify: Notify::new() }
    }

    pub async fn attach(&self, id: TransportId) {
        let mut inner = self.inner.lock().await;
        if !inner.order.contains(&id) {
            inner.order.push(id);
            inner.outstanding.insert(id, 0);
            debug!(transport_id = id.0, "transport attached to scheduler");
        }
    }

    /// Remove a transport. Wakes any task parked in [`wait_for_drain`](Self::wait_for_drain).
    pub async fn detach(&self, id: TransportId) {
        let mut inner = self.inner.lock().await;
        inner.order.retain(|t| *t != id);
        inner.outstanding.remove(&id);
        if inner.cursor > inner.order.len() {
            inner.cursor = 0;
        }
        debug!(transport_id = id.0, "transport detached from scheduler");
        drop(inner);
        self.notify.notify_waiters();
    }

    pub async fn contains(&self, id: TransportId) -> bool {
        self.inner.lock().await.order.contains(&id)
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.order.is_empty()
    }

    /// Pick a transport for a new exchange and bump its outstanding count.
    pub async fn schedule(&self) -> Option<TransportId> {
        let mut inner = self.inner.lock().await;
        let id = Self::pick(self.policy, &mut inner)?;
        *inner.outstanding.entry(id).or_insert(0) += 1;
        Some(id)
    }

    /// Pick any live transport without affecting outstanding counts (used
    /// for keepalive pings, which aren't exchanges).
    pub async fn schedule_any(&self) -> Option<TransportId> {
        let mut inner = self.inner.lock().await;
        Self::pick(self.policy, &mut inner)
    }

    /// Record that an exchange dispatched on `id` has completed (response,
    /// reset, or abort), releasing its slot in the least-queue count.
    pub async fn note_completed(&self, id: TransportId) {
        let mut inner = self.inner.lock().await;
        if let Some(count) = inner.outstanding.get_mut(&id) {
            *count = count.saturating_sub(1);
        }
    }

    fn pick(policy: SchedulerPolicy, inner: &mut Inner) -> Option<TransportId> {
        if inner.order.is_empty() {
            return None;
        }
        match policy {
            SchedulerPolicy::RoundRobin => {
                let id = inner.order[inner.cursor % inner.order.len()];
                inner.cursor = (inner.cursor + 1) % inner.order.len();
                Some(id)
            }
            SchedulerPolicy::LeastQueue => {
                let mut best: Option<(TransportId, u32)> = None;
                // Break ties by round-robin cursor order, scanning starting
                // at the cursor so repeated ties still rotate.
                let n = inner.order.len();
                for offset in 0..n {
                    let idx = (inner.cursor + offset) % n;
                    let id = inner.order[idx];
                    let count = *inner.outstanding.get(&id).unwrap_or(&0);
                    if best.map_or(true, |(_, best_count)| count < best_count) {
                        best = Some((id, count));
                    }
                }
                inner.cursor = (inner.cursor + 1) % n.max(1);
                best.map(|(id, _)| id)
            }
        }
    }

    /// Wait until `id` is no longer attached. Returns immediately if it's
    /// already gone.
    pub async fn wait_for_drain(&self, id: TransportId) {
        loop {
            if !self.contains(id).await {
                return;
            }
            self.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_robin_rotates_over_live_transports() {
        let s = TransportScheduler::new(SchedulerPolicy::RoundRobin);
        s.attach(TransportId(1)).await;
        s.attach(TransportId(2)).await;
        let picks: Vec<_> = [s.schedule().await, s.schedule().await, s.schedule().await].into_iter().map(|x| x.unwrap().0).collect();
        assert_eq!(picks, vec![1, 2, 1]);
    }

    #[tokio::test]
    async fn least_queue_prefers_idler_transport() {
        let s = TransportScheduler::new(SchedulerPolicy::LeastQueue);
        s.attach(TransportId(1)).await;
        s.attach(TransportId(2)).await;
        s.schedule().await; // bumps transport 1 (cursor starts at 0)
        let pick = s.schedule().await.unwrap();
        assert_eq!(pick, TransportId(2));
    }

    #[tokio::test]
    async fn empty_scheduler_returns_none() {
        let s = TransportScheduler::new(SchedulerPolicy::RoundRobin);
        assert!(s.schedule().await.is_none());
        assert!(s.is_empty().await);
    }

    #[tokio::test]
    async fn wait_for_drain_unblocks_on_detach() {
        let s = std::sync::Arc::new(TransportScheduler::new(SchedulerPolicy::RoundRobin));
        s.attach(TransportId(1)).await;
        let waiter = {
            let s = s.clone();
            tokio::spawn(async move {
                s.wait_for_drain(TransportId(1)).await;
            })
        };
        tokio::task::yield_now().await;
        s.detach(TransportId(1)).await;
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }
}
