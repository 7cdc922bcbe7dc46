//! Slot table: at-most-once execution bookkeeping for one channel.
//!
//! A slot is addressed by [`SlotId`] and carries a [`SerialNumber`]
//! (`slotSN`) that advances by one on every successful completion, plus an
//! optional cached response for replay of a non-idempotent command's
//! duplicate request. "Holding-cached-response" from §3 is represented here
//! as the `cached` field being populated on an otherwise-free slot, rather
//! than as a third mutually exclusive state — simpler to reason about and
//! equivalent: a slot with `cached.is_some()` is still reservable, the
//! cached bytes are just discarded on next reserve.

use tracing::debug;

use crate::serial::SerialNumber;

/// Identifies one slot within a channel's slot table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Reserved,
}

#[derive(Debug, Clone)]
struct Slot {
    sn: SerialNumber,
    state: SlotState,
    cached: Option<Vec<u8>>,
}

impl Slot {
    fn new() -> Self {
        Self { sn: SerialNumber::new31(0), state: SlotState::Free, cached: None }
    }
}

/// Result of comparing an inbound `(slotID, slotSN)` against a slot's
/// current sequence, per §4.2's server-side duplicate detection rule. The
/// core does not implement the server side, but the classification itself
/// is reusable by any collaborator that does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateOutcome {
    Retry,
    Fresh,
    SlotFalseRetry,
    SlotSeqMisordered,
}

/// Classify an inbound `(slotID, slotSN)` against the slot's current
/// sequence number: equal is a retry, one behind is a false retry, exactly
/// one ahead is fresh, anything else is misordered.
pub fn classify_duplicate(current: SerialNumber, received: SerialNumber) -> DuplicateOutcome {
    match current.cmp_rfc1982(received) {
        Some(std::cmp::Ordering::Equal) => DuplicateOutcome::Retry,
        Some(std::cmp::Ordering::Greater) => DuplicateOutcome::SlotFalseRetry,
        Some(std::cmp::Ordering::Less) if current.next() == received => DuplicateOutcome::Fresh,
        _ => DuplicateOutcome::SlotSeqMisordered,
    }
}

/// Fixed-width (but dynamically resizable) array of slots for one channel.
#[derive(Debug)]
pub struct SlotTable {
    slots: Vec<Slot>,
    current_max: usize,
    target_max: usize,
}

impl SlotTable {
    pub fn new(initial_max: usize) -> Self {
        Self { slots: (0..initial_max).map(|_| Slot::new()).collect(), current_max: initial_max, target_max: initial_max }
    }

    pub fn current_max(&self) -> usize {
        self.current_max
    }

    pub fn target_max(&self) -> usize {
        self.target_max
    }

    /// Find the lowest free slot with `id < currentMax`, bind it, and
    /// advance its `slotSN`. Returns `None` if the table is saturated (the
    /// caller's command goes to PENDING per §4.3 transition T3).
    pub fn reserve(&mut self) -> Option<(SlotId, SerialNumber)> {
        let id = (0..self.current_max).find(|&i| self.slots[i].state == SlotState::Free)?;
        let slot = &mut self.slots[id];
        slot.sn = slot.sn.next();
        slot.state = SlotState::Reserved;
        slot.cached = None;
        debug!(slot_id = id, slot_sn = %slot.sn, "slot reserved");
        Some((SlotId(id as u32), slot.sn))
    }

    /// Mark the slot's current sequence as acknowledged. For a non-idempotent
    /// command, attach `response` for replay on retry; an idempotent command
    /// leaves the slot free of cached data.
    pub fn confirm(&mut self, id: SlotId, idempotent: bool, response: Option<Vec<u8>>) {
        let slot = &mut self.slots[id.0 as usize];
        slot.cached = if idempotent { None } else { response };
        debug!(slot_id = id.0, cached = slot.cached.is_some(), "slot confirmed");
    }

    /// The server did not advance its side: revert `slotSN` and release the
    /// slot, per the `SLOT_*` rollback rule in §4.2.
    pub fn rollback(&mut self, id: SlotId) {
        let idx = id.0 as usize;
        let prior = {
            let slot = &self.slots[idx];
            SerialNumber::new31((slot.sn.value() + (1 << slot.sn.bits()) - 1) % (1 << slot.sn.bits()))
        };
        let slot = &mut self.slots[idx];
        slot.sn = prior;
        slot.state = SlotState::Free;
        slot.cached = None;
        debug!(slot_id = id.0, "slot rolled back");
    }

    /// Drop any binding to the owning command on FINAL. The slot becomes
    /// free, possibly still holding a cached response set by [`confirm`](Self::confirm).
    pub fn release(&mut self, id: SlotId) {
        let slot = &mut self.slots[id.0 as usize];
        slot.state = SlotState::Free;
        debug!(slot_id = id.0, "slot released");
    }

    /// Cached response for a given slot, if one is being held for replay.
    pub fn cached_response(&self, id: SlotId) -> Option<&[u8]> {
        self.slots[id.0 as usize].cached.as_deref()
    }

    pub fn slot_sn(&self, id: SlotId) -> SerialNumber {
        self.slots[id.0 as usize].sn
    }

    pub fn in_use(&self) -> usize {
        self.slots[..self.current_max].iter().filter(|s| s.state == SlotState::Reserved).count()
    }

    /// Apply an advertised `currentMaxSlotID`/`targetMaxSlotID` pair from an
    /// inbound response. Growing extends the table immediately; shrinking
    /// only lowers `target_max` — callers must poll [`ready_to_shrink`](Self::ready_to_shrink)
    /// and call [`finalize_shrink`](Self::finalize_shrink) once slots at or
    /// above the target have drained.
    pub fn update(&mut self, current_max: usize, target_max: usize) {
        debug_assert!(current_max <= target_max.max(current_max), "currentMax must not exceed targetMax after growth");
        if current_max > self.slots.len() {
            self.slots.resize_with(current_max, Slot::new);
        }
        self.current_max = current_max;
        self.target_max = target_max;
    }

    /// Whether every slot at or above `target_max` has drained (is free),
    /// so a pending shrink can be finalized.
    pub fn ready_to_shrink(&self) -> bool {
        self.target_max >= self.current_max
            || self.slots[self.target_max..self.current_max].iter().all(|s| s.state == SlotState::Free)
    }

    /// Shrink `current_max` down to `target_max`, dropping the drained
    /// higher slots. No-op if [`ready_to_shrink`](Self::ready_to_shrink) is false.
    pub fn finalize_shrink(&mut self) {
        if self.ready_to_shrink() && self.target_max < self.current_max {
            self.current_max = self.target_max;
            debug!(new_max = self.current_max, "slot table shrink finalized");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_picks_lowest_free_id() {
        let mut t = SlotTable::new(4);
        let (a, _) = t.reserve().unwrap();
        let (b, _) = t.reserve().unwrap();
        assert_eq!(a, SlotId(0));
        assert_eq!(b, SlotId(1));
    }

    #[test]
    fn saturated_table_returns_none() {
        let mut t = SlotTable::new(2);
        t.reserve().unwrap();
        t.reserve().unwrap();
        assert!(t.reserve().is_none());
    }

    #[test]
    fn release_frees_slot_for_reuse() {
        let mut t = SlotTable::new(1);
        let (id, _) = t.reserve().unwrap();
        t.release(id);
        assert!(t.reserve().is_some());
    }

    #[test]
    fn confirm_then_release_retains_cache_for_non_idempotent() {
        let mut t = SlotTable::new(1);
        let (id, _) = t.reserve().unwrap();
        t.confirm(id, false, Some(b"response bytes".to_vec()));
        t.release(id);
        assert_eq!(t.cached_response(id), Some(b"response bytes".as_slice()));
    }

    #[test]
    fn confirm_idempotent_leaves_no_cache() {
        let mut t = SlotTable::new(1);
        let (id, _) = t.reserve().unwrap();
        t.confirm(id, true, Some(b"ignored".to_vec()));
        t.release(id);
        assert_eq!(t.cached_response(id), None);
    }

    #[test]
    fn rollback_reverts_sn_and_frees_slot() {
        let mut t = SlotTable::new(1);
        let (id, sn_after_reserve) = t.reserve().unwrap();
        assert_eq!(sn_after_reserve.value(), 1);
        t.rollback(id);
        assert_eq!(t.slot_sn(id).value(), 0);
        assert!(t.reserve().is_some());
    }

    #[test]
    fn grow_extends_slot_table_immediately() {
        let mut t = SlotTable::new(1);
        t.update(4, 4);
        assert_eq!(t.current_max(), 4);
        for _ in 0..4 {
            assert!(t.reserve().is_some());
        }
    }

    #[test]
    fn shrink_waits_for_higher_slots_to_drain() {
        let mut t = SlotTable::new(4);
        let (id2, _) = {
            t.reserve().unwrap();
            t.reserve().unwrap();
            t.reserve().unwrap()
        };
        t.update(4, 2);
        assert!(!t.ready_to_shrink());
        t.finalize_shrink();
        assert_eq!(t.current_max(), 4, "must not shrink while slot 2 is still reserved");
        t.release(id2);
        assert!(t.ready_to_shrink());
        t.finalize_shrink();
        assert_eq!(t.current_max(), 2);
    }

    #[test]
    fn duplicate_classification_matches_spec_table() {
        let cur = SerialNumber::new31(10);
        assert_eq!(classify_duplicate(cur, SerialNumber::new31(10)), DuplicateOutcome::Retry);
        assert_eq!(classify_duplicate(cur, SerialNumber::new31(11)), DuplicateOutcome::Fresh);
        assert_eq!(classify_duplicate(cur, SerialNumber::new31(9)), DuplicateOutcome::SlotFalseRetry);
        assert_eq!(classify_duplicate(cur, SerialNumber::new31(12)), DuplicateOutcome::SlotSeqMisordered);
    }
}
