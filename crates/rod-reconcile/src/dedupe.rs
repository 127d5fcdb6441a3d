//! Bounded ledger of applied `(origin, entity_id, source_seq)` triples.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::types::Origin;

/// Sequences remembered per `(origin, entity)`. Older ones fall out; a replay
/// that far back is caught by the timestamp rules instead.
pub const SEQ_WINDOW: usize = 64;

/// Entities that left the store whose history is still kept, so a late
/// redelivery is still recognised as a duplicate.
pub const RETIRED_WINDOW: usize = 1024;

#[derive(Debug, Default, Clone)]
pub struct SeenEvents {
    by_entity: HashMap<(Origin, String), VecDeque<u64>>,
    /// Oldest first. May hold ids that came back; `retired` is authoritative.
    retired_order: VecDeque<String>,
    retired: HashSet<String>,
}

impl SeenEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, origin: Origin, entity_id: &str, seq: u64) -> bool {
        self.by_entity
            .get(&(origin, entity_id.to_string()))
            .is_some_and(|q| q.contains(&seq))
    }

    /// Returns `false` when the triple was already recorded.
    pub fn record(&mut self, origin: Origin, entity_id: &str, seq: u64) -> bool {
        let q = self
            .by_entity
            .entry((origin, entity_id.to_string()))
            .or_default();
        if q.contains(&seq) {
            return false;
        }
        self.retired.remove(entity_id);
        if q.len() == SEQ_WINDOW {
            q.pop_front();
        }
        q.push_back(seq);
        true
    }

    /// The entity left the store. Its history is kept until
    /// `RETIRED_WINDOW` newer retirements push it out.
    pub fn retire(&mut self, entity_id: &str) {
        if !self.retired.insert(entity_id.to_string()) {
            return;
        }
        self.retired_order.push_back(entity_id.to_string());
        while self.retired.len() > RETIRED_WINDOW {
            let Some(oldest) = self.retired_order.pop_front() else {
                break;
            };
            if self.retired.remove(&oldest) {
                self.by_entity.retain(|(_, id), _| *id != oldest);
            }
        }
        // Ids that came back leave stale slots behind.
        if self.retired_order.len() > 2 * RETIRED_WINDOW {
            let retired = &self.retired;
            self.retired_order.retain(|id| retired.contains(id));
        }
    }

    pub fn len(&self) -> usize {
        self.by_entity.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_record_is_rejected() {
        let mut seen = SeenEvents::new();
        assert!(seen.record(Origin::Push, "o1", 7));
        assert!(!seen.record(Origin::Push, "o1", 7));
        assert!(seen.contains(Origin::Push, "o1", 7));
    }

    #[test]
    fn origins_are_separate_namespaces() {
        let mut seen = SeenEvents::new();
        assert!(seen.record(Origin::Push, "o1", 1));
        assert!(seen.record(Origin::Poll, "o1", 1));
    }

    #[test]
    fn window_is_bounded() {
        let mut seen = SeenEvents::new();
        for seq in 0..(SEQ_WINDOW as u64 + 10) {
            seen.record(Origin::Push, "o1", seq);
        }
        assert_eq!(seen.len(), SEQ_WINDOW);
        assert!(!seen.contains(Origin::Push, "o1", 0));
        assert!(seen.contains(Origin::Push, "o1", SEQ_WINDOW as u64 + 9));
    }

    #[test]
    fn retired_entity_still_rejects_redelivery() {
        let mut seen = SeenEvents::new();
        seen.record(Origin::Push, "n1", 1);
        seen.retire("n1");
        assert!(!seen.record(Origin::Push, "n1", 1));
    }

    #[test]
    fn retirement_window_is_bounded() {
        let mut seen = SeenEvents::new();
        for i in 0..=RETIRED_WINDOW {
            let id = format!("n{i}");
            seen.record(Origin::Push, &id, 1);
            seen.retire(&id);
        }
        assert!(!seen.contains(Origin::Push, "n0", 1));
        assert!(seen.contains(Origin::Push, "n1", 1));
        assert_eq!(seen.len(), RETIRED_WINDOW);
    }

    #[test]
    fn entity_that_returns_is_not_retired() {
        let mut seen = SeenEvents::new();
        seen.record(Origin::Push, "n0", 1);
        seen.retire("n0");
        seen.record(Origin::Poll, "n0", 2);
        for i in 0..=RETIRED_WINDOW {
            seen.retire(&format!("x{i}"));
        }
        assert!(seen.contains(Origin::Push, "n0", 1));
    }
}
