//! Commit point tracking for out-of-order completions
//!
//! Importers hand records to the write path in order but completions may come
//! back in any order. [`CommitTracker`] remembers which sequence numbers are
//! done and exposes the safe commit point: every sequence number below it has
//! completed, so resuming from it never skips a record.
//!
//! The tracker holds at most `leeway` outstanding completions. If a
//! completion arrives further ahead than that, the commit point is pulled
//! forward and the skipped range is logged; records in it may be replayed or
//! lost depending on the source, so the leeway should comfortably exceed the
//! number of in-flight writes.

use crate::error::{ConnectorError, ConnectorResult};
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub struct CommitTracker {
    /// Everything strictly below this has completed
    safe: u64,
    /// Highest sequence number submitted, if any
    submitted: Option<u64>,
    /// Completed sequence numbers at or above `safe`
    done: BTreeSet<u64>,
    leeway: u64,
}

impl CommitTracker {
    pub fn new(leeway: usize) -> ConnectorResult<Self> {
        if leeway == 0 {
            return Err(ConnectorError::config("commit leeway must be at least 1"));
        }
        Ok(Self {
            safe: 0,
            submitted: None,
            done: BTreeSet::new(),
            leeway: leeway as u64,
        })
    }

    /// Record that `seq` was handed to the write path. The first submission
    /// sets the base of the tracker.
    pub fn submit(&mut self, seq: u64) {
        match self.submitted {
            None => {
                self.safe = seq;
                self.submitted = Some(seq);
            }
            Some(high) if seq > high => self.submitted = Some(seq),
            Some(_) => {}
        }
    }

    /// Record completion of `seq` and return the new safe commit point.
    ///
    /// Completions below the commit point or above the highest submission
    /// are ignored.
    pub fn commit(&mut self, seq: u64) -> u64 {
        let Some(high) = self.submitted else {
            return self.safe;
        };
        if seq < self.safe || seq > high {
            return self.safe;
        }

        if seq - self.safe >= self.leeway {
            let forced = seq + 1 - self.leeway;
            tracing::warn!(
                from = self.safe,
                to = forced,
                "Commit tracker exceeded leeway, moving commit point forward"
            );
            self.safe = forced;
            self.done = self.done.split_off(&forced);
        }

        self.done.insert(seq);
        while self.done.remove(&self.safe) {
            self.safe += 1;
        }
        self.safe
    }

    /// Forget all progress and restart from `seq`
    pub fn reset_to(&mut self, seq: u64) {
        self.safe = seq;
        self.submitted = Some(seq);
        self.done.clear();
    }

    pub fn safe_point(&self) -> u64 {
        self.safe
    }

    /// Submitted but not yet covered by the commit point
    pub fn outstanding(&self) -> u64 {
        match self.submitted {
            Some(high) if high >= self.safe => high - self.safe + 1 - self.done.len() as u64,
            _ => 0,
        }
    }

    /// True once everything submitted has completed
    pub fn is_drained(&self) -> bool {
        self.outstanding() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_in_order() {
        let mut t = CommitTracker::new(8).unwrap();
        for seq in 0..4 {
            t.submit(seq);
        }
        assert_eq!(t.outstanding(), 4);
        assert_eq!(t.commit(0), 1);
        assert_eq!(t.commit(1), 2);
        assert_eq!(t.commit(2), 3);
        assert_eq!(t.commit(3), 4);
        assert!(t.is_drained());
    }

    #[test]
    fn test_out_of_order_gap() {
        let mut t = CommitTracker::new(8).unwrap();
        for seq in 10..15 {
            t.submit(seq);
        }
        assert_eq!(t.safe_point(), 10);
        assert_eq!(t.commit(12), 10);
        assert_eq!(t.commit(11), 10);
        assert_eq!(t.commit(10), 13);
        assert_eq!(t.outstanding(), 2);
    }

    #[test]
    fn test_ignores_stale_and_future() {
        let mut t = CommitTracker::new(4).unwrap();
        assert_eq!(t.commit(3), 0);
        t.submit(0);
        t.submit(1);
        assert_eq!(t.commit(5), 0);
        assert_eq!(t.commit(0), 1);
        assert_eq!(t.commit(0), 1);
    }

    #[test]
    fn test_leeway_forces_progress() {
        let mut t = CommitTracker::new(3).unwrap();
        for seq in 0..10 {
            t.submit(seq);
        }
        // 0 never completes; 4 is already beyond the leeway of 3
        assert_eq!(t.commit(4), 2);
        assert_eq!(t.commit(5), 3);
        assert_eq!(t.commit(3), 6);
    }

    #[test]
    fn test_reset() {
        let mut t = CommitTracker::new(4).unwrap();
        t.submit(0);
        t.submit(1);
        t.commit(1);
        t.reset_to(100);
        assert_eq!(t.safe_point(), 100);
        assert_eq!(t.commit(100), 101);
    }

    #[test]
    fn test_zero_leeway_rejected() {
        assert!(CommitTracker::new(0).is_err());
    }

    proptest! {
        /// With a leeway larger than the batch, the commit point always equals the
        /// length of the completed prefix, whatever the completion order.
        #[test]
        fn test_safe_point_is_completed_prefix(
            order in Just((0u64..64).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let mut t = CommitTracker::new(128).unwrap();
            for seq in 0..64 {
                t.submit(seq);
            }
            let mut completed = std::collections::HashSet::new();
            for seq in order {
                let safe = t.commit(seq);
                completed.insert(seq);
                let prefix = (0..).take_while(|s| completed.contains(s)).count() as u64;
                prop_assert_eq!(safe, prefix);
            }
            prop_assert!(t.is_drained());
        }
    }
}
