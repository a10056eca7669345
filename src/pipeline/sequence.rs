use serde::{Deserialize, Serialize};

/// Which late responses may still be presented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalePolicy {
    /// Only the most recently issued request may update the surface.
    #[default]
    LatestOnly,
    /// Any response newer than the one on screen may update the surface.
    NewerThanPresented,
}

/// Monotonic request numbering plus the out-of-order completion check.
#[derive(Debug, Clone, Default)]
pub struct SequenceGuard {
    policy: StalePolicy,
    issued: u64,
    presented: u64,
}

impl SequenceGuard {
    pub fn new(policy: StalePolicy) -> Self {
        Self {
            policy,
            issued: 0,
            presented: 0,
        }
    }

    /// Number the next request.
    pub fn issue(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }

    /// Burn a number so that everything issued so far counts as stale under
    /// `LatestOnly`.
    pub fn invalidate(&mut self) {
        self.issued += 1;
    }

    pub fn latest_issued(&self) -> u64 {
        self.issued
    }

    pub fn last_presented(&self) -> u64 {
        self.presented
    }

    /// Whether the response for `seq` may be presented. Accepting records it
    /// as the presented sequence.
    pub fn accept(&mut self, seq: u64) -> bool {
        let accepted = match self.policy {
            StalePolicy::LatestOnly => seq == self.issued,
            StalePolicy::NewerThanPresented => seq > self.presented,
        };
        if accepted {
            self.presented = self.presented.max(seq);
        }
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_only_drops_everything_but_the_newest() {
        let mut guard = SequenceGuard::new(StalePolicy::LatestOnly);
        let r1 = guard.issue();
        let r2 = guard.issue();
        assert!(!guard.accept(r1));
        assert!(guard.accept(r2));
        assert!(!guard.accept(r1));
    }

    #[test]
    fn test_latest_only_invalidate() {
        let mut guard = SequenceGuard::new(StalePolicy::LatestOnly);
        let r1 = guard.issue();
        guard.invalidate();
        assert!(!guard.accept(r1));
    }

    #[test]
    fn test_newer_than_presented_keeps_issue_order() {
        let mut guard = SequenceGuard::new(StalePolicy::NewerThanPresented);
        let r1 = guard.issue();
        let r2 = guard.issue();
        let r3 = guard.issue();
        // r1 arrives first: still newer than nothing
        assert!(guard.accept(r1));
        // r3 overtakes r2
        assert!(guard.accept(r3));
        assert!(!guard.accept(r2));
        assert_eq!(guard.last_presented(), r3);
    }

    #[test]
    fn test_newer_response_wins_under_both_policies() {
        for policy in [StalePolicy::LatestOnly, StalePolicy::NewerThanPresented] {
            let mut guard = SequenceGuard::new(policy);
            let r1 = guard.issue();
            let r2 = guard.issue();
            assert!(guard.accept(r2), "{:?}", policy);
            assert!(!guard.accept(r1), "{:?}", policy);
        }
    }
}
