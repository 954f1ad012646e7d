use std::time::Duration;

use crate::RetryPolicy;

/// Counts failed attempts against a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    failed: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Backoff { policy, failed: 0 }
    }

    /// Failed attempts so far
    pub fn attempts(&self) -> u32 {
        self.failed
    }

    /// Record one failure. Returns the delay before the next attempt, or
    /// `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failed += 1;
        if self.failed >= self.policy.max_attempts {
            None
        } else {
            Some(self.policy.delay_for(self.failed))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desktop_budget_allows_three_attempts() {
        let mut b = Backoff::new(RetryPolicy::default());
        assert_eq!(b.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(b.next_delay(), Some(Duration::from_millis(400)));
        assert_eq!(b.next_delay(), None);
        assert_eq!(b.attempts(), 3);
    }

    #[test]
    fn single_attempt_policy_never_waits() {
        let mut b = Backoff::new(RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        });
        assert_eq!(b.next_delay(), None);
    }

    #[test]
    fn mobile_schedule_caps() {
        let mut b = Backoff::new(RetryPolicy {
            max_attempts: 8,
            base_delay_ms: 200,
            factor: 1.5,
            max_delay_ms: 1000,
        });
        let delays: Vec<_> = std::iter::from_fn(|| b.next_delay()).collect();
        assert_eq!(delays.len(), 7);
        assert_eq!(delays[0], Duration::from_millis(200));
        assert_eq!(delays[1], Duration::from_millis(300));
        assert_eq!(delays[6], Duration::from_millis(1000));
    }
}
