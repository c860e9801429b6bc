//! Exponential backoff as an explicit state machine.

use std::time::Duration;

/// Attempt budget and delay curve.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub min_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth per failure.
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 35,
            min_delay: Duration::from_millis(5_000),
            max_delay: Duration::from_millis(10_000),
            factor: 1.1,
        }
    }
}

impl RetryPolicy {
    /// Delay after the n-th failure (1-based).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1) as i32;
        let millis = self.min_delay.as_millis() as f64 * self.factor.powi(exp);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.round() as u64)
    }
}

/// Tracks attempts against a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempts: 0 }
    }

    /// Attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record a failed attempt. Returns how long to wait before the next
    /// one, or `None` when the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        Some(self.policy.delay_for(self.attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_by_factor_from_the_floor() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(5_000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(5_500));
        assert_eq!(policy.delay_for(3), Duration::from_millis(6_050));
        assert_eq!(policy.delay_for(4), Duration::from_millis(6_655));
    }

    #[test]
    fn delays_are_capped() {
        let policy = RetryPolicy::default();
        // 5000 * 1.1^7 ~= 9743, 5000 * 1.1^8 ~= 10718
        assert_eq!(policy.delay_for(8), Duration::from_millis(9_744));
        assert_eq!(policy.delay_for(9), Duration::from_millis(10_000));
        assert_eq!(policy.delay_for(34), Duration::from_millis(10_000));
    }

    #[test]
    fn budget_allows_exactly_max_attempts() {
        let mut backoff = Backoff::new(RetryPolicy::default());
        let mut waits = 0;
        while backoff.next_delay().is_some() {
            waits += 1;
        }
        assert_eq!(backoff.attempts(), 35);
        assert_eq!(waits, 34);
    }

    #[test]
    fn single_attempt_policy_never_waits() {
        let mut backoff = Backoff::new(RetryPolicy {
            max_attempts: 1,
            ..Default::default()
        });
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempts(), 1);
    }
}
