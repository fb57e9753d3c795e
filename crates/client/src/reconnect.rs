use std::time::Duration;

/// Reconnection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            max_attempts: u32::MAX, // retry indefinitely
        }
    }
}

impl ReconnectPolicy {
    /// Backoff before the next attempt after `failures` consecutive failed connects.
    pub fn delay(&self, failures: u32) -> Duration {
        let exp = failures.min(7);
        let nanos = self.base_delay.as_nanos().saturating_mul(1u128 << exp);
        let delay = u64::try_from(nanos).map_or(Duration::from_secs(u64::MAX), Duration::from_nanos);
        delay.min(self.max_delay)
    }

    pub fn should_reconnect(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }
}
