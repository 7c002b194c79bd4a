use std::path::PathBuf;
use std::time::Duration;

/// Delay between reconnect attempts. Doubles after each failed connect and
/// starts over once a connection authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// Retry at once, forever.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
        }
    }
}

/// Everything a [`GameSession`](crate::session::GameSession) needs. The
/// `owge-sync` binary fills it from flags and `OWGE_*` variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub socket_url: String,
    pub api_base_url: String,
    pub token: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub cache_namespace: String,
    pub reconnect: ReconnectPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(6), Duration::from_secs(32));
        assert_eq!(policy.delay_for(40), Duration::from_secs(32));
    }

    #[test]
    fn immediate_policy_never_waits() {
        let policy = ReconnectPolicy::immediate();
        assert_eq!(policy.delay_for(1), Duration::ZERO);
        assert_eq!(policy.delay_for(10), Duration::ZERO);
    }
}
