//! What the connector does after the live stream fails.

use std::time::Duration;

/// Reconnection behaviour of the transport connector.
///
/// `Manual` (the default) leaves the connector in the error state until the
/// UI calls `connect()` again. `Backoff` retries on its own, doubling the
/// delay after every consecutive failure up to `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    #[default]
    Manual,
    Backoff {
        initial: Duration,
        max: Duration,
        /// `None` retries forever.
        max_attempts: Option<u32>,
    },
}

impl ReconnectPolicy {
    /// 1s, 2s, 4s, ... capped at 60s, unlimited attempts.
    pub fn exponential() -> Self {
        Self::Backoff {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            max_attempts: None,
        }
    }

    /// Delay before retry number `attempt` (1-based), or `None` to give up.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match *self {
            Self::Manual => None,
            Self::Backoff {
                initial,
                max,
                max_attempts,
            } => {
                if attempt == 0 || max_attempts.is_some_and(|limit| attempt > limit) {
                    return None;
                }
                let factor = 1u32 << (attempt - 1).min(16);
                Some(initial.saturating_mul(factor).min(max))
            }
        }
    }
}
