//! # Reconnect State Machine
//!
//! Pure bookkeeping for the subscriber side: how many consecutive unplanned
//! closes have happened and what to do about the next one. No I/O, no timers;
//! the `Reconnector` drives it.

use std::time::Duration;

/// Retry ceiling and linear backoff base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay before retry number `attempt + 1`: `(attempt + 1) * base_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.saturating_add(1))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(2000))
    }
}

/// Observable transitions of a reconnector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectEvent {
    /// A connection attempt is starting; `attempt` retries have been used.
    Connecting { attempt: u32 },
    /// Handshake succeeded.
    Open,
    /// The connection ended (or never opened).
    Closed { planned: bool },
    /// Retry number `attempt` will start after `delay`.
    RetryScheduled { attempt: u32, delay: Duration },
    /// Retry budget exhausted; nothing further will be scheduled.
    Terminal { attempts: u32 },
}

/// What to do after an unplanned close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry { attempt: u32, delay: Duration },
    Terminal { attempts: u32 },
}

/// # Reconnect State
///
/// `attempt` is reset by every successful open and incremented by every
/// unplanned close that is followed by a retry. Once it equals `max_attempts`
/// the next unplanned close is terminal.
#[derive(Debug, Clone)]
pub struct ReconnectState {
    policy: ReconnectPolicy,
    attempt: u32,
    terminal: bool,
}

impl ReconnectState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            terminal: false,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Handshake succeeded.
    pub fn on_open(&mut self) {
        self.attempt = 0;
    }

    /// Transport error, remote close or failed connect.
    pub fn on_unplanned_close(&mut self) -> Decision {
        if self.terminal || self.attempt >= self.policy.max_attempts {
            self.terminal = true;
            return Decision::Terminal {
                attempts: self.attempt,
            };
        }
        let delay = self.policy.delay_for(self.attempt);
        self.attempt += 1;
        Decision::Retry {
            attempt: self.attempt,
            delay,
        }
    }

    /// External restart out of the terminal state.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.terminal = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn backoff_is_linear_then_terminal() {
        let mut state = ReconnectState::new(ReconnectPolicy::new(5, secs(2)));
        let delays: Vec<Duration> = (0..5)
            .map(|_| match state.on_unplanned_close() {
                Decision::Retry { delay, .. } => delay,
                Decision::Terminal { .. } => panic!("terminal too early"),
            })
            .collect();
        assert_eq!(delays, vec![secs(2), secs(4), secs(6), secs(8), secs(10)]);

        assert_eq!(state.on_unplanned_close(), Decision::Terminal { attempts: 5 });
        assert!(state.is_terminal());
        assert_eq!(state.on_unplanned_close(), Decision::Terminal { attempts: 5 });
    }

    #[test]
    fn open_resets_the_attempt_counter() {
        let mut state = ReconnectState::new(ReconnectPolicy::new(5, secs(1)));
        state.on_unplanned_close();
        state.on_unplanned_close();
        assert_eq!(state.attempt(), 2);

        state.on_open();
        assert_eq!(state.attempt(), 0);
        assert_eq!(
            state.on_unplanned_close(),
            Decision::Retry {
                attempt: 1,
                delay: secs(1)
            }
        );
    }

    #[test]
    fn zero_attempts_is_immediately_terminal() {
        let mut state = ReconnectState::new(ReconnectPolicy::new(0, secs(1)));
        assert_eq!(state.on_unplanned_close(), Decision::Terminal { attempts: 0 });
        state.reset();
        assert!(!state.is_terminal());
    }
}
