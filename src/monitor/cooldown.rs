use crate::monitor::AlertThresholdConfig;
use std::time::{Duration, Instant};

/// Delay growth between automatic restarts in one window
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    Fixed,
    Exponential { max_delay_secs: u64 },
}

impl BackoffStrategy {
    /// Delay before the restart with index `attempt` (0 for the first)
    pub fn calculate_delay(&self, initial_delay_secs: u64, attempt: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed => Duration::from_secs(initial_delay_secs),
            BackoffStrategy::Exponential { max_delay_secs } => {
                let delay_secs = initial_delay_secs
                    .saturating_mul(2_u64.saturating_pow(attempt))
                    .min(*max_delay_secs);
                Duration::from_secs(delay_secs)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownDecision {
    /// Restart after `delay`; `restart_count` includes this trigger
    Restart { restart_count: u32, delay: Duration },
    /// Limit reached: the server goes crash-looping
    Suppress { restart_count: u32 },
}

/// Per-server restart counter over a sliding cooldown window.
///
/// Unexpected exits and sustained critical health share one counter.
#[derive(Debug, Clone, Default)]
pub struct CooldownState {
    restarts_in_window: u32,
    window_start: Option<Instant>,
}

impl CooldownState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a restart trigger at `now` and decide what to do with it
    pub fn register_trigger(&mut self, now: Instant, config: &AlertThresholdConfig) -> CooldownDecision {
        self.expire(now, config.restart_cooldown());

        if self.window_start.is_none() {
            self.window_start = Some(now);
        }
        self.restarts_in_window = (self.restarts_in_window + 1).min(config.max_restart_count);

        if self.restarts_in_window < config.max_restart_count {
            let backoff = BackoffStrategy::Exponential {
                max_delay_secs: config.max_restart_delay_secs,
            };
            CooldownDecision::Restart {
                restart_count: self.restarts_in_window,
                delay: backoff.calculate_delay(config.restart_delay_secs, self.restarts_in_window - 1),
            }
        } else {
            CooldownDecision::Suppress {
                restart_count: self.restarts_in_window,
            }
        }
    }

    /// Reset the counter once the window has fully elapsed
    pub fn expire(&mut self, now: Instant, window: Duration) -> bool {
        match self.window_start {
            Some(start) if now.saturating_duration_since(start) >= window => {
                self.reset();
                true
            }
            _ => false,
        }
    }

    pub fn reset(&mut self) {
        self.restarts_in_window = 0;
        self.window_start = None;
    }

    pub fn restarts_in_window(&self) -> u32 {
        self.restarts_in_window
    }

    pub fn window_start(&self) -> Option<Instant> {
        self.window_start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max: u32) -> AlertThresholdConfig {
        AlertThresholdConfig {
            max_restart_count: max,
            restart_delay_secs: 1,
            max_restart_delay_secs: 60,
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_exponential() {
        let strategy = BackoffStrategy::Exponential { max_delay_secs: 60 };
        assert_eq!(strategy.calculate_delay(1, 0), Duration::from_secs(1));
        assert_eq!(strategy.calculate_delay(1, 3), Duration::from_secs(8));
        assert_eq!(strategy.calculate_delay(1, 10), Duration::from_secs(60));
        assert_eq!(strategy.calculate_delay(0, 5), Duration::ZERO);
    }

    #[test]
    fn test_backoff_fixed() {
        assert_eq!(
            BackoffStrategy::Fixed.calculate_delay(5, 9),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_third_trigger_is_suppressed_with_max_three() {
        let cfg = config(3);
        let mut state = CooldownState::new();
        let now = Instant::now();

        assert_eq!(
            state.register_trigger(now, &cfg),
            CooldownDecision::Restart {
                restart_count: 1,
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(
            state.register_trigger(now, &cfg),
            CooldownDecision::Restart {
                restart_count: 2,
                delay: Duration::from_secs(2)
            }
        );
        assert_eq!(
            state.register_trigger(now, &cfg),
            CooldownDecision::Suppress { restart_count: 3 }
        );
        // The counter never exceeds the limit
        assert_eq!(
            state.register_trigger(now, &cfg),
            CooldownDecision::Suppress { restart_count: 3 }
        );
        assert_eq!(state.restarts_in_window(), 3);
    }

    #[test]
    fn test_window_elapse_resets() {
        let cfg = config(2);
        let mut state = CooldownState::new();
        let start = Instant::now();

        assert!(matches!(
            state.register_trigger(start, &cfg),
            CooldownDecision::Restart { .. }
        ));
        assert!(matches!(
            state.register_trigger(start, &cfg),
            CooldownDecision::Suppress { .. }
        ));

        let later = start + cfg.restart_cooldown();
        assert!(matches!(
            state.register_trigger(later, &cfg),
            CooldownDecision::Restart { restart_count: 1, .. }
        ));
    }

    #[test]
    fn test_manual_reset() {
        let cfg = config(2);
        let mut state = CooldownState::new();
        let now = Instant::now();
        state.register_trigger(now, &cfg);
        state.register_trigger(now, &cfg);
        state.reset();
        assert_eq!(state.restarts_in_window(), 0);
        assert!(state.window_start().is_none());
        assert!(matches!(
            state.register_trigger(now, &cfg),
            CooldownDecision::Restart { .. }
        ));
    }
}
