//! Answer polling schedule

use std::time::Duration;

use crate::config::PollingConfig;

/// Shortest sleep between answer fetches
const MIN_INTERVAL: Duration = Duration::from_secs(1);

fn interval_secs(secs: u64) -> Duration {
    Duration::from_secs(secs).max(MIN_INTERVAL)
}

/// Backoff used while waiting for the remote answer.
///
/// The interval is picked from the cumulative time already slept: 1 s, then
/// 5 s once 30 s have passed, then 30 s once 5 min have passed. Polling gives
/// up once the cumulative sleep reaches 30 min. Intervals are never shorter
/// than 1 s, whatever the configuration says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerPollSchedule {
    initial_interval: Duration,
    medium_after: Duration,
    medium_interval: Duration,
    slow_after: Duration,
    slow_interval: Duration,
    max_duration: Duration,
}

impl Default for AnswerPollSchedule {
    fn default() -> Self {
        Self::from(&PollingConfig::default())
    }
}

impl From<&PollingConfig> for AnswerPollSchedule {
    fn from(config: &PollingConfig) -> Self {
        Self {
            initial_interval: interval_secs(config.initial_interval_secs),
            medium_after: Duration::from_secs(config.medium_after_secs),
            medium_interval: interval_secs(config.medium_interval_secs),
            slow_after: Duration::from_secs(config.slow_after_secs),
            slow_interval: interval_secs(config.slow_interval_secs),
            max_duration: Duration::from_secs(config.max_duration_secs),
        }
    }
}

impl AnswerPollSchedule {
    /// Sleep to take after a miss, given the time already spent sleeping
    pub fn interval_after(&self, elapsed: Duration) -> Duration {
        if elapsed >= self.slow_after {
            self.slow_interval
        } else if elapsed >= self.medium_after {
            self.medium_interval
        } else {
            self.initial_interval
        }
    }

    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }

    /// Every sleep of an unanswered polling run, in order
    pub fn sleeps(&self) -> impl Iterator<Item = Duration> + '_ {
        let mut elapsed = Duration::ZERO;
        std::iter::from_fn(move || {
            if elapsed >= self.max_duration {
                return None;
            }
            let interval = self.interval_after(elapsed);
            elapsed += interval;
            Some(interval)
        })
    }
}
