//! Exponential backoff implementations

use std::{iter::Iterator, time::Duration};

/// Exponential backoff iterator
///
/// Yields monotonically increasing delays until the number of attempts specified by `limit` is used up.
/// Each delay is the previous one multiplied by `multiplier`, capped at `ceiling` once it grows past it.
#[derive(Debug, Clone)]
pub struct Backoff {
    retries: u32,
    limit: u32,
    multiplier: u32,
    current: Duration,
    ceiling: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            retries: 0,
            limit: 13,
            multiplier: 2,
            current: Duration::from_millis(25),
            ceiling: Duration::from_secs(30),
        }
    }
}

impl Backoff {
    /// Creates a backoff which yields at most `limit` delays
    pub fn with_limit(limit: u32) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    /// Replaces the upper bound for individual delays
    pub fn ceiling(mut self, ceiling: Duration) -> Self {
        self.ceiling = ceiling;
        self
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        self.retries += 1;

        if self.retries > self.limit {
            None
        } else {
            self.current = (self.current * self.multiplier).min(self.ceiling);
            Some(self.current)
        }
    }
}
