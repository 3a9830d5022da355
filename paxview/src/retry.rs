//! Backing off between attempts.

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use backoff::ExponentialBackoffBuilder;

/// Parameters of the exponential backoff applied between retries of state
/// transfers, joins and client invocations.
#[derive(Clone, Copy, Debug)]
pub struct RetrySettings {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    /// Give up after this long, `None` retries indefinitely.
    pub max_elapsed: Option<Duration>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(20),
            max_interval: Duration::from_secs(1),
            multiplier: 2.0,
            max_elapsed: None,
        }
    }
}

impl RetrySettings {
    pub fn giving_up_after(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = Some(max_elapsed);
        self
    }

    pub fn backoff(&self) -> RetryWithBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_multiplier(self.multiplier)
            .with_max_elapsed_time(self.max_elapsed)
            .build()
            .into()
    }
}

/// Pauses between attempts based on a [`Backoff`] implementation.
#[derive(Debug)]
pub struct RetryWithBackoff<B = ExponentialBackoff>(B);

impl<B: Backoff> RetryWithBackoff<B> {
    /// Waits until the next attempt is due. Resolves to `false`, without
    /// waiting, if no further attempt should be made.
    pub async fn pause(&mut self) -> bool {
        match self.0.next_backoff() {
            Some(d) => {
                futures_timer::Delay::new(d).await;
                true
            }
            None => false,
        }
    }
}

impl<B: Backoff> From<B> for RetryWithBackoff<B> {
    fn from(backoff: B) -> Self {
        Self(backoff)
    }
}
