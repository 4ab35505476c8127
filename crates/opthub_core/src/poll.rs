use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{OptHubError, Result};

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Upper bound of the random delay added to every wait.
    pub max_jitter: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        PollConfig {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5 * 60),
            multiplier: 1.2,
            max_jitter: Duration::from_millis(500),
        }
    }
}

impl PollConfig {
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_jitter(mut self, jitter: Duration) -> Self {
        self.max_jitter = jitter;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(OptHubError::Config {
                message: format!("backoff multiplier must be >= 1, got {}", self.multiplier),
            });
        }
        if self.initial_delay > self.max_delay {
            return Err(OptHubError::Config {
                message: format!(
                    "initial delay {:?} exceeds max delay {:?}",
                    self.initial_delay, self.max_delay
                ),
            });
        }
        Ok(())
    }
}

/// Base delay sequence `min(initial * multiplier^(n-1), max)`.
///
/// ```
/// use std::time::Duration;
/// use opthub_core::poll::{Backoff, PollConfig};
///
/// let config = PollConfig::default()
///     .with_initial_delay(Duration::from_millis(100))
///     .with_max_delay(Duration::from_millis(350))
///     .with_multiplier(2.0);
/// let delays: Vec<Duration> = Backoff::new(&config).take(4).collect();
/// assert_eq!(delays, [100, 200, 350, 350].map(Duration::from_millis));
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
    multiplier: f64,
}

impl Backoff {
    pub fn new(config: &PollConfig) -> Self {
        Backoff {
            current: config.initial_delay.min(config.max_delay),
            max: config.max_delay,
            multiplier: config.multiplier,
        }
    }

    /// Delay for the next wait; advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.multiplier)
            .map_or(self.max, |next| next.min(self.max));
        delay
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.next_delay())
    }
}

fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let secs = rand::thread_rng().gen_range(0.0..max.as_secs_f64());
    Duration::from_secs_f64(secs)
}

/// Cloneable cancellation flag for poll loops.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        CancelToken { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [CancelToken::cancel] has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// State of one poll loop.
///
/// Drive it by hand when the fetch step needs `&mut` access to the caller:
/// ```no_run
/// # use opthub_core::poll::{PollConfig, PollLoop};
/// # async fn fetch() -> opthub_core::Result<bool> { Ok(true) }
/// # async fn run() -> opthub_core::Result<()> {
/// let mut poll = PollLoop::new(&PollConfig::default(), None, None);
/// loop {
///     poll.checkpoint()?;
///     if poll.fetch(fetch()).await? {
///         break;
///     }
///     poll.wait().await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct PollLoop {
    start: Instant,
    backoff: Backoff,
    max_jitter: Duration,
    timeout: Option<Duration>,
    cancel: Option<CancelToken>,
    attempt: u32,
}

impl PollLoop {
    pub fn new(
        config: &PollConfig,
        timeout: Option<Duration>,
        cancel: Option<CancelToken>,
    ) -> Self {
        PollLoop {
            start: Instant::now(),
            backoff: Backoff::new(config),
            max_jitter: config.max_jitter,
            timeout,
            cancel,
            attempt: 0,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Number of waits performed so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Fails with [OptHubError::Cancelled] if the loop was cancelled.
    pub fn checkpoint(&self) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(OptHubError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Runs one fetch, abandoning it on cancellation or once the timeout
    /// has been reached.
    ///
    /// A fetch that is already complete always wins.
    pub async fn fetch<T, Fut>(&self, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let cancelled = async {
            match &self.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let deadline = self.timeout.and_then(|t| self.start.checked_add(t));
        let expired = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            res = fut => res,
            _ = cancelled => Err(OptHubError::Cancelled),
            _ = expired => {
                debug!(elapsed_ms = self.elapsed().as_millis() as u64, "fetch abandoned at timeout");
                Err(OptHubError::PollTimeout { elapsed: self.elapsed() })
            }
        }
    }

    /// Sleeps before the next attempt.
    ///
    /// Fails with [OptHubError::PollTimeout] once the timeout has been
    /// reached. The sleep never extends past the timeout.
    pub async fn wait(&mut self) -> Result<()> {
        self.checkpoint()?;

        let elapsed = self.elapsed();
        let mut delay = self
            .backoff
            .next_delay()
            .saturating_add(jitter(self.max_jitter));
        if let Some(timeout) = self.timeout {
            if elapsed >= timeout {
                return Err(OptHubError::PollTimeout { elapsed });
            }
            delay = delay.min(timeout - elapsed);
        }

        self.attempt += 1;
        debug!(
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            elapsed_ms = elapsed.as_millis() as u64,
            "waiting before next poll"
        );

        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => Ok(()),
                    _ = token.cancelled() => Err(OptHubError::Cancelled),
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

/// Calls `fetch` until `done` accepts its value.
///
/// Only "not ready yet" values are retried. The accepted value is returned
/// without a further delay and errors from `fetch` are returned as-is. A
/// fetch still in flight is dropped on cancellation or timeout.
pub async fn poll_until<T, F, Fut, P>(
    config: &PollConfig,
    timeout: Option<Duration>,
    cancel: Option<CancelToken>,
    mut fetch: F,
    mut done: P,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: FnMut(&T) -> bool,
{
    config.validate()?;
    let mut poll = PollLoop::new(config, timeout, cancel);

    loop {
        poll.checkpoint()?;
        let value = poll.fetch(fetch()).await?;
        if done(&value) {
            return Ok(value);
        }
        poll.wait().await?;
    }
}
