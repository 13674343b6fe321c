//! Bounded retry with exponential backoff and jitter.
//!
//! [`RetryPolicy::call`] retries a synchronous operation in place.
//! [`RetryPolicy::future`] retries an operation that produces a
//! [`ProxyFuture`], resubmitting it whenever the previous attempt failed
//! with a retryable error. The loop runs as a task on a [`RequestPool`];
//! only the submission itself occupies one of the pool's threads.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::Notify;

use crate::error::PulpError;
use crate::future::{ProxyFuture, Resolver};
use crate::pool::{DetachOnDrop, RequestPool};

/// Default number of attempts, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
/// Default delay before the first retry.
pub const DEFAULT_SLEEP: Duration = Duration::from_secs(1);
/// Default growth factor between consecutive delays.
pub const DEFAULT_MULTIPLIER: f64 = 2.0;
/// Default upper bound on a single delay.
pub const DEFAULT_MAX_SLEEP: Duration = Duration::from_secs(120);
/// Default relative jitter applied to each delay.
pub const DEFAULT_JITTER: f64 = 0.1;

/// Function used to wait between attempts.
pub type Sleeper = Arc<dyn Fn(Duration) + Send + Sync>;

/// How often and how patiently to retry.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least one attempt is made.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub sleep: Duration,
    pub multiplier: f64,
    pub max_sleep: Duration,
    /// Each delay is scaled by a random factor in `1 ± jitter`.
    pub jitter: f64,
    /// Replacement for real waiting, mostly for tests.
    sleeper: Option<Sleeper>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("sleep", &self.sleep)
            .field("multiplier", &self.multiplier)
            .field("max_sleep", &self.max_sleep)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            sleep: DEFAULT_SLEEP,
            multiplier: DEFAULT_MULTIPLIER,
            max_sleep: DEFAULT_MAX_SLEEP,
            jitter: DEFAULT_JITTER,
            sleeper: None,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that makes exactly one attempt.
    #[must_use]
    pub fn never() -> Self {
        Self::default().with_max_attempts(1)
    }

    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub const fn with_sleep(mut self, sleep: Duration) -> Self {
        self.sleep = sleep;
        self
    }

    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    #[must_use]
    pub const fn with_max_sleep(mut self, max_sleep: Duration) -> Self {
        self.max_sleep = max_sleep;
        self
    }

    #[must_use]
    pub const fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replaces the function used to wait between attempts.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleeper = Some(Arc::new(sleeper));
        self
    }

    /// Delay before retry number `retry` (1-based), without jitter.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let secs = self.sleep.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_sleep.as_secs_f64() {
            self.max_sleep
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let jitter = self.jitter.min(1.0);
        let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
        delay.mul_f64(factor)
    }

    const fn attempts(&self) -> u32 {
        if self.max_attempts == 0 {
            1
        } else {
            self.max_attempts
        }
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or
    /// the attempt budget is spent.
    ///
    /// Every retry is preceded by a warning naming the attempt, so an
    /// operation that fails `k` times and then succeeds logs `k` warnings.
    ///
    /// # Errors
    ///
    /// Returns a non-retryable error as soon as it occurs, or
    /// [`PulpError::RetriesExhausted`] wrapping the last error.
    pub fn call<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, PulpError>,
    ) -> Result<T, PulpError> {
        let max = self.attempts();
        let mut attempt = 1;
        loop {
            let error = match op() {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };
            if attempt >= max {
                tracing::debug!(what, attempts = attempt, error = %error, "retries exhausted");
                return Err(PulpError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }
            tracing::warn!(
                what,
                attempt,
                max_attempts = max,
                error = %error,
                "Retrying due to error: {error} [{attempt}/{max}]"
            );
            let delay = self.jittered(self.delay_for(attempt));
            match &self.sleeper {
                Some(sleeper) => sleeper(delay),
                None => std::thread::sleep(delay),
            }
            attempt += 1;
        }
    }

    async fn pause(&self, delay: Duration) {
        match &self.sleeper {
            Some(sleeper) => sleeper(delay),
            None => tokio::time::sleep(delay).await,
        }
    }

    /// Retries an asynchronous operation.
    ///
    /// `submit` runs on one of `pool`'s threads for each attempt; the
    /// returned future resolves with the first successful attempt's value.
    /// Cancelling it cancels the attempt in flight and stops retrying.
    /// Dropping every handle to it drops the attempt in flight, so nothing
    /// keeps waiting on work nobody wants.
    pub fn future<T, F>(&self, pool: &RequestPool, what: impl Into<String>, submit: F) -> ProxyFuture<T>
    where
        T: Clone + Send + 'static,
        F: Fn() -> ProxyFuture<T> + Send + Sync + 'static,
    {
        let (future, resolver) = ProxyFuture::pending();
        let handle = match pool.handle() {
            Ok(handle) => handle,
            Err(e) => {
                resolver.resolve(Err(e));
                return future;
            }
        };

        let attempts = Attempts {
            current: Arc::new(Mutex::new(None)),
            cancelled: Arc::new(AtomicBool::new(false)),
            abandoned: Arc::new(Notify::new()),
        };
        {
            let current = Arc::clone(&attempts.current);
            let cancelled = Arc::clone(&attempts.cancelled);
            resolver.on_cancel(move || {
                cancelled.store(true, Ordering::SeqCst);
                let attempt = current.lock().clone();
                if let Some(attempt) = attempt {
                    attempt.cancel();
                }
            });
        }
        {
            let abandoned = Arc::clone(&attempts.abandoned);
            resolver.on_abandon(move || abandoned.notify_one());
        }

        let policy = self.clone();
        let what = what.into();
        let guard = DetachOnDrop(resolver);
        handle.spawn(async move {
            let outcome = policy
                .drive(&what, &guard.0, &attempts, Arc::new(submit))
                .await;
            guard.0.resolve(outcome);
        });
        future
    }

    async fn drive<T, F>(
        &self,
        what: &str,
        resolver: &Resolver<T>,
        attempts: &Attempts<T>,
        submit: Arc<F>,
    ) -> Result<T, PulpError>
    where
        T: Clone + Send + 'static,
        F: Fn() -> ProxyFuture<T> + Send + Sync + 'static,
    {
        let max = self.attempts();
        let mut attempt = 1;
        loop {
            if attempts.cancelled.load(Ordering::SeqCst) {
                return Err(PulpError::Cancelled { task_ids: Vec::new() });
            }
            if resolver.is_abandoned() {
                tracing::debug!(what, "result no longer wanted, not submitting");
                return Err(PulpError::Detached);
            }

            let submit = Arc::clone(&submit);
            let pending = tokio::task::spawn_blocking(move || submit())
                .await
                .map_err(|e| PulpError::Thread(e.to_string()))?;
            *attempts.current.lock() = Some(pending.clone());
            if attempts.cancelled.load(Ordering::SeqCst) {
                pending.cancel();
            }

            let outcome = tokio::select! {
                outcome = pending => outcome,
                () = attempts.abandoned.notified() => {
                    attempts.current.lock().take();
                    tracing::debug!(what, "result no longer wanted, dropping attempt");
                    return Err(PulpError::Detached);
                }
            };
            attempts.current.lock().take();

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };
            if attempt >= max {
                tracing::debug!(what, attempts = attempt, error = %error, "retries exhausted");
                return Err(PulpError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }
            tracing::warn!(
                what,
                attempt,
                max_attempts = max,
                error = %error,
                "Retrying due to error: {error} [{attempt}/{max}]"
            );
            self.pause(self.jittered(self.delay_for(attempt))).await;
            attempt += 1;
        }
    }
}

/// State shared between a retried future's cancel and abandon hooks and
/// the task driving its attempts.
struct Attempts<T> {
    current: Arc<Mutex<Option<ProxyFuture<T>>>>,
    cancelled: Arc<AtomicBool>,
    abandoned: Arc<Notify>,
}
