//! Polite request pacing and a circuit breaker for repeated failures.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::RateLimitSettings;

const WINDOW: Duration = Duration::from_secs(60);

pub struct RateLimiter {
    min_delay: Duration,
    max_delay: Duration,
    requests_per_minute: usize,
    retry_attempts: u32,
    retry_backoff: u32,
    last_request: Option<Instant>,
    /// Request times inside the last minute, oldest first.
    window: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(settings: &RateLimitSettings) -> Self {
        let a = Duration::from_secs_f64(settings.min_delay_secs.max(0.0));
        let b = Duration::from_secs_f64(settings.max_delay_secs.max(0.0));
        Self {
            min_delay: a.min(b),
            max_delay: a.max(b),
            requests_per_minute: settings.requests_per_minute.max(1),
            retry_attempts: settings.retry_attempts,
            retry_backoff: settings.retry_backoff,
            last_request: None,
            window: VecDeque::new(),
        }
    }

    /// How long to sleep before a request at `now`. The first request goes out at once;
    /// after that the gap since the previous request is a random value in
    /// `[min_delay, max_delay]`, so never below `min_delay`.
    pub fn delay_at(&self, now: Instant) -> Duration {
        let Some(last) = self.last_request else {
            return Duration::ZERO;
        };
        let gap = if self.max_delay > self.min_delay {
            Duration::from_secs_f64(
                rand::rng().random_range(self.min_delay.as_secs_f64()..=self.max_delay.as_secs_f64()),
            )
        } else {
            self.min_delay
        };
        gap.saturating_sub(now.saturating_duration_since(last))
    }

    pub fn record_request_at(&mut self, now: Instant) {
        self.last_request = Some(now);
        self.window.push_back(now);
        self.prune(now);
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.window.front() {
            if now.saturating_duration_since(oldest) >= WINDOW {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Time until the per-minute budget allows another request, or None if it does now.
    pub fn window_wait_at(&mut self, now: Instant) -> Option<Duration> {
        self.prune(now);
        if self.window.len() < self.requests_per_minute {
            return None;
        }
        let oldest = *self.window.front()?;
        Some(WINDOW.saturating_sub(now.saturating_duration_since(oldest)))
    }

    /// Sleep for the per-minute budget and the inter-request delay, then record the request.
    pub async fn wait(&mut self) {
        if let Some(pause) = self.window_wait_at(Instant::now()) {
            warn!(
                "Rate limit of {}/min reached, pausing {:.1}s",
                self.requests_per_minute,
                pause.as_secs_f64()
            );
            sleep(pause).await;
        }
        let delay = self.delay_at(Instant::now());
        if !delay.is_zero() {
            sleep(delay).await;
        }
        self.record_request_at(Instant::now());
    }

    /// Exponential backoff: `retry_backoff ^ attempt` seconds.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_secs(u64::from(self.retry_backoff).saturating_pow(attempt))
    }

    /// After a 429 the backoff is counted in minutes.
    pub fn rate_limited_delay(&self, attempt: u32) -> Duration {
        self.retry_delay(attempt).saturating_mul(60)
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Stops requests after `failure_threshold` consecutive failures, then lets one probe
/// through once `timeout` has passed since the last failure.
pub struct CircuitBreaker {
    failure_threshold: u32,
    timeout: Duration,
    failures: u32,
    last_failure: Option<Instant>,
    state: CircuitState,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            timeout,
            failures: 0,
            last_failure: None,
            state: CircuitState::Closed,
        }
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self::new(
            settings.failure_threshold,
            Duration::from_secs(settings.circuit_timeout_secs),
        )
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn record_success(&mut self) {
        if self.state != CircuitState::Closed {
            info!("Circuit breaker closed");
        }
        self.failures = 0;
        self.state = CircuitState::Closed;
    }

    pub fn record_failure_at(&mut self, now: Instant) {
        self.failures += 1;
        self.last_failure = Some(now);
        let reopen = self.state == CircuitState::HalfOpen;
        if reopen || self.failures >= self.failure_threshold {
            if self.state != CircuitState::Open {
                error!(
                    "Circuit breaker opened after {} failures, waiting {}s",
                    self.failures,
                    self.timeout.as_secs()
                );
            }
            self.state = CircuitState::Open;
        }
    }

    pub fn record_failure(&mut self) {
        self.record_failure_at(Instant::now());
    }

    pub fn can_proceed_at(&mut self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled = self
                    .last_failure
                    .is_none_or(|t| now.saturating_duration_since(t) >= self.timeout);
                if cooled {
                    info!("Circuit breaker half-open, probing");
                    self.state = CircuitState::HalfOpen;
                }
                cooled
            }
        }
    }

    pub fn can_proceed(&mut self) -> bool {
        self.can_proceed_at(Instant::now())
    }
}
