//! Per-model throttling for completion providers.
//!
//! OpenAI-compatible providers report their quotas in `x-ratelimit-*`
//! response headers. The limiter records them per model and blocks the
//! calling worker thread while a quota is exhausted or a 429 cool-down is
//! active.

use dashmap::DashMap;
use reqwest::header::HeaderMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One provider quota, requests or tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Quota {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub resets_at: Option<Instant>,
}

impl Quota {
    /// Read `x-ratelimit-{limit,remaining,reset}-{kind}`.
    fn update(&mut self, headers: &HeaderMap, kind: &str, now: Instant) {
        let header = |name: &str| {
            headers
                .get(format!("x-ratelimit-{name}-{kind}"))
                .and_then(|v| v.to_str().ok())
        };

        if let Some(limit) = header("limit") {
            self.limit = limit.trim().parse().ok();
        }
        if let Some(remaining) = header("remaining") {
            self.remaining = remaining.trim().parse().ok();
        }
        if let Some(reset) = header("reset").and_then(parse_reset) {
            self.resets_at = Some(now + reset);
        }
    }

    /// Time until the quota refills, zero unless it is exhausted.
    fn blocked_for(&self, now: Instant) -> Duration {
        match (self.remaining, self.resets_at) {
            (Some(0), Some(at)) if at > now => at - now,
            _ => Duration::ZERO,
        }
    }
}

/// Throttling state of one model.
#[derive(Debug, Clone, Default)]
pub struct ModelThrottle {
    pub requests: Quota,
    pub tokens: Quota,
    /// 429s since the last successful request
    pub consecutive_429s: u32,
    pub cool_down_until: Option<Instant>,
}

impl ModelThrottle {
    /// How long a request to this model has to wait.
    pub fn wait_time(&self) -> Duration {
        let now = Instant::now();
        let cool_down = self
            .cool_down_until
            .filter(|&until| until > now)
            .map_or(Duration::ZERO, |until| until - now);

        cool_down
            .max(self.requests.blocked_for(now))
            .max(self.tokens.blocked_for(now))
    }

    pub fn can_proceed(&self) -> bool {
        self.wait_time().is_zero()
    }

    fn record_429(&mut self, cool_down: Duration) {
        self.consecutive_429s += 1;
        self.cool_down_until = Some(Instant::now() + cool_down);
        warn!(
            consecutive_429s = self.consecutive_429s,
            cool_down_secs = cool_down.as_secs_f64(),
            "Rate limited (429), cooling down"
        );
    }

    fn record_success(&mut self) {
        self.consecutive_429s = 0;
        self.cool_down_until = None;
    }
}

/// Parse a reset interval as sent by OpenAI (`"1s"`, `"6m0s"`, `"120ms"`)
/// or as plain seconds (`"1.5"`).
fn parse_reset(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).ok();
    }

    let mut total = 0.0;
    let mut number = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        let value: f64 = number.parse().ok()?;
        number.clear();
        total += match c {
            'h' => value * 3600.0,
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                value / 1000.0
            }
            'm' => value * 60.0,
            's' => value,
            _ => return None,
        };
    }
    if !number.is_empty() {
        return None;
    }
    Duration::try_from_secs_f64(total).ok()
}

/// Rate limiter shared by every worker thread of a client.
#[derive(Debug, Default)]
pub struct RateLimiter {
    models: DashMap<String, ModelThrottle>,
    total_requests: AtomicU64,
    total_429s: AtomicU64,
    total_wait_ms: AtomicU64,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block the calling thread while `model` is throttled.
    ///
    /// Returns the duration waited.
    pub fn wait_if_needed(&self, model: &str) -> Duration {
        // Read under the shard lock, sleep without it.
        let wait = self
            .models
            .get(model)
            .map_or(Duration::ZERO, |throttle| throttle.wait_time());

        if !wait.is_zero() {
            debug!(
                model = model,
                wait_ms = wait.as_millis() as u64,
                "Waiting for rate limit"
            );
            self.total_wait_ms
                .fetch_add(wait.as_millis() as u64, Ordering::Relaxed);
            thread::sleep(wait);
        }
        wait
    }

    pub fn can_proceed(&self, model: &str) -> bool {
        self.models
            .get(model)
            .is_none_or(|throttle| throttle.can_proceed())
    }

    /// Snapshot of one model's throttling state.
    pub fn throttle(&self, model: &str) -> Option<ModelThrottle> {
        self.models.get(model).map(|throttle| throttle.clone())
    }

    /// Record the outcome of one HTTP request.
    ///
    /// A 429 holds further requests to `model` for `cool_down`.
    pub fn record_request(&self, model: &str, status: u16, headers: &HeaderMap, cool_down: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        let mut throttle = self.models.entry(model.to_string()).or_default();
        throttle.requests.update(headers, "requests", now);
        throttle.tokens.update(headers, "tokens", now);

        match status {
            429 => {
                self.total_429s.fetch_add(1, Ordering::Relaxed);
                throttle.record_429(cool_down);
            }
            s if s < 400 => throttle.record_success(),
            _ => {}
        }
    }

    pub fn stats(&self) -> RateLimiterStats {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_429s = self.total_429s.load(Ordering::Relaxed);
        RateLimiterStats {
            total_requests,
            total_429s,
            total_wait_secs: self.total_wait_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            rate_limit_ratio: if total_requests > 0 {
                total_429s as f64 / total_requests as f64
            } else {
                0.0
            },
            models_tracked: self.models.len(),
        }
    }
}

/// Rate limiter statistics.
#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub total_requests: u64,
    pub total_429s: u64,
    pub total_wait_secs: f64,
    pub rate_limit_ratio: f64,
    pub models_tracked: usize,
}
