//! Per-provider rate limiting: two independent sliding windows, tokens per
//! hour and requests per minute. Consulted before every LLM call and,
//! optionally, before expensive tool bodies.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use llamar_config::RateLimitConfig;

const WARN_FRACTION: f64 = 0.8;

/// Outcome of a pre-call check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitVerdict {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl RateLimitVerdict {
    fn ok() -> Self {
        Self {
            ok: true,
            message: None,
            warning: None,
        }
    }

    fn warn(warning: String) -> Self {
        Self {
            ok: true,
            message: None,
            warning: Some(warning),
        }
    }

    fn refuse(message: String) -> Self {
        Self {
            ok: false,
            message: Some(message),
            warning: None,
        }
    }
}

#[derive(Debug, Clone)]
struct ProviderWindow {
    tokens_hour: u64,
    requests_minute: u64,
    hour_start: DateTime<Utc>,
    minute_start: DateTime<Utc>,
}

impl ProviderWindow {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            tokens_hour: 0,
            requests_minute: 0,
            hour_start: now,
            minute_start: now,
        }
    }

    fn roll_over(&mut self, now: DateTime<Utc>) {
        if now - self.hour_start >= Duration::hours(1) {
            self.hour_start = now;
            self.tokens_hour = 0;
        }
        if now - self.minute_start >= Duration::minutes(1) {
            self.minute_start = now;
            self.requests_minute = 0;
        }
    }
}

/// The limiter. One instance per server, wrapped by the caller for shared
/// mutation.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: HashMap<String, ProviderWindow>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a call estimated at `est_tokens` may proceed.
    pub fn check(
        &mut self,
        provider: &str,
        est_tokens: u64,
        limits: Option<&RateLimitConfig>,
    ) -> RateLimitVerdict {
        self.check_at(provider, est_tokens, limits, Utc::now())
    }

    /// Record a completed call against the current windows.
    pub fn track(&mut self, provider: &str, tokens: u64, requests: u64) {
        self.track_at(provider, tokens, requests, Utc::now());
    }

    fn check_at(
        &mut self,
        provider: &str,
        est_tokens: u64,
        limits: Option<&RateLimitConfig>,
        now: DateTime<Utc>,
    ) -> RateLimitVerdict {
        let window = self
            .windows
            .entry(provider.to_string())
            .or_insert_with(|| ProviderWindow::new(now));
        window.roll_over(now);

        let Some(limits) = limits else {
            return RateLimitVerdict::ok();
        };

        if let Some(rpm) = limits.requests_per_minute
            && window.requests_minute + 1 > rpm
        {
            let wait_secs = 60 - (now - window.minute_start).num_seconds().clamp(0, 59);
            return RateLimitVerdict::refuse(format!(
                "Rate limit exceeded: {rpm} requests/minute for {provider}; try again in {wait_secs} seconds"
            ));
        }

        if let Some(tph) = limits.tokens_per_hour {
            if window.tokens_hour + est_tokens > tph {
                let wait_mins = 60 - (now - window.hour_start).num_minutes().clamp(0, 59);
                return RateLimitVerdict::refuse(format!(
                    "Rate limit exceeded: {tph} tokens/hour for {provider}; try again in {wait_mins} minutes"
                ));
            }
            let projected = window.tokens_hour + est_tokens;
            if (projected as f64) >= (tph as f64) * WARN_FRACTION {
                return RateLimitVerdict::warn(format!(
                    "Approaching token limit: {projected} of {tph} tokens/hour used for {provider}"
                ));
            }
        }

        RateLimitVerdict::ok()
    }

    fn track_at(&mut self, provider: &str, tokens: u64, requests: u64, now: DateTime<Utc>) {
        let window = self
            .windows
            .entry(provider.to_string())
            .or_insert_with(|| ProviderWindow::new(now));
        window.roll_over(now);
        window.tokens_hour += tokens;
        window.requests_minute += requests;
    }
}
