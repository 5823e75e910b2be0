//! Per-host circuit breaker.
//!
//! Every classified failure against a host puts it into cooldown; while the
//! cooldown lasts no request to that host leaves the process. Consecutive
//! failures double the cooldown up to a ceiling, and a random jitter keeps
//! destinations that share a host from retrying in lockstep.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::fetcher::FetchError;

const PERMISSION_COOLDOWN: Duration = Duration::from_secs(10 * 60);
const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(2 * 60);
const GATEWAY_COOLDOWN: Duration = Duration::from_secs(2 * 60);
const SERVER_COOLDOWN: Duration = Duration::from_secs(60);
const CLIENT_COOLDOWN: Duration = Duration::from_secs(5 * 60);
const NETWORK_COOLDOWN: Duration = Duration::from_secs(30);

pub const DEFAULT_CEILING: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_JITTER: Duration = Duration::from_millis(1000);

/// Classified reason for a failed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    Status {
        code: u16,
        /// Parsed `Retry-After`, only meaningful for 429.
        retry_after: Option<Duration>,
    },
    Timeout,
    Network,
}

impl FailureKind {
    pub fn status(code: u16) -> Self {
        Self::Status {
            code,
            retry_after: None,
        }
    }

    /// Permission and rate-limit rejections go straight to cooldown
    /// without rotating identity.
    pub fn is_hard_reject(&self) -> bool {
        matches!(self, Self::Status { code: 401 | 403 | 429, .. })
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Cooldown for the first strike.
    pub fn base_cooldown(&self) -> Duration {
        match self {
            Self::Status { code: 401 | 403, .. } => PERMISSION_COOLDOWN,
            Self::Status {
                code: 429,
                retry_after,
            } => retry_after.unwrap_or(RATE_LIMIT_COOLDOWN),
            Self::Status {
                code: 502..=504, ..
            } => GATEWAY_COOLDOWN,
            Self::Status { code: 500..=599, .. } => SERVER_COOLDOWN,
            Self::Status { code: 400..=499, .. } => CLIENT_COOLDOWN,
            Self::Status { .. } | Self::Timeout | Self::Network => NETWORK_COOLDOWN,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Status { code, .. } => format!("HTTP {}", code),
            Self::Timeout => "timeout".to_string(),
            Self::Network => "network error".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostState {
    pub cooldown_until: Option<Instant>,
    pub strike_count: u32,
    pub last_reason: Option<String>,
}

impl HostState {
    fn new() -> Self {
        Self {
            cooldown_until: None,
            strike_count: 0,
            last_reason: None,
        }
    }

    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.cooldown_until
            .filter(|until| now < *until)
            .map(|until| until - now)
    }
}

pub struct HostBreaker {
    hosts: Mutex<HashMap<String, HostState>>,
    ceiling: Duration,
    jitter: Duration,
}

impl Default for HostBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_CEILING, DEFAULT_JITTER)
    }
}

impl HostBreaker {
    pub fn new(ceiling: Duration, jitter: Duration) -> Self {
        Self {
            hosts: Mutex::new(HashMap::new()),
            ceiling,
            jitter,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, HostState>> {
        // Every update is a single assignment, so a poisoned map is still consistent.
        self.hosts.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fails with `HostCoolingDown` while `host` is in cooldown.
    pub fn check(&self, host: &str, now: Instant) -> Result<(), FetchError> {
        let hosts = self.lock();
        match hosts.get(host).and_then(|state| state.remaining(now)) {
            Some(remaining) => Err(FetchError::HostCoolingDown {
                host: host.to_string(),
                remaining,
            }),
            None => Ok(()),
        }
    }

    pub fn record_success(&self, host: &str) {
        let mut hosts = self.lock();
        if let Some(state) = hosts.get_mut(host) {
            if state.strike_count > 0 {
                tracing::info!(host, strikes = state.strike_count, "Host recovered");
            }
            state.strike_count = 0;
            state.cooldown_until = None;
        }
    }

    /// Add a strike and start a cooldown. Read and write happen under one
    /// lock so concurrent failures on the same host both count.
    pub fn record_failure(&self, host: &str, failure: &FailureKind, now: Instant) -> Duration {
        let jitter = self.sample_jitter();
        let mut hosts = self.lock();
        let state = hosts.entry(host.to_string()).or_insert_with(HostState::new);

        state.strike_count = state.strike_count.saturating_add(1);
        let cooldown = self.escalate(failure.base_cooldown(), state.strike_count) + jitter;
        state.cooldown_until = Some(now + cooldown);
        state.last_reason = Some(failure.describe());

        tracing::warn!(
            host,
            cooldown_secs = cooldown.as_secs(),
            strikes = state.strike_count,
            reason = %failure.describe(),
            "Host put in cooldown"
        );

        cooldown
    }

    /// `base * 2^(strikes-1)`, capped at the ceiling.
    pub fn escalate(&self, base: Duration, strikes: u32) -> Duration {
        let factor = 1u32
            .checked_shl(strikes.saturating_sub(1))
            .unwrap_or(u32::MAX);
        base.saturating_mul(factor).min(self.ceiling)
    }

    fn sample_jitter(&self) -> Duration {
        let max = self.jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max))
    }

    pub fn state(&self, host: &str) -> Option<HostState> {
        self.lock().get(host).cloned()
    }
}
