//! Store configuration: backend candidate list, TTL, and key namespace.

use std::{env, time::Duration};

use crate::dao::session_store::redis::RedisConfig;

/// Environment variable holding the primary managed cluster URL.
const PRIMARY_URL_ENV: &str = "QUIZ_STORE_PRIMARY_URL";
/// Environment variable holding the secondary (token-based) cluster URL.
const SECONDARY_URL_ENV: &str = "QUIZ_STORE_SECONDARY_URL";
/// Environment variable overriding the local-instance URL.
const LOCAL_URL_ENV: &str = "QUIZ_STORE_LOCAL_URL";
/// Environment variable overriding the session TTL, in seconds.
const SESSION_TTL_ENV: &str = "QUIZ_STORE_SESSION_TTL_SECS";
/// Environment variable overriding the key namespace prefix.
const KEY_PREFIX_ENV: &str = "QUIZ_STORE_KEY_PREFIX";

const DEFAULT_LOCAL_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(7200);
const DEFAULT_KEY_PREFIX: &str = "quiz";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// One backend connection candidate, tried in list order.
#[derive(Debug, Clone)]
pub struct BackendTarget {
    /// Short name used in logs ("primary", "secondary", "local").
    pub label: String,
    /// Redis connection URL, credentials included.
    pub url: String,
}

impl BackendTarget {
    /// Build a candidate from a label and URL.
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
        }
    }
}

/// Immutable runtime configuration for a [`LiveSessionStore`].
///
/// [`LiveSessionStore`]: crate::services::store::LiveSessionStore
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Backend candidates in priority order; an empty list skips straight
    /// to the in-process fallback.
    pub candidates: Vec<BackendTarget>,
    /// Sliding TTL bounding every session tree.
    pub session_ttl: Duration,
    /// Namespace prefix for every key and channel.
    pub key_prefix: String,
    /// Per-candidate connection timeout.
    pub connect_timeout: Duration,
}

impl StoreConfig {
    /// Configuration with no backend candidates and crate defaults for
    /// everything else.
    pub fn new() -> Self {
        Self {
            candidates: Vec::new(),
            session_ttl: DEFAULT_SESSION_TTL,
            key_prefix: DEFAULT_KEY_PREFIX.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Build the candidate list and tuning knobs from the environment.
    ///
    /// The primary and secondary cluster URLs are optional; the local
    /// instance is always appended as the last candidate.
    pub fn from_env() -> Self {
        let mut config = Self::new();

        if let Ok(url) = env::var(PRIMARY_URL_ENV) {
            config = config.with_candidate("primary", url);
        }
        if let Ok(url) = env::var(SECONDARY_URL_ENV) {
            config = config.with_candidate("secondary", url);
        }
        let local = env::var(LOCAL_URL_ENV).unwrap_or_else(|_| DEFAULT_LOCAL_URL.into());
        config = config.with_candidate("local", local);

        if let Some(ttl) = env::var(SESSION_TTL_ENV)
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
        {
            config.session_ttl = Duration::from_secs(ttl);
        }
        if let Ok(prefix) = env::var(KEY_PREFIX_ENV) {
            if !prefix.is_empty() {
                config.key_prefix = prefix;
            }
        }

        config
    }

    /// Append a backend candidate at the end of the priority list.
    pub fn with_candidate(mut self, label: impl Into<String>, url: impl Into<String>) -> Self {
        self.candidates.push(BackendTarget::new(label, url));
        self
    }

    /// Override the sliding session TTL.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Override the key namespace prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Override the per-candidate connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Redis configuration for one candidate of this store.
    pub(crate) fn redis_config(&self, target: &BackendTarget) -> RedisConfig {
        RedisConfig::new(target.url.clone())
            .with_prefix(self.key_prefix.clone())
            .with_session_ttl(self.session_ttl)
            .with_connect_timeout(self.connect_timeout)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new().with_candidate("local", DEFAULT_LOCAL_URL)
    }
}
