//! Configuration for the flow engine
//!
//! All knobs have safe defaults; environment variables override them.

use serde::{Deserialize, Serialize};
use std::env;
use tracing::{info, warn};

use crate::error::EngineError;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum nodes executed for one inbound event or resumption
    #[serde(default = "default_max_steps")]
    pub max_steps_per_event: u32,

    /// Idle time after which an active session expires, in seconds
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: u64,

    /// How often the expiry sweep runs, in seconds
    #[serde(default = "default_expiry_sweep_interval")]
    pub expiry_sweep_interval_seconds: u64,

    /// How long dispatch dedupe marks are kept, in seconds
    #[serde(default = "default_dedupe_ttl")]
    pub dedupe_ttl_seconds: u64,

    /// Deferred work processing
    #[serde(default)]
    pub deferred: DeferredConfig,

    /// Outbound HTTP calls made by nodes
    #[serde(default)]
    pub http: HttpConfig,
}

/// Configuration for the deferred work queue and worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeferredConfig {
    /// Queue poll interval in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Delivery attempts before an item is marked failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base retry delay in milliseconds
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Upper bound on the retry delay in milliseconds
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,
}

/// Configuration for node-issued HTTP calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Request timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub timeout_seconds: u64,

    /// Connect timeout in seconds
    #[serde(default = "default_http_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Retries after the first attempt, unless the node overrides it
    #[serde(default = "default_http_max_retries")]
    pub max_retries: u32,
}

fn default_max_steps() -> u32 {
    64
}

fn default_session_ttl() -> u64 {
    86400 // 24 hours
}

fn default_expiry_sweep_interval() -> u64 {
    60
}

fn default_dedupe_ttl() -> u64 {
    86400 // 24 hours
}

fn default_poll_interval() -> u64 {
    200
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_base_delay() -> u64 {
    1000
}

fn default_retry_max_delay() -> u64 {
    60000
}

fn default_http_timeout() -> u64 {
    30
}

fn default_http_connect_timeout() -> u64 {
    10
}

fn default_http_max_retries() -> u32 {
    2
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self, EngineError> {
        // Start with defaults
        let mut config = Self::default();

        // Override from environment variables
        if let Ok(max_steps) = env::var("COLLOQUY_MAX_STEPS_PER_EVENT") {
            if let Ok(steps) = max_steps.parse::<u32>() {
                config.max_steps_per_event = steps;
            } else {
                warn!("Invalid COLLOQUY_MAX_STEPS_PER_EVENT value: {}", max_steps);
            }
        }

        if let Ok(ttl) = env::var("COLLOQUY_SESSION_TTL_SECONDS") {
            if let Ok(seconds) = ttl.parse::<u64>() {
                config.session_ttl_seconds = seconds;
            } else {
                warn!("Invalid COLLOQUY_SESSION_TTL_SECONDS value: {}", ttl);
            }
        }

        if let Ok(interval) = env::var("COLLOQUY_EXPIRY_SWEEP_INTERVAL_SECONDS") {
            if let Ok(seconds) = interval.parse::<u64>() {
                config.expiry_sweep_interval_seconds = seconds;
            } else {
                warn!(
                    "Invalid COLLOQUY_EXPIRY_SWEEP_INTERVAL_SECONDS value: {}",
                    interval
                );
            }
        }

        if let Ok(ttl) = env::var("COLLOQUY_DEDUPE_TTL_SECONDS") {
            if let Ok(seconds) = ttl.parse::<u64>() {
                config.dedupe_ttl_seconds = seconds;
            } else {
                warn!("Invalid COLLOQUY_DEDUPE_TTL_SECONDS value: {}", ttl);
            }
        }

        if let Ok(poll) = env::var("COLLOQUY_DEFERRED_POLL_INTERVAL_MS") {
            if let Ok(ms) = poll.parse::<u64>() {
                config.deferred.poll_interval_ms = ms;
            } else {
                warn!("Invalid COLLOQUY_DEFERRED_POLL_INTERVAL_MS value: {}", poll);
            }
        }

        if let Ok(attempts) = env::var("COLLOQUY_DEFERRED_MAX_ATTEMPTS") {
            if let Ok(count) = attempts.parse::<u32>() {
                config.deferred.max_attempts = count;
            } else {
                warn!("Invalid COLLOQUY_DEFERRED_MAX_ATTEMPTS value: {}", attempts);
            }
        }

        if let Ok(delay) = env::var("COLLOQUY_DEFERRED_RETRY_BASE_DELAY_MS") {
            if let Ok(ms) = delay.parse::<u64>() {
                config.deferred.retry_base_delay_ms = ms;
            } else {
                warn!(
                    "Invalid COLLOQUY_DEFERRED_RETRY_BASE_DELAY_MS value: {}",
                    delay
                );
            }
        }

        if let Ok(delay) = env::var("COLLOQUY_DEFERRED_RETRY_MAX_DELAY_MS") {
            if let Ok(ms) = delay.parse::<u64>() {
                config.deferred.retry_max_delay_ms = ms;
            } else {
                warn!(
                    "Invalid COLLOQUY_DEFERRED_RETRY_MAX_DELAY_MS value: {}",
                    delay
                );
            }
        }

        if let Ok(timeout) = env::var("COLLOQUY_HTTP_TIMEOUT_SECONDS") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                config.http.timeout_seconds = seconds;
            } else {
                warn!("Invalid COLLOQUY_HTTP_TIMEOUT_SECONDS value: {}", timeout);
            }
        }

        if let Ok(timeout) = env::var("COLLOQUY_HTTP_CONNECT_TIMEOUT_SECONDS") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                config.http.connect_timeout_seconds = seconds;
            } else {
                warn!(
                    "Invalid COLLOQUY_HTTP_CONNECT_TIMEOUT_SECONDS value: {}",
                    timeout
                );
            }
        }

        if let Ok(retries) = env::var("COLLOQUY_HTTP_MAX_RETRIES") {
            if let Ok(count) = retries.parse::<u32>() {
                config.http.max_retries = count;
            } else {
                warn!("Invalid COLLOQUY_HTTP_MAX_RETRIES value: {}", retries);
            }
        }

        config.validate()?;

        info!("Loaded engine configuration");
        Ok(config)
    }

    /// Check invariants the engine relies on
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_steps_per_event == 0 {
            return Err(EngineError::ConfigError(
                "max_steps_per_event must be at least 1".to_string(),
            ));
        }
        if self.session_ttl_seconds == 0 {
            return Err(EngineError::ConfigError(
                "session_ttl_seconds must be at least 1".to_string(),
            ));
        }
        if self.deferred.max_attempts == 0 {
            return Err(EngineError::ConfigError(
                "deferred.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.deferred.poll_interval_ms == 0 {
            return Err(EngineError::ConfigError(
                "deferred.poll_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps_per_event: default_max_steps(),
            session_ttl_seconds: default_session_ttl(),
            expiry_sweep_interval_seconds: default_expiry_sweep_interval(),
            dedupe_ttl_seconds: default_dedupe_ttl(),
            deferred: DeferredConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for DeferredConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_http_timeout(),
            connect_timeout_seconds: default_http_connect_timeout(),
            max_retries: default_http_max_retries(),
        }
    }
}
