/// Configuration management for Aurora Agent
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Agent-wide tunables
///
/// All timeouts bound a single operation attempt; retry policy belongs to
/// callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Deadline for one ledger resolution (both reads)
    pub resolve_timeout: Duration,

    /// Deadline for a complete handshake round trip
    pub handshake_timeout: Duration,

    /// Deadline for writing a single frame
    pub send_timeout: Duration,

    /// TTL for cached routing entries
    pub cache_ttl: Duration,

    /// Maximum accepted frame payload in bytes
    pub max_frame_len: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            resolve_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(15),
            send_timeout: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(300),
            max_frame_len: 16 * 1024 * 1024,
        }
    }
}

impl AgentConfig {
    /// Load from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            resolve_timeout: env_secs("AGENT_RESOLVE_TIMEOUT_SECS", defaults.resolve_timeout),
            handshake_timeout: env_secs("AGENT_HANDSHAKE_TIMEOUT_SECS", defaults.handshake_timeout),
            send_timeout: env_secs("AGENT_SEND_TIMEOUT_SECS", defaults.send_timeout),
            cache_ttl: env_secs("AGENT_CACHE_TTL_SECS", defaults.cache_ttl),
            max_frame_len: std::env::var("AGENT_MAX_FRAME_LEN")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_frame_len),
        }
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.resolve_timeout, Duration::from_secs(10));
        assert_eq!(config.handshake_timeout, Duration::from_secs(15));
        assert_eq!(config.max_frame_len, 16 * 1024 * 1024);
    }

    #[test]
    fn test_env_secs_fallback() {
        // Unset variable falls back to the given default
        assert_eq!(
            env_secs("AGENT_TEST_UNSET_TIMEOUT", Duration::from_secs(7)),
            Duration::from_secs(7)
        );
    }
}
