//! Engine configuration

use std::time::Duration;

/// Maximum full convergence passes attempted while holding the room lock
pub const DEFAULT_MAX_SYNC_ATTEMPTS: usize = 25;

/// Delay before a deferred convergence after exhaustion
pub const DEFAULT_RETRY_COOLDOWN: Duration = Duration::from_secs(3);

/// Interval of the per-room keyframe refresh task
pub const DEFAULT_KEYFRAME_INTERVAL: Duration = Duration::from_secs(3);

/// Forwarding engine configuration options
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Full passes attempted before deferring
    pub max_sync_attempts: usize,

    /// Cooldown before the deferred pass runs
    pub retry_cooldown: Duration,

    /// Period of the keyframe refresh task
    pub keyframe_interval: Duration,

    /// ICE server URLs handed to new sessions (STUN/TURN)
    pub ice_servers: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_sync_attempts: DEFAULT_MAX_SYNC_ATTEMPTS,
            retry_cooldown: DEFAULT_RETRY_COOLDOWN,
            keyframe_interval: DEFAULT_KEYFRAME_INTERVAL,
            ice_servers: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Set the attempt cap (at least one attempt is always made)
    pub fn max_sync_attempts(mut self, attempts: usize) -> Self {
        self.max_sync_attempts = attempts.max(1);
        self
    }

    /// Set the deferred retry cooldown
    pub fn retry_cooldown(mut self, cooldown: Duration) -> Self {
        self.retry_cooldown = cooldown;
        self
    }

    /// Set the keyframe refresh interval
    pub fn keyframe_interval(mut self, interval: Duration) -> Self {
        self.keyframe_interval = interval;
        self
    }

    /// Add an ICE server URL
    pub fn ice_server(mut self, url: impl Into<String>) -> Self {
        self.ice_servers.push(url.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();

        assert_eq!(config.max_sync_attempts, 25);
        assert_eq!(config.retry_cooldown, Duration::from_secs(3));
        assert_eq!(config.keyframe_interval, Duration::from_secs(3));
        assert!(config.ice_servers.is_empty());
    }

    #[test]
    fn test_max_sync_attempts_floor() {
        let config = EngineConfig::default().max_sync_attempts(0);

        assert_eq!(config.max_sync_attempts, 1);
    }

    #[test]
    fn test_builder_chaining() {
        let config = EngineConfig::default()
            .max_sync_attempts(5)
            .retry_cooldown(Duration::from_millis(500))
            .keyframe_interval(Duration::from_secs(1))
            .ice_server("stun:stun.l.google.com:19302");

        assert_eq!(config.max_sync_attempts, 5);
        assert_eq!(config.retry_cooldown, Duration::from_millis(500));
        assert_eq!(config.keyframe_interval, Duration::from_secs(1));
        assert_eq!(config.ice_servers, vec!["stun:stun.l.google.com:19302"]);
    }
}
