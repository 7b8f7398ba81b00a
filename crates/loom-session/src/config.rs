//! Session lifecycle settings.

use std::time::Duration;

/// Grace period after the last socket leaves before compute teardown.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub idle_timeout: Duration,
    /// Call `ensure` when a workspace is opened by its first connection.
    pub provision_on_open: bool,
    /// Tear down compute when the idle timer fires.
    pub teardown_on_idle: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            provision_on_open: true,
            teardown_on_idle: true,
        }
    }
}

impl SessionConfig {
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_provision_on_open(mut self, enabled: bool) -> Self {
        self.provision_on_open = enabled;
        self
    }

    pub fn with_teardown_on_idle(mut self, enabled: bool) -> Self {
        self.teardown_on_idle = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.idle_timeout, Duration::from_secs(1800));
        assert!(config.provision_on_open);
        assert!(config.teardown_on_idle);
    }

    #[test]
    fn test_builders() {
        let config = SessionConfig::default()
            .with_idle_timeout(Duration::from_secs(5))
            .with_teardown_on_idle(false);
        assert_eq!(config.idle_timeout, Duration::from_secs(5));
        assert!(!config.teardown_on_idle);
    }
}
