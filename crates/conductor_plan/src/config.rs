//! Engine-wide settings.

use serde::{Deserialize, Serialize};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on children of a parallel block polled at the same time
    pub max_parallel_tasks: usize,
    /// Log elapsed time after every action
    pub log_action_timing: bool,
    /// Treat message ids missing from the catalog as configuration errors
    pub strict_messages: bool,
}

impl EngineConfig {
    /// Create the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the parallel bound; 0 is treated as 1
    #[must_use]
    pub fn with_max_parallel_tasks(mut self, max: usize) -> Self {
        self.max_parallel_tasks = max.max(1);
        self
    }

    /// Enable or disable action timing logs
    #[must_use]
    pub fn with_action_timing(mut self, enabled: bool) -> Self {
        self.log_action_timing = enabled;
        self
    }

    /// Enable or disable strict message checking
    #[must_use]
    pub fn with_strict_messages(mut self, strict: bool) -> Self {
        self.strict_messages = strict;
        self
    }

    /// Parallel bound, never below 1
    #[must_use]
    pub fn parallel_limit(&self) -> usize {
        self.max_parallel_tasks.max(1)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 16,
            log_action_timing: true,
            strict_messages: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::new();
        assert_eq!(config.max_parallel_tasks, 16);
        assert!(config.log_action_timing);
        assert!(config.strict_messages);
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::new()
            .with_max_parallel_tasks(0)
            .with_action_timing(false)
            .with_strict_messages(false);
        assert_eq!(config.parallel_limit(), 1);
        assert!(!config.log_action_timing);
        assert!(!config.strict_messages);
    }

    #[test]
    fn test_partial_json() {
        let config: EngineConfig = serde_json::from_str(r#"{"max_parallel_tasks": 4}"#).unwrap();
        assert_eq!(config.max_parallel_tasks, 4);
        assert!(config.strict_messages);
    }
}
