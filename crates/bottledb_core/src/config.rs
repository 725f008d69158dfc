//! Store configuration.

use std::time::Duration;

/// How nested entity references are materialized on load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    /// Load the whole reachable graph, preserving sharing and cycles.
    #[default]
    Deep,
    /// Leave nested references as [`crate::Value::Ref`].
    Shallow,
}

/// Configuration for opening a store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the store directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to fsync records, journals and directories during commit.
    pub sync_writes: bool,

    /// Maximum time to wait for an identity lock (`None` = block forever).
    pub lock_timeout: Option<Duration>,

    /// Evict idle identity locks every this many lock releases (0 = never).
    pub lock_sweep_interval: u64,

    /// How often a transaction may re-plan its lock set before aborting.
    pub max_lock_rounds: usize,

    /// Whether to replay leftover transaction journals on open.
    pub recover_on_open: bool,

    /// Default materialization for `load` and `scan`.
    pub load_mode: LoadMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_writes: true,
            lock_timeout: None,
            lock_sweep_interval: 64,
            max_lock_rounds: 8,
            recover_on_open: true,
            load_mode: LoadMode::Deep,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether commits fsync what they write.
    #[must_use]
    pub const fn sync_writes(mut self, value: bool) -> Self {
        self.sync_writes = value;
        self
    }

    /// Sets the lock acquisition timeout.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets how many lock releases trigger an idle-lock sweep.
    #[must_use]
    pub const fn lock_sweep_interval(mut self, releases: u64) -> Self {
        self.lock_sweep_interval = releases;
        self
    }

    /// Sets the lock re-planning bound.
    #[must_use]
    pub const fn max_lock_rounds(mut self, rounds: usize) -> Self {
        self.max_lock_rounds = rounds;
        self
    }

    /// Sets whether leftover journals are replayed on open.
    #[must_use]
    pub const fn recover_on_open(mut self, value: bool) -> Self {
        self.recover_on_open = value;
        self
    }

    /// Sets the default load mode.
    #[must_use]
    pub const fn load_mode(mut self, mode: LoadMode) -> Self {
        self.load_mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(config.sync_writes);
        assert!(config.lock_timeout.is_none());
        assert_eq!(config.lock_sweep_interval, 64);
        assert_eq!(config.max_lock_rounds, 8);
        assert_eq!(config.load_mode, LoadMode::Deep);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .create_if_missing(false)
            .sync_writes(false)
            .lock_timeout(Some(Duration::from_millis(50)))
            .load_mode(LoadMode::Shallow);

        assert!(!config.create_if_missing);
        assert!(!config.sync_writes);
        assert_eq!(config.lock_timeout, Some(Duration::from_millis(50)));
        assert_eq!(config.load_mode, LoadMode::Shallow);
    }
}
