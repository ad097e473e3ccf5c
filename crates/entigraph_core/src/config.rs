//! Store configuration.

use std::time::Duration;

/// Configuration for opening a store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the store directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to refuse opening a store that already exists.
    pub error_if_exists: bool,

    /// Whether to flush the WAL after every record, not only at commit.
    pub sync_on_commit: bool,

    /// How long `begin(ReadWrite)` waits for the writer slot.
    ///
    /// `None` waits until the current writer finishes.
    pub writer_wait_timeout: Option<Duration>,

    /// Format version written to new stores.
    pub format_version: (u16, u16),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            sync_on_commit: true,
            writer_wait_timeout: None,
            format_version: (1, 0),
        }
    }
}

impl Config {
    /// Creates a configuration with default values.
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

    /// Sets whether to error if the store exists.
    #[must_use]
    pub const fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Sets whether to flush the WAL on every record.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Bounds how long a writer waits for the writer slot.
    #[must_use]
    pub const fn writer_wait_timeout(mut self, timeout: Duration) -> Self {
        self.writer_wait_timeout = Some(timeout);
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
        assert!(!config.error_if_exists);
        assert!(config.sync_on_commit);
        assert!(config.writer_wait_timeout.is_none());
        assert_eq!(config.format_version, (1, 0));
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .create_if_missing(false)
            .error_if_exists(true)
            .writer_wait_timeout(Duration::from_millis(50));

        assert!(!config.create_if_missing);
        assert!(config.error_if_exists);
        assert_eq!(config.writer_wait_timeout, Some(Duration::from_millis(50)));
    }
}
