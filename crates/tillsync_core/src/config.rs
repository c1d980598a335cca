//! Store configuration.

/// How hard the store pushes each log frame towards the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Flush process buffers to the OS after every frame.
    ///
    /// Survives a process crash, not a power loss.
    Flush,
    /// `fsync` after every frame.
    #[default]
    Sync,
}

/// Configuration for opening a [`crate::DurableStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Durability of each appended frame.
    pub sync_mode: SyncMode,

    /// Number of superseded frames that triggers log compaction
    /// (0 = never compact).
    pub compact_threshold: usize,

    /// Attempt ceiling given to newly enqueued operations.
    pub default_max_attempts: u32,

    /// Whether to create the store directory if it does not exist.
    pub create_if_missing: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::Sync,
            compact_threshold: 1024,
            default_max_attempts: 5,
            create_if_missing: true,
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-frame durability mode.
    #[must_use]
    pub const fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    /// Sets the compaction threshold.
    #[must_use]
    pub const fn compact_threshold(mut self, frames: usize) -> Self {
        self.compact_threshold = frames;
        self
    }

    /// Sets the attempt ceiling for new operations. Values below 1 are
    /// raised to 1.
    #[must_use]
    pub const fn default_max_attempts(mut self, attempts: u32) -> Self {
        self.default_max_attempts = if attempts == 0 { 1 } else { attempts };
        self
    }

    /// Sets whether a missing store directory is created.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.sync_mode, SyncMode::Sync);
        assert_eq!(config.compact_threshold, 1024);
        assert_eq!(config.default_max_attempts, 5);
        assert!(config.create_if_missing);
    }

    #[test]
    fn builder_pattern() {
        let config = StoreConfig::new()
            .sync_mode(SyncMode::Flush)
            .compact_threshold(0)
            .default_max_attempts(0)
            .create_if_missing(false);

        assert_eq!(config.sync_mode, SyncMode::Flush);
        assert_eq!(config.compact_threshold, 0);
        assert_eq!(config.default_max_attempts, 1);
        assert!(!config.create_if_missing);
    }
}
