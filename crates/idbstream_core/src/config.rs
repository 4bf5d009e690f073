//! Client configuration.

/// Configuration for a [`Client`](crate::Client).
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether deletion and upgrade consult the engine's database listing.
    ///
    /// When disabled, or when the engine cannot enumerate, deletion assumes
    /// the database exists and upgrades trust the handle's own version.
    pub enumerate_databases: bool,

    /// Whether shared connections close themselves when another caller
    /// upgrades or deletes their database.
    ///
    /// Disabling this makes such upgrades and deletions fail as blocked
    /// while any lease is held.
    pub close_on_version_change: bool,

    /// Whether `entries()` reads keys and values from one transaction.
    ///
    /// When disabled, keys and values are read by two independent requests
    /// and paired by position, which can misalign under concurrent writes.
    pub atomic_entries: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enumerate_databases: true,
            close_on_version_change: true,
            atomic_entries: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to consult the engine's database listing.
    #[must_use]
    pub const fn enumerate_databases(mut self, value: bool) -> Self {
        self.enumerate_databases = value;
        self
    }

    /// Sets whether shared connections yield to version changes.
    #[must_use]
    pub const fn close_on_version_change(mut self, value: bool) -> Self {
        self.close_on_version_change = value;
        self
    }

    /// Sets whether `entries()` reads from a single snapshot.
    #[must_use]
    pub const fn atomic_entries(mut self, value: bool) -> Self {
        self.atomic_entries = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.enumerate_databases);
        assert!(config.close_on_version_change);
        assert!(config.atomic_entries);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .enumerate_databases(false)
            .atomic_entries(false);

        assert!(!config.enumerate_databases);
        assert!(config.close_on_version_change);
        assert!(!config.atomic_entries);
    }
}
