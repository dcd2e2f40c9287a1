//! Coordinator configuration.

use crate::error::CoreResult;
use std::fmt;
use std::path::PathBuf;

/// A one-shot migration procedure, run synchronously before the store
/// opens.
///
/// The coordinator only guarantees *when* the procedure runs relative to
/// store access; what it does is the caller's concern.
pub type MigrationProc = Box<dyn FnOnce() -> CoreResult<()> + Send>;

/// Where the durable store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// Ephemeral in-memory store, for tests and scratch work.
    InMemory,
    /// Persistent store directory `<base>/<store name>`.
    Directory(PathBuf),
}

/// Configuration for opening a coordinator.
///
/// Supplied exactly once, to [`crate::Coordinator::open`]; the open call
/// is the redesigned configure-before-first-use step, so an unconfigured
/// coordinator cannot exist.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::new("game")
///     .directory("/var/lib/myapp")
///     .migration(|| {
///         // runs before the store opens
///         Ok(())
///     });
/// let coordinator = Coordinator::open(config)?;
/// ```
pub struct Config {
    pub(crate) store_name: String,
    pub(crate) location: StoreLocation,
    pub(crate) migration: Option<MigrationProc>,
}

impl Config {
    /// Creates a configuration for the named store.
    ///
    /// Defaults to an in-memory location.
    #[must_use]
    pub fn new(store_name: impl Into<String>) -> Self {
        Self {
            store_name: store_name.into(),
            location: StoreLocation::InMemory,
            migration: None,
        }
    }

    /// Places the store under `<base>/<store name>` on disk.
    #[must_use]
    pub fn directory(mut self, base: impl Into<PathBuf>) -> Self {
        self.location = StoreLocation::Directory(base.into());
        self
    }

    /// Uses an ephemeral in-memory store.
    #[must_use]
    pub fn in_memory(mut self) -> Self {
        self.location = StoreLocation::InMemory;
        self
    }

    /// Sets the pre-open migration procedure.
    #[must_use]
    pub fn migration(mut self, proc: impl FnOnce() -> CoreResult<()> + Send + 'static) -> Self {
        self.migration = Some(Box::new(proc));
        self
    }

    /// Returns the store name.
    #[must_use]
    pub fn store_name(&self) -> &str {
        &self.store_name
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("store_name", &self.store_name)
            .field("location", &self.location)
            .field("migration", &self.migration.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_in_memory() {
        let config = Config::new("Test");
        assert_eq!(config.store_name(), "Test");
        assert_eq!(config.location, StoreLocation::InMemory);
        assert!(config.migration.is_none());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new("Test")
            .directory("/tmp/stores")
            .migration(|| Ok(()));

        assert_eq!(
            config.location,
            StoreLocation::Directory(PathBuf::from("/tmp/stores"))
        );
        assert!(config.migration.is_some());
    }

    #[test]
    fn debug_does_not_require_migration_debug() {
        let config = Config::new("Test").migration(|| Ok(()));
        let rendered = format!("{config:?}");
        assert!(rendered.contains("Test"));
    }
}
