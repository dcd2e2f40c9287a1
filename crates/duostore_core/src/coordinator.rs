//! The coordinator: owner of the store and the two contexts.

use crate::config::{Config, StoreLocation};
use crate::context::{Context, SharedStore};
use crate::error::{CoreError, CoreResult};
use crate::executor::BackgroundQueue;
use crate::record::Record;
use crate::types::{ContextKind, SaveOutcome};
use duostore_storage::{FileBackend, MemoryBackend, StoreBackend};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// State shared between the coordinator, background jobs, and observers.
pub(crate) struct Shared {
    foreground: Mutex<Context>,
    caches: Mutex<HashMap<String, Vec<Record>>>,
    store_name: String,
}

impl Shared {
    /// Runs a unit of work against the foreground context.
    ///
    /// Taking the mutex *is* the foreground confinement: exactly one unit
    /// touches the context at any instant.
    pub(crate) fn with_foreground<R>(&self, f: impl FnOnce(&mut Context) -> R) -> R {
        let mut context = self.foreground.lock();
        f(&mut context)
    }

    pub(crate) fn cache_put(&self, name: &str, records: Vec<Record>) {
        self.caches.lock().insert(name.to_string(), records);
    }

    pub(crate) fn cache_get(&self, name: &str) -> Option<Vec<Record>> {
        self.caches.lock().get(name).cloned()
    }
}

/// The persistence coordinator.
///
/// One coordinator owns one durable store and the pair of contexts over
/// it. It is the single access point for all record operations; callers
/// share it by reference (or clone an `Arc` around it) rather than
/// through a global.
///
/// # Execution model
///
/// - [`Coordinator::perform_foreground`] runs a unit of work on the
///   calling thread, against the foreground context, and blocks until it
///   finishes.
/// - [`Coordinator::perform_background`] schedules a unit of work on the
///   background queue and returns immediately; background units run
///   strictly FIFO, one at a time.
///
/// Record operations ([`Coordinator::insert`], [`Coordinator::fetch`],
/// and friends, defined in the ops module) dispatch onto the right
/// context and rehydrate background results into the foreground by
/// identity before returning them.
pub struct Coordinator {
    shared: Arc<Shared>,
    background: BackgroundQueue,
}

impl Coordinator {
    /// Opens a coordinator from a configuration.
    ///
    /// Runs the migration procedure (if any) synchronously, then opens the
    /// durable store, then starts the background queue.
    ///
    /// # Errors
    ///
    /// Returns `MigrationFailed` if the migration procedure fails and
    /// `StoreOpen` if the durable store cannot be opened. Both leave no
    /// coordinator behind - a misconfigured persistence layer never runs.
    pub fn open(config: Config) -> CoreResult<Self> {
        let Config {
            store_name,
            location,
            migration,
        } = config;

        Self::run_migration(migration)?;

        let backend: Box<dyn StoreBackend> = match location {
            StoreLocation::InMemory => Box::new(MemoryBackend::new()),
            StoreLocation::Directory(base) => Box::new(
                FileBackend::open(&base.join(&store_name))
                    .map_err(|source| CoreError::StoreOpen { source })?,
            ),
        };

        Self::start(store_name, backend)
    }

    /// Opens a coordinator over a caller-supplied backend.
    ///
    /// The configured location is ignored; the migration procedure still
    /// runs first. Intended for tests and embedders with custom storage.
    ///
    /// # Errors
    ///
    /// Returns `MigrationFailed` if the migration procedure fails.
    pub fn open_with_backend(config: Config, backend: Box<dyn StoreBackend>) -> CoreResult<Self> {
        let Config {
            store_name,
            migration,
            ..
        } = config;

        Self::run_migration(migration)?;
        Self::start(store_name, backend)
    }

    fn run_migration(migration: Option<crate::config::MigrationProc>) -> CoreResult<()> {
        if let Some(proc) = migration {
            proc().map_err(|e| CoreError::migration_failed(e.to_string()))?;
        }
        Ok(())
    }

    fn start(store_name: String, backend: Box<dyn StoreBackend>) -> CoreResult<Self> {
        let store: SharedStore = Arc::new(RwLock::new(backend));

        let shared = Arc::new(Shared {
            foreground: Mutex::new(Context::new(ContextKind::Foreground, Arc::clone(&store))),
            caches: Mutex::new(HashMap::new()),
            store_name,
        });

        let background = BackgroundQueue::start(Context::new(ContextKind::Background, store))?;

        Ok(Self { shared, background })
    }

    /// Returns the configured store name.
    #[must_use]
    pub fn store_name(&self) -> &str {
        &self.shared.store_name
    }

    /// Runs a unit of work against the foreground context, synchronously.
    ///
    /// Blocks the calling thread until the unit completes and returns its
    /// value. Use this whenever the result is needed before proceeding.
    pub fn perform_foreground<R>(&self, f: impl FnOnce(&mut Context) -> R) -> R {
        self.shared.with_foreground(f)
    }

    /// Schedules a unit of work against the background context.
    ///
    /// Returns without blocking; the unit executes strictly after all
    /// previously scheduled background units, never concurrently with
    /// another one.
    pub fn perform_background(&self, f: impl FnOnce(&mut Context) + Send + 'static) {
        self.background.submit(Box::new(f));
    }

    /// Saves the foreground context through the save gate.
    ///
    /// # Errors
    ///
    /// Returns `SaveFailed` if pending changes could not be persisted.
    pub fn save_foreground(&self) -> CoreResult<SaveOutcome> {
        self.perform_foreground(Context::save)
    }

    /// Saves the background context through the save gate.
    ///
    /// The outcome is delivered to `completion` once the save unit has
    /// run, after all previously scheduled background units.
    pub fn save_background(
        &self,
        completion: impl FnOnce(CoreResult<SaveOutcome>) + Send + 'static,
    ) {
        self.perform_background(move |ctx| completion(ctx.save()));
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("store_name", &self.shared.store_name)
            .finish_non_exhaustive()
    }
}
