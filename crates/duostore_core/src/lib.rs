//! # DuoStore Core
//!
//! The DuoStore persistence coordinator.
//!
//! This crate provides a single owner object - the [`Coordinator`] - over a
//! durable record store, with two confined execution contexts:
//!
//! - a **foreground** context entered synchronously on the caller's thread
//! - a **background** context owned by a single worker thread, fed by a
//!   strict-FIFO queue
//!
//! All record mutation happens inside one of the two contexts. Records never
//! cross the boundary as live handles; background results are rehydrated
//! into the foreground context by stable identity before they are handed
//! back, so a completion always receives foreground-safe instances.
//!
//! # Opening a Coordinator
//!
//! ```rust,ignore
//! use duostore_core::{Config, Coordinator, Entity, FetchSpec, Predicate};
//!
//! struct Player;
//! impl Entity for Player {
//!     const NAME: &'static str = "Player";
//!     fn attributes() -> &'static [&'static str] {
//!         &["name", "score"]
//!     }
//! }
//!
//! let coordinator = Coordinator::open(Config::new("game"))?;
//!
//! let ann = coordinator.insert::<Player>(
//!     [("name".into(), "Ann".into()), ("score".into(), 0i64.into())].into(),
//! )?;
//!
//! let spec = FetchSpec::<Player>::filtered(Predicate::eq("name", "Ann"));
//! let players = coordinator.fetch(&spec)?;
//! assert_eq!(players[0].id(), ann.id());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod attrs;
mod config;
mod context;
mod coordinator;
mod entity;
mod error;
mod executor;
mod observe;
mod ops;
mod query;
mod record;
mod types;

pub use attrs::{AttrMap, AttrValue};
pub use config::{Config, MigrationProc, StoreLocation};
pub use context::Context;
pub use coordinator::Coordinator;
pub use entity::Entity;
pub use error::{CoreError, CoreResult};
pub use observe::{ResultsObserver, Section};
pub use query::{FetchSpec, Predicate, SortDirection};
pub use record::Record;
pub use types::{ContextKind, RecordId, SaveOutcome};
