//! Foreground-bound result observation.
//!
//! A [`ResultsObserver`] keeps a materialized snapshot of one fetch
//! specification's results. Every refresh re-evaluates the spec inside a
//! foreground unit of work, so the snapshot only ever contains
//! foreground-stamped records. Observers optionally group the snapshot
//! into sections by an attribute key and publish it under a named cache
//! slot on the coordinator.

use crate::attrs::AttrValue;
use crate::coordinator::{Coordinator, Shared};
use crate::entity::Entity;
use crate::error::CoreResult;
use crate::query::{FetchSpec, RawSpec};
use crate::record::Record;
use std::sync::Arc;
use tracing::debug;

/// A run of consecutive records sharing one section key value.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    name: String,
    records: Vec<Record>,
}

impl Section {
    /// Returns the rendered section key value.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the records in this section, in snapshot order.
    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }
}

/// A live snapshot of one fetch specification's results.
///
/// Built with [`Coordinator::observe`]; call
/// [`ResultsObserver::refresh`] after mutations to bring the snapshot up
/// to date. The observer is bound to the foreground context: it never
/// evaluates anywhere else and never exposes background-stamped records.
pub struct ResultsObserver {
    shared: Arc<Shared>,
    raw: RawSpec,
    section_key: Option<String>,
    cache_name: Option<String>,
    records: Vec<Record>,
}

impl ResultsObserver {
    fn new(
        shared: Arc<Shared>,
        raw: RawSpec,
        section_key: Option<String>,
        cache_name: Option<String>,
    ) -> CoreResult<Self> {
        let mut observer = Self {
            shared,
            raw,
            section_key,
            cache_name,
            records: Vec::new(),
        };
        observer.refresh()?;
        Ok(observer)
    }

    /// Re-evaluates the specification and replaces the snapshot.
    ///
    /// Runs as one foreground unit of work; the snapshot is also written
    /// to the coordinator's cache slot if one was named.
    ///
    /// # Errors
    ///
    /// Returns fetch errors; on failure the previous snapshot is kept.
    pub fn refresh(&mut self) -> CoreResult<()> {
        let records = self
            .shared
            .with_foreground(|ctx| ctx.fetch_raw(&self.raw))?;

        if let Some(name) = &self.cache_name {
            self.shared.cache_put(name, records.clone());
            debug!(cache = %name, rows = records.len(), "observer snapshot cached");
        }

        self.records = records;
        Ok(())
    }

    /// Returns the current snapshot, in spec order.
    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Groups the snapshot into sections by the configured section key.
    ///
    /// Consecutive records with equal key values share a section, so a
    /// spec sorted by the section key yields one section per value.
    /// Without a configured key the whole snapshot is one unnamed
    /// section.
    #[must_use]
    pub fn sections(&self) -> Vec<Section> {
        let Some(key) = &self.section_key else {
            return vec![Section {
                name: String::new(),
                records: self.records.clone(),
            }];
        };

        let mut sections: Vec<Section> = Vec::new();
        for record in &self.records {
            let name = record
                .get(key)
                .map(AttrValue::to_string)
                .unwrap_or_default();
            match sections.last_mut() {
                Some(section) if section.name == name => section.records.push(record.clone()),
                _ => sections.push(Section {
                    name,
                    records: vec![record.clone()],
                }),
            }
        }
        sections
    }

    /// Returns the section key, if one was configured.
    #[must_use]
    pub fn section_key(&self) -> Option<&str> {
        self.section_key.as_deref()
    }

    /// Returns the cache slot name, if one was configured.
    #[must_use]
    pub fn cache_name(&self) -> Option<&str> {
        self.cache_name.as_deref()
    }
}

impl std::fmt::Debug for ResultsObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultsObserver")
            .field("entity", &self.raw.entity)
            .field("section_key", &self.section_key)
            .field("cache_name", &self.cache_name)
            .field("rows", &self.records.len())
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Builds a foreground-bound observer for a fetch specification.
    ///
    /// The observer is populated immediately with an initial snapshot.
    ///
    /// # Errors
    ///
    /// Returns fetch errors from the initial evaluation.
    pub fn observe<E: Entity>(
        &self,
        spec: &FetchSpec<E>,
        section_key: Option<&str>,
        cache_name: Option<&str>,
    ) -> CoreResult<ResultsObserver> {
        ResultsObserver::new(
            Arc::clone(self.shared()),
            spec.raw().clone(),
            section_key.map(str::to_string),
            cache_name.map(str::to_string),
        )
    }

    /// Returns the last snapshot published under a named cache slot.
    #[must_use]
    pub fn cached(&self, name: &str) -> Option<Vec<Record>> {
        self.shared().cache_get(name)
    }
}
