//! Record snapshots.

use crate::attrs::{AttrMap, AttrValue};
use crate::types::{ContextKind, RecordId};

/// A materialized record.
///
/// A record is a snapshot of an entity instance as seen by one context:
/// its stable identity, its entity name, and its attribute map. Records
/// are stamped with the context that materialized them; the stamp is how
/// the coordinator refuses direct cross-context mutation and decides when
/// rehydration by identity is required.
///
/// Records are plain values - cloning one never aliases live context
/// state.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    id: RecordId,
    entity: &'static str,
    attributes: &'static [&'static str],
    context: ContextKind,
    attrs: AttrMap,
}

impl Record {
    pub(crate) fn new(
        id: RecordId,
        entity: &'static str,
        attributes: &'static [&'static str],
        context: ContextKind,
        attrs: AttrMap,
    ) -> Self {
        Self {
            id,
            entity,
            attributes,
            context,
            attrs,
        }
    }

    /// Returns the record's stable identity.
    #[must_use]
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Returns the entity name.
    #[must_use]
    pub fn entity(&self) -> &'static str {
        self.entity
    }

    /// Returns the declared attribute keys of the record's entity.
    #[must_use]
    pub fn declared_attributes(&self) -> &'static [&'static str] {
        self.attributes
    }

    /// Returns the context that materialized this snapshot.
    #[must_use]
    pub fn context(&self) -> ContextKind {
        self.context
    }

    /// Returns an attribute value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.get(key)
    }

    /// Returns the full attribute map.
    #[must_use]
    pub fn attrs(&self) -> &AttrMap {
        &self.attrs
    }
}
