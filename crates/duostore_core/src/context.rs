//! Unit-of-work contexts over the shared store.
//!
//! A [`Context`] is one of the two confinement domains of a coordinator.
//! It buffers uncommitted changes (upserts and deletes keyed by entity and
//! identity) on top of the shared committed store; reads through the
//! context overlay pending changes onto committed rows. The save gate
//! commits the pending set as one batch, and only when there is something
//! to commit.
//!
//! Contexts are never touched from arbitrary threads: the foreground
//! context lives under the coordinator's mutex, the background context is
//! owned by the queue worker. Code only sees `&mut Context` inside a unit
//! of work.

use crate::attrs::{decode_attrs, encode_attrs, AttrMap};
use crate::entity::{validate_attrs, Entity};
use crate::error::{CoreError, CoreResult};
use crate::query::{FetchSpec, RawSpec};
use crate::record::Record;
use crate::types::{ContextKind, RecordId, SaveOutcome};
use duostore_storage::{CommitBatch, StoreBackend};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// The committed store shared by both contexts.
pub(crate) type SharedStore = Arc<RwLock<Box<dyn StoreBackend>>>;

/// An uncommitted change held by a context.
#[derive(Debug, Clone)]
enum PendingChange {
    /// Insert or update: full attribute map after the change.
    Upsert(AttrMap),
    /// Deletion tombstone.
    Delete,
}

/// A confined unit-of-work boundary over the store.
pub struct Context {
    kind: ContextKind,
    store: SharedStore,
    pending: BTreeMap<(&'static str, RecordId), PendingChange>,
}

impl Context {
    pub(crate) fn new(kind: ContextKind, store: SharedStore) -> Self {
        Self {
            kind,
            store,
            pending: BTreeMap::new(),
        }
    }

    /// Returns which confinement domain this context belongs to.
    #[must_use]
    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    /// Returns true if the context holds uncommitted changes.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Creates a new record of entity `E` with the given attributes.
    ///
    /// The record is pending until [`Context::save`] commits it.
    ///
    /// # Errors
    ///
    /// Returns `UnknownAttribute` if `values` names a key outside the
    /// entity schema.
    pub fn insert<E: Entity>(&mut self, values: AttrMap) -> CoreResult<Record> {
        self.insert_raw(E::NAME, E::attributes(), values)
    }

    pub(crate) fn insert_raw(
        &mut self,
        entity: &'static str,
        attributes: &'static [&'static str],
        values: AttrMap,
    ) -> CoreResult<Record> {
        validate_attrs(entity, attributes, &values)?;
        let id = RecordId::new();
        self.pending
            .insert((entity, id), PendingChange::Upsert(values.clone()));
        Ok(Record::new(id, entity, attributes, self.kind, values))
    }

    /// Applies an attribute map to an already-materialized record.
    ///
    /// The record must have been materialized by *this* context; a record
    /// stamped by the other context is refused with `ContextMismatch` -
    /// transfer it by identity instead (see [`Context::existing`]).
    ///
    /// # Errors
    ///
    /// Returns `ContextMismatch` for a foreign record and
    /// `UnknownAttribute` for keys outside the entity schema.
    pub fn update(&mut self, record: &Record, values: AttrMap) -> CoreResult<Record> {
        if record.context() != self.kind {
            return Err(CoreError::ContextMismatch {
                expected: self.kind,
                actual: record.context(),
            });
        }
        validate_attrs(record.entity(), record.declared_attributes(), &values)?;

        // Base the merge on the freshest view of the record this context
        // has; fall back to the caller's snapshot if it was deleted.
        let mut attrs = self
            .resolve_attrs(record.entity(), record.id())?
            .unwrap_or_else(|| record.attrs().clone());
        attrs.extend(values);

        self.pending.insert(
            (record.entity(), record.id()),
            PendingChange::Upsert(attrs.clone()),
        );
        Ok(Record::new(
            record.id(),
            record.entity(),
            record.declared_attributes(),
            self.kind,
            attrs,
        ))
    }

    /// Marks records for deletion, by identity.
    ///
    /// The records may have been materialized by either context; only
    /// their identities are used.
    pub fn delete(&mut self, records: &[Record]) {
        for record in records {
            self.pending
                .insert((record.entity(), record.id()), PendingChange::Delete);
        }
    }

    pub(crate) fn delete_ids(&mut self, entity: &'static str, ids: &[RecordId]) {
        for id in ids {
            self.pending.insert((entity, *id), PendingChange::Delete);
        }
    }

    /// Resolves a record identity into this context.
    ///
    /// This is the rehydration primitive: given an identity captured in
    /// any context, it materializes the record as *this* context sees it.
    /// Returns `Ok(None)` if the record no longer exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the committed payload cannot be read or
    /// decoded.
    pub fn existing<E: Entity>(&self, id: RecordId) -> CoreResult<Option<Record>> {
        self.resolve_raw(E::NAME, E::attributes(), id)
    }

    pub(crate) fn resolve_raw(
        &self,
        entity: &'static str,
        attributes: &'static [&'static str],
        id: RecordId,
    ) -> CoreResult<Option<Record>> {
        Ok(self
            .resolve_attrs(entity, id)?
            .map(|attrs| Record::new(id, entity, attributes, self.kind, attrs)))
    }

    /// Looks up a record's attributes: pending overlay first, then the
    /// committed store.
    fn resolve_attrs(&self, entity: &'static str, id: RecordId) -> CoreResult<Option<AttrMap>> {
        match self.pending.get(&(entity, id)) {
            Some(PendingChange::Upsert(attrs)) => Ok(Some(attrs.clone())),
            Some(PendingChange::Delete) => Ok(None),
            None => match self.store.read().get(entity, id.as_bytes())? {
                Some(payload) => Ok(Some(decode_attrs(&payload)?)),
                None => Ok(None),
            },
        }
    }

    /// Executes a fetch specification against this context.
    ///
    /// Results reflect committed rows overlaid with this context's pending
    /// changes, in store-defined order unless the spec sorts.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be scanned or a payload fails
    /// to decode.
    pub fn fetch<E: Entity>(&self, spec: &FetchSpec<E>) -> CoreResult<Vec<Record>> {
        self.fetch_raw(spec.raw())
    }

    pub(crate) fn fetch_raw(&self, raw: &RawSpec) -> CoreResult<Vec<Record>> {
        let committed = self.store.read().scan(raw.entity)?;

        let mut committed_ids: HashSet<RecordId> = HashSet::with_capacity(committed.len());
        let mut rows: Vec<(RecordId, AttrMap)> = Vec::with_capacity(committed.len());

        for (key, payload) in committed {
            let id = RecordId::from_bytes(key);
            committed_ids.insert(id);
            match self.pending.get(&(raw.entity, id)) {
                Some(PendingChange::Delete) => {}
                Some(PendingChange::Upsert(attrs)) => rows.push((id, attrs.clone())),
                None => rows.push((id, decode_attrs(&payload)?)),
            }
        }

        // Pending inserts for this entity that have no committed row yet.
        let range_start = (raw.entity, RecordId::from_bytes([0x00; 16]));
        let range_end = (raw.entity, RecordId::from_bytes([0xFF; 16]));
        for ((_, id), change) in self.pending.range(range_start..=range_end) {
            if let PendingChange::Upsert(attrs) = change {
                if !committed_ids.contains(id) {
                    rows.push((*id, attrs.clone()));
                }
            }
        }

        rows.retain(|(_, attrs)| raw.predicate.matches(attrs));
        raw.order_and_clip(&mut rows);

        Ok(rows
            .into_iter()
            .map(|(id, attrs)| Record::new(id, raw.entity, raw.attributes, self.kind, attrs))
            .collect())
    }

    /// The save gate: commits pending changes, if any, as one durable
    /// batch.
    ///
    /// With no pending changes this is a no-op reporting
    /// [`SaveOutcome::NothingToSave`]. On failure the pending set is left
    /// intact so the save can be retried.
    ///
    /// # Errors
    ///
    /// Returns `SaveFailed` if the batch cannot be persisted, or a codec
    /// error if a pending attribute map cannot be encoded.
    pub fn save(&mut self) -> CoreResult<SaveOutcome> {
        if self.pending.is_empty() {
            return Ok(SaveOutcome::NothingToSave);
        }

        let mut batch = CommitBatch::new();
        for ((entity, id), change) in &self.pending {
            match change {
                PendingChange::Upsert(attrs) => {
                    batch.put(*entity, *id.as_bytes(), encode_attrs(attrs)?);
                }
                PendingChange::Delete => batch.delete(*entity, *id.as_bytes()),
            }
        }

        {
            let mut store = self.store.write();
            store
                .apply(&batch)
                .and_then(|()| store.flush())
                .map_err(|source| CoreError::SaveFailed { source })?;
        }

        debug!(context = %self.kind, ops = batch.len(), "committed pending changes");
        self.pending.clear();
        Ok(SaveOutcome::Saved)
    }

    /// Discards all pending changes without committing them.
    pub fn rollback(&mut self) {
        self.pending.clear();
    }

    /// Drops pending changes for specific identities.
    pub(crate) fn discard(&mut self, entity: &'static str, ids: &[RecordId]) {
        for id in ids {
            self.pending.remove(&(entity, *id));
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("kind", &self.kind)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::AttrValue;
    use duostore_storage::MemoryBackend;

    struct Player;
    impl Entity for Player {
        const NAME: &'static str = "Player";
        fn attributes() -> &'static [&'static str] {
            &["name", "score"]
        }
    }

    fn shared_store() -> SharedStore {
        Arc::new(RwLock::new(
            Box::new(MemoryBackend::new()) as Box<dyn StoreBackend>
        ))
    }

    fn name(value: &str) -> AttrMap {
        AttrMap::from([("name".to_string(), AttrValue::from(value))])
    }

    #[test]
    fn insert_is_pending_until_save() {
        let store = shared_store();
        let mut ctx = Context::new(ContextKind::Foreground, Arc::clone(&store));

        let record = ctx.insert::<Player>(name("Ann")).unwrap();
        assert!(ctx.has_changes());
        assert_eq!(store.read().len(), 0);

        // Visible through the overlay before the save.
        let rows = ctx.fetch(&FetchSpec::<Player>::all()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id(), record.id());

        assert_eq!(ctx.save().unwrap(), SaveOutcome::Saved);
        assert!(!ctx.has_changes());
        assert_eq!(store.read().len(), 1);
    }

    #[test]
    fn save_without_changes_is_a_noop() {
        let mut ctx = Context::new(ContextKind::Foreground, shared_store());
        assert_eq!(ctx.save().unwrap(), SaveOutcome::NothingToSave);
        assert_eq!(ctx.save().unwrap(), SaveOutcome::NothingToSave);
    }

    #[test]
    fn rollback_discards_pending() {
        let mut ctx = Context::new(ContextKind::Foreground, shared_store());
        ctx.insert::<Player>(name("Ann")).unwrap();
        ctx.rollback();
        assert!(!ctx.has_changes());
        assert!(ctx.fetch(&FetchSpec::<Player>::all()).unwrap().is_empty());
    }

    #[test]
    fn update_merges_attributes() {
        let mut ctx = Context::new(ContextKind::Foreground, shared_store());
        let record = ctx.insert::<Player>(name("Ann")).unwrap();
        ctx.save().unwrap();

        let updated = ctx
            .update(
                &record,
                AttrMap::from([("score".to_string(), AttrValue::from(10i64))]),
            )
            .unwrap();

        assert_eq!(updated.get("name"), Some(&AttrValue::from("Ann")));
        assert_eq!(updated.get("score"), Some(&AttrValue::from(10i64)));
        assert!(ctx.has_changes());
    }

    #[test]
    fn update_refuses_foreign_record() {
        let store = shared_store();
        let mut bg = Context::new(ContextKind::Background, Arc::clone(&store));
        let mut fg = Context::new(ContextKind::Foreground, store);

        let record = bg.insert::<Player>(name("Ann")).unwrap();
        bg.save().unwrap();

        let err = fg.update(&record, AttrMap::new()).unwrap_err();
        assert!(matches!(err, CoreError::ContextMismatch { .. }));
    }

    #[test]
    fn unknown_attribute_is_rejected() {
        let mut ctx = Context::new(ContextKind::Foreground, shared_store());
        let err = ctx
            .insert::<Player>(AttrMap::from([(
                "nickname".to_string(),
                AttrValue::from("A"),
            )]))
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownAttribute { .. }));
    }

    #[test]
    fn contexts_share_committed_state_only() {
        let store = shared_store();
        let mut bg = Context::new(ContextKind::Background, Arc::clone(&store));
        let fg = Context::new(ContextKind::Foreground, store);

        bg.insert::<Player>(name("Ann")).unwrap();
        // Uncommitted background change is invisible to the foreground.
        assert!(fg.fetch(&FetchSpec::<Player>::all()).unwrap().is_empty());

        bg.save().unwrap();
        let rows = fg.fetch(&FetchSpec::<Player>::all()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].context(), ContextKind::Foreground);
    }

    #[test]
    fn existing_resolves_identity_across_contexts() {
        let store = shared_store();
        let mut bg = Context::new(ContextKind::Background, Arc::clone(&store));
        let fg = Context::new(ContextKind::Foreground, store);

        let record = bg.insert::<Player>(name("Ann")).unwrap();
        bg.save().unwrap();

        let rehydrated = fg.existing::<Player>(record.id()).unwrap().unwrap();
        assert_eq!(rehydrated.id(), record.id());
        assert_eq!(rehydrated.context(), ContextKind::Foreground);
        assert_eq!(rehydrated.get("name"), Some(&AttrValue::from("Ann")));
    }

    #[test]
    fn existing_misses_after_concurrent_delete() {
        let store = shared_store();
        let mut bg = Context::new(ContextKind::Background, Arc::clone(&store));
        let mut fg = Context::new(ContextKind::Foreground, store);

        let record = bg.insert::<Player>(name("Ann")).unwrap();
        bg.save().unwrap();

        // Foreground deletes and commits between capture and resolution.
        fg.delete(std::slice::from_ref(&record));
        fg.save().unwrap();

        assert!(fg.existing::<Player>(record.id()).unwrap().is_none());
        assert!(bg.existing::<Player>(record.id()).unwrap().is_none());
    }

    #[test]
    fn delete_is_identity_based() {
        let store = shared_store();
        let mut bg = Context::new(ContextKind::Background, Arc::clone(&store));
        let mut fg = Context::new(ContextKind::Foreground, store);

        let record = fg.insert::<Player>(name("Ann")).unwrap();
        fg.save().unwrap();

        // A foreground-stamped record may be deleted via the background
        // context; only the identity crosses the boundary.
        bg.delete(std::slice::from_ref(&record));
        bg.save().unwrap();

        assert!(fg.fetch(&FetchSpec::<Player>::all()).unwrap().is_empty());
    }

    #[test]
    fn fetch_overlays_pending_update() {
        let mut ctx = Context::new(ContextKind::Foreground, shared_store());
        let record = ctx.insert::<Player>(name("Ann")).unwrap();
        ctx.save().unwrap();

        ctx.update(
            &record,
            AttrMap::from([("name".to_string(), AttrValue::from("Annabel"))]),
        )
        .unwrap();

        let rows = ctx.fetch(&FetchSpec::<Player>::all()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&AttrValue::from("Annabel")));
    }

    #[test]
    fn failed_save_keeps_pending() {
        // A backend that refuses every apply.
        struct RejectingBackend;
        impl StoreBackend for RejectingBackend {
            fn get(
                &self,
                _table: &str,
                _key: &duostore_storage::RecordKey,
            ) -> duostore_storage::StorageResult<Option<Vec<u8>>> {
                Ok(None)
            }
            fn scan(
                &self,
                _table: &str,
            ) -> duostore_storage::StorageResult<Vec<(duostore_storage::RecordKey, Vec<u8>)>>
            {
                Ok(Vec::new())
            }
            fn apply(
                &mut self,
                _batch: &CommitBatch,
            ) -> duostore_storage::StorageResult<()> {
                Err(duostore_storage::StorageError::corrupted("refused"))
            }
            fn flush(&mut self) -> duostore_storage::StorageResult<()> {
                Ok(())
            }
            fn len(&self) -> usize {
                0
            }
        }

        let store: SharedStore =
            Arc::new(RwLock::new(Box::new(RejectingBackend) as Box<dyn StoreBackend>));
        let mut ctx = Context::new(ContextKind::Foreground, store);

        ctx.insert::<Player>(name("Ann")).unwrap();
        let err = ctx.save().unwrap_err();
        assert!(matches!(err, CoreError::SaveFailed { .. }));
        assert!(ctx.has_changes());
    }
}
