//! Generic record operations.
//!
//! Every operation here picks a context by the executor rules:
//! synchronous forms run on the foreground context, asynchronous forms run
//! on the background queue. Background results never reach the caller
//! directly - matched or inserted identities are rehydrated into the
//! foreground context first, so completions always receive
//! foreground-safe records.

use crate::attrs::AttrMap;
use crate::context::Context;
use crate::coordinator::Coordinator;
use crate::entity::Entity;
use crate::error::CoreResult;
use crate::query::FetchSpec;
use crate::record::Record;
use crate::types::RecordId;
use tracing::debug;

/// Resolves identities into a target context, dropping the ones that no
/// longer exist.
///
/// A miss means the record was deleted between capture and resolution;
/// that is a legitimate concurrent outcome, so the batch survives without
/// it. Real store or codec failures still propagate.
fn rehydrate(
    ctx: &Context,
    entity: &'static str,
    attributes: &'static [&'static str],
    ids: &[RecordId],
) -> CoreResult<Vec<Record>> {
    let mut records = Vec::with_capacity(ids.len());
    for id in ids {
        match ctx.resolve_raw(entity, attributes, *id)? {
            Some(record) => records.push(record),
            None => debug!(%entity, %id, "record vanished before rehydration; dropped"),
        }
    }
    Ok(records)
}

impl Coordinator {
    /// Inserts a new record of entity `E`, synchronously.
    ///
    /// Runs on the foreground context and commits through the save gate.
    ///
    /// # Errors
    ///
    /// Returns `UnknownAttribute` for keys outside the entity schema and
    /// `SaveFailed` if the commit fails (the pending insert stays in the
    /// foreground context for retry).
    pub fn insert<E: Entity>(&self, values: AttrMap) -> CoreResult<Record> {
        self.perform_foreground(|ctx| {
            let record = ctx.insert::<E>(values)?;
            ctx.save()?;
            Ok(record)
        })
    }

    /// Inserts a batch of records of entity `E` on the background queue.
    ///
    /// All rows are inserted in one unit and committed with a single save.
    /// On success the completion receives every inserted record,
    /// rehydrated into the foreground context, in submission order. On
    /// failure it receives the error and no rows become visible - the
    /// unit's pending inserts are discarded, never left half-committed.
    pub fn insert_bulk<E: Entity>(
        &self,
        values_list: Vec<AttrMap>,
        completion: impl FnOnce(CoreResult<Vec<Record>>) + Send + 'static,
    ) {
        let entity = E::NAME;
        let attributes = E::attributes();
        let shared = std::sync::Arc::clone(self.shared());

        self.perform_background(move |ctx| {
            let mut ids = Vec::with_capacity(values_list.len());
            for values in values_list {
                match ctx.insert_raw(entity, attributes, values) {
                    Ok(record) => ids.push(record.id()),
                    Err(e) => {
                        ctx.discard(entity, &ids);
                        completion(Err(e));
                        return;
                    }
                }
            }

            if let Err(e) = ctx.save() {
                ctx.discard(entity, &ids);
                completion(Err(e));
                return;
            }

            let result =
                shared.with_foreground(|fg| rehydrate(fg, entity, attributes, &ids));
            completion(result);
        });
    }

    /// Executes a fetch specification synchronously on the foreground
    /// context.
    ///
    /// # Errors
    ///
    /// Returns a typed error if the store cannot be scanned or a payload
    /// fails to decode; an empty result is a legitimate empty match, never
    /// a masked failure.
    pub fn fetch<E: Entity>(&self, spec: &FetchSpec<E>) -> CoreResult<Vec<Record>> {
        self.perform_foreground(|ctx| ctx.fetch(spec))
    }

    /// Executes a fetch specification on the background queue.
    ///
    /// Matched identities are rehydrated into the foreground context
    /// before the completion runs; the caller never sees
    /// background-confined instances.
    pub fn fetch_async<E: Entity>(
        &self,
        spec: &FetchSpec<E>,
        completion: impl FnOnce(CoreResult<Vec<Record>>) + Send + 'static,
    ) {
        let raw = spec.raw().clone();
        let shared = std::sync::Arc::clone(self.shared());

        self.perform_background(move |ctx| {
            let result = ctx.fetch_raw(&raw).and_then(|rows| {
                let ids: Vec<RecordId> = rows.iter().map(Record::id).collect();
                shared.with_foreground(|fg| rehydrate(fg, raw.entity, raw.attributes, &ids))
            });
            completion(result);
        });
    }

    /// Fetches the first match for `spec`, updating it with `values`, or
    /// inserts a new record with `values` when nothing matches.
    ///
    /// The fetch, decision, and mutation run as a single foreground unit,
    /// so two concurrent callers with the same spec cannot both insert.
    ///
    /// # Errors
    ///
    /// Returns fetch, validation, or save errors.
    pub fn fetch_or_insert<E: Entity>(
        &self,
        spec: &FetchSpec<E>,
        values: AttrMap,
    ) -> CoreResult<Record> {
        self.perform_foreground(|ctx| {
            let rows = ctx.fetch(spec)?;
            let record = match rows.first() {
                Some(existing) => ctx.update(existing, values)?,
                None => ctx.insert::<E>(values)?,
            };
            ctx.save()?;
            Ok(record)
        })
    }

    /// Applies an attribute map to a foreground-materialized record and
    /// commits.
    ///
    /// # Errors
    ///
    /// Returns `ContextMismatch` for a background-stamped record (mutate
    /// those inside [`Coordinator::perform_background`] via
    /// [`Context::update`]), `UnknownAttribute` for keys outside the
    /// schema, and `SaveFailed` if the commit fails.
    pub fn update(&self, record: &Record, values: AttrMap) -> CoreResult<Record> {
        self.perform_foreground(|ctx| {
            let updated = ctx.update(record, values)?;
            ctx.save()?;
            Ok(updated)
        })
    }

    /// Deletes records synchronously on the foreground context.
    ///
    /// Deletion is identity-based: the records may have been materialized
    /// in either context.
    ///
    /// # Errors
    ///
    /// Returns `SaveFailed` if the commit fails.
    pub fn delete(&self, records: &[Record]) -> CoreResult<()> {
        self.perform_foreground(|ctx| {
            ctx.delete(records);
            ctx.save()?;
            Ok(())
        })
    }

    /// Deletes records on the background queue.
    ///
    /// Only identities cross the executor boundary; the background context
    /// deletes its own materializations of them.
    pub fn delete_async(
        &self,
        records: &[Record],
        completion: impl FnOnce(CoreResult<()>) + Send + 'static,
    ) {
        let targets: Vec<(&'static str, RecordId)> =
            records.iter().map(|r| (r.entity(), r.id())).collect();

        self.perform_background(move |ctx| {
            for (entity, id) in &targets {
                ctx.delete_ids(entity, std::slice::from_ref(id));
            }
            completion(ctx.save().map(|_| ()));
        });
    }

    /// Deletes every record matching `spec`, synchronously.
    ///
    /// Fetch, delete, and save run as one foreground unit.
    ///
    /// # Errors
    ///
    /// Returns fetch or save errors; a zero count is a legitimate empty
    /// match, not a masked failure.
    pub fn delete_by_spec<E: Entity>(&self, spec: &FetchSpec<E>) -> CoreResult<usize> {
        self.perform_foreground(|ctx| {
            let rows = ctx.fetch(spec)?;
            let count = rows.len();
            ctx.delete(&rows);
            ctx.save()?;
            Ok(count)
        })
    }

    /// Deletes every record matching `spec` on the background queue.
    ///
    /// The completion receives the number of records deleted, or the
    /// fetch/save error.
    pub fn delete_by_spec_async<E: Entity>(
        &self,
        spec: &FetchSpec<E>,
        completion: impl FnOnce(CoreResult<usize>) + Send + 'static,
    ) {
        let raw = spec.raw().clone();

        self.perform_background(move |ctx| {
            let result = ctx.fetch_raw(&raw).and_then(|rows| {
                let count = rows.len();
                ctx.delete(&rows);
                ctx.save()?;
                Ok(count)
            });
            completion(result);
        });
    }

    /// Deletes every record of entity `E` on the background queue.
    ///
    /// The completion receives the number of records deleted.
    pub fn delete_all<E: Entity>(
        &self,
        completion: impl FnOnce(CoreResult<usize>) + Send + 'static,
    ) {
        self.delete_by_spec_async(&FetchSpec::<E>::all(), completion);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::AttrValue;
    use crate::config::Config;

    struct Player;
    impl Entity for Player {
        const NAME: &'static str = "Player";
        fn attributes() -> &'static [&'static str] {
            &["name", "score"]
        }
    }

    fn open() -> Coordinator {
        Coordinator::open(Config::new("Test")).unwrap()
    }

    fn named(value: &str) -> AttrMap {
        AttrMap::from([("name".to_string(), AttrValue::from(value))])
    }

    #[test]
    fn rehydrate_drops_missing_ids() {
        let coordinator = open();

        let kept = coordinator.insert::<Player>(named("Ann")).unwrap();
        let gone = coordinator.insert::<Player>(named("Bo")).unwrap();
        coordinator.delete(std::slice::from_ref(&gone)).unwrap();

        let records = coordinator
            .perform_foreground(|ctx| {
                rehydrate(
                    ctx,
                    Player::NAME,
                    Player::attributes(),
                    &[kept.id(), gone.id()],
                )
            })
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id(), kept.id());
    }

    #[test]
    fn delete_by_spec_counts_matches_only() {
        let coordinator = open();
        coordinator.insert::<Player>(named("Ann")).unwrap();
        coordinator.insert::<Player>(named("Bo")).unwrap();

        let spec = FetchSpec::<Player>::filtered(crate::query::Predicate::eq("name", "Bo"));
        assert_eq!(coordinator.delete_by_spec(&spec).unwrap(), 1);
        assert_eq!(
            coordinator.fetch(&FetchSpec::<Player>::all()).unwrap().len(),
            1
        );
        // Nothing left to match: zero, not an error.
        assert_eq!(coordinator.delete_by_spec(&spec).unwrap(), 0);
    }

    #[test]
    fn update_rejects_wrong_schema_key() {
        let coordinator = open();
        let record = coordinator.insert::<Player>(named("Ann")).unwrap();

        let err = coordinator
            .update(
                &record,
                AttrMap::from([("rank".to_string(), AttrValue::from(1i64))]),
            )
            .unwrap_err();
        assert!(matches!(err, crate::CoreError::UnknownAttribute { .. }));
    }
}
