use itertools::Itertools;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;

use crate::error::SyncError;
use crate::logic::commit::CommitOutcome;
use crate::logic::permission::PolicyEvaluator;
use crate::model::{CommitResult, EntityRecord, EntityRef, FieldValue};
use crate::store::traits::EntityStore;

/// Post-commit canonicalization: re-reads every mutated entity so the client
/// sees defaults, computed state and version counters as the store now holds
/// them, not its own submitted values.
pub struct EntitySerializer;

impl EntitySerializer {
    pub async fn refresh<S: EntityStore + ?Sized>(
        store: &S,
        policy: &dyn PolicyEvaluator,
        outcome: &CommitOutcome,
        fetch: &BTreeSet<String>,
    ) -> Result<CommitResult, SyncError> {
        let deleted: BTreeSet<&EntityRef> = outcome.deleted.iter().collect();
        let mut entities = Vec::new();
        // Collected eagerly: holding the borrowing iterator across the awaits
        // below trips a rustc higher-ranked lifetime bug in the handler's
        // auto-trait check (rust-lang/rust#102211).
        let refreshed: Vec<&EntityRef> = outcome
            .created
            .iter()
            .chain(outcome.updated.iter())
            .unique()
            .collect();
        for entity_ref in refreshed {
            if deleted.contains(entity_ref) {
                continue;
            }
            let record = store
                .get_entity(&entity_ref.entity_type, &entity_ref.id)
                .await
                .map_err(SyncError::from)?
                .ok_or_else(|| {
                    SyncError::Unclassified(anyhow::anyhow!(
                        "{} {} vanished between commit and refresh",
                        entity_ref.entity_type,
                        entity_ref.id
                    ))
                })?;
            entities.push(Self::serialize_augmented(store, policy, &record, fetch).await?);
        }
        Ok(CommitResult {
            id_mapping: outcome.id_mapping.clone(),
            entities,
            applied: outcome.applied,
        })
    }

    /// Normal serialization mode: attribute fields merged with the reserved
    /// metadata keys (`id`, `entityType`, `version`, `writable`) the client
    /// library needs to reconstruct its objects. Associations named by a
    /// fetch directive are embedded recursively; all others stay stub refs.
    pub async fn serialize_augmented<S: EntityStore + ?Sized>(
        store: &S,
        policy: &dyn PolicyEvaluator,
        record: &EntityRecord,
        fetch: &BTreeSet<String>,
    ) -> Result<Value, SyncError> {
        let mut visited = Vec::new();
        serialize_entity(store, policy, record, fetch, &mut visited).await
    }
}

/// Bare serialization mode, used only for error payloads and simple scalar
/// messages. Never carries augmentation metadata.
pub fn bare_message(message: &str) -> Value {
    json!({ "message": message })
}

fn sub_fetch(fetch: &BTreeSet<String>, field: &str) -> (bool, BTreeSet<String>) {
    let mut embed = false;
    let mut rest = BTreeSet::new();
    let prefix = format!("{field}.");
    for path in fetch {
        if path == field {
            embed = true;
        } else if let Some(tail) = path.strip_prefix(&prefix) {
            embed = true;
            rest.insert(tail.to_string());
        }
    }
    (embed, rest)
}

fn serialize_entity<'a, S: EntityStore + ?Sized>(
    store: &'a S,
    policy: &'a dyn PolicyEvaluator,
    record: &'a EntityRecord,
    fetch: &'a BTreeSet<String>,
    visited: &'a mut Vec<EntityRef>,
) -> Pin<Box<dyn Future<Output = Result<Value, SyncError>> + Send + 'a>> {
    Box::pin(async move {
        let mut object = serde_json::Map::new();
        object.insert("id".to_string(), json!(record.id));
        object.insert("entityType".to_string(), json!(record.entity_type));
        object.insert("version".to_string(), json!(record.version));
        object.insert(
            "writable".to_string(),
            json!(policy.can_write(&record.entity_type)),
        );

        visited.push(record.entity_ref());
        for (name, value) in &record.fields {
            let serialized = match value {
                FieldValue::Scalar(scalar) => scalar.clone(),
                FieldValue::Ref(None) => Value::Null,
                FieldValue::Ref(Some(target)) => {
                    serialize_ref(store, policy, name, target, fetch, visited).await?
                }
                FieldValue::RefList(targets) => {
                    let mut items = Vec::with_capacity(targets.len());
                    for target in targets {
                        items.push(
                            serialize_ref(store, policy, name, target, fetch, visited).await?,
                        );
                    }
                    Value::Array(items)
                }
            };
            object.insert(name.clone(), serialized);
        }
        visited.pop();

        Ok(Value::Object(object))
    })
}

async fn serialize_ref<S: EntityStore + ?Sized>(
    store: &S,
    policy: &dyn PolicyEvaluator,
    field: &str,
    target: &EntityRef,
    fetch: &BTreeSet<String>,
    visited: &mut Vec<EntityRef>,
) -> Result<Value, SyncError> {
    let (embed, rest) = sub_fetch(fetch, field);
    // A ref back into the current serialization path stays a stub, whatever
    // the fetch directive says.
    if !embed || visited.contains(target) {
        return Ok(serde_json::to_value(target).map_err(|e| SyncError::Unclassified(e.into()))?);
    }
    match store
        .get_entity(&target.entity_type, &target.id)
        .await
        .map_err(SyncError::from)?
    {
        Some(record) => serialize_entity(store, policy, &record, &rest, visited).await,
        // Dangling association: keep the stub instead of failing the response.
        None => Ok(serde_json::to_value(target).map_err(|e| SyncError::Unclassified(e.into()))?),
    }
}
