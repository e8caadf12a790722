use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::model::{generate_id, EntityDefinition, EntityRecord, FieldValue, Id, Version};
use crate::store::traits::{EntityStore, EntityTransaction, StoreError, StoreResult};

type Table = HashMap<Id, EntityRecord>;
type Tables = HashMap<String, Table>;

/// In-memory repository with optimistic-version semantics. Transactions stage
/// their writes and apply them under the write lock at commit time, so the
/// first committer wins and the second observes a version conflict.
pub struct MemoryStore {
    definitions: BTreeMap<String, EntityDefinition>,
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new(definitions: Vec<EntityDefinition>) -> Self {
        let mut tables = Tables::new();
        let mut by_type = BTreeMap::new();
        for def in definitions {
            tables.insert(def.entity_type.clone(), Table::new());
            by_type.insert(def.entity_type.clone(), def);
        }
        Self {
            definitions: by_type,
            tables: Arc::new(RwLock::new(tables)),
        }
    }

    fn known_types(&self) -> BTreeSet<String> {
        self.definitions.keys().cloned().collect()
    }
}

fn record_matches_example(record: &EntityRecord, example: &BTreeMap<String, FieldValue>) -> bool {
    example
        .iter()
        .all(|(name, value)| record.fields.get(name) == Some(value))
}

#[async_trait::async_trait]
impl EntityStore for MemoryStore {
    async fn get_definition(&self, entity_type: &str) -> StoreResult<Option<EntityDefinition>> {
        Ok(self.definitions.get(entity_type).cloned())
    }

    async fn list_definitions(&self) -> StoreResult<Vec<EntityDefinition>> {
        Ok(self.definitions.values().cloned().collect())
    }

    async fn get_entity(&self, entity_type: &str, id: &Id) -> StoreResult<Option<EntityRecord>> {
        let tables = self.tables.read().await;
        let table = tables
            .get(entity_type)
            .ok_or_else(|| StoreError::UnknownType(entity_type.to_string()))?;
        Ok(table.get(id).cloned())
    }

    async fn get_entities(&self, entity_type: &str, ids: &[Id]) -> StoreResult<Vec<EntityRecord>> {
        let tables = self.tables.read().await;
        let table = tables
            .get(entity_type)
            .ok_or_else(|| StoreError::UnknownType(entity_type.to_string()))?;
        Ok(ids.iter().filter_map(|id| table.get(id).cloned()).collect())
    }

    async fn list_entities(&self, entity_type: &str) -> StoreResult<Vec<EntityRecord>> {
        let tables = self.tables.read().await;
        let table = tables
            .get(entity_type)
            .ok_or_else(|| StoreError::UnknownType(entity_type.to_string()))?;
        Ok(table.values().cloned().collect())
    }

    async fn find_by_example(
        &self,
        entity_type: &str,
        example: &BTreeMap<String, FieldValue>,
    ) -> StoreResult<Vec<EntityRecord>> {
        let tables = self.tables.read().await;
        let table = tables
            .get(entity_type)
            .ok_or_else(|| StoreError::UnknownType(entity_type.to_string()))?;
        Ok(table
            .values()
            .filter(|record| record_matches_example(record, example))
            .cloned()
            .collect())
    }

    async fn begin(&self) -> StoreResult<Box<dyn EntityTransaction>> {
        Ok(Box::new(MemoryTransaction {
            tables: Arc::clone(&self.tables),
            known_types: self.known_types(),
            staged: Vec::new(),
        }))
    }
}

enum StagedWrite {
    Insert(EntityRecord),
    Update {
        entity_type: String,
        id: Id,
        expected_version: Version,
        fields: BTreeMap<String, FieldValue>,
    },
    Delete {
        entity_type: String,
        id: Id,
        expected_version: Version,
    },
}

struct MemoryTransaction {
    tables: Arc<RwLock<Tables>>,
    known_types: BTreeSet<String>,
    staged: Vec<StagedWrite>,
}

impl MemoryTransaction {
    fn check_type(&self, entity_type: &str) -> StoreResult<()> {
        if self.known_types.contains(entity_type) {
            Ok(())
        } else {
            Err(StoreError::UnknownType(entity_type.to_string()))
        }
    }

    /// Version precondition against currently committed state. Commits
    /// revalidate under the write lock; this check only fails staging early.
    async fn check_version(
        &self,
        entity_type: &str,
        id: &Id,
        expected_version: Version,
    ) -> StoreResult<()> {
        let tables = self.tables.read().await;
        check_precondition(&tables, entity_type, id, expected_version)
    }
}

fn check_precondition(
    tables: &Tables,
    entity_type: &str,
    id: &Id,
    expected_version: Version,
) -> StoreResult<()> {
    let current = tables
        .get(entity_type)
        .and_then(|table| table.get(id))
        .ok_or_else(|| StoreError::UnknownEntity {
            entity_type: entity_type.to_string(),
            id: id.clone(),
        })?;
    if current.version != expected_version {
        return Err(StoreError::VersionConflict {
            entity_type: entity_type.to_string(),
            id: id.clone(),
        });
    }
    Ok(())
}

fn apply_staged(tables: &mut Tables, write: &StagedWrite) -> StoreResult<()> {
    match write {
        StagedWrite::Insert(record) => {
            tables
                .get_mut(&record.entity_type)
                .ok_or_else(|| StoreError::UnknownType(record.entity_type.clone()))?
                .insert(record.id.clone(), record.clone());
        }
        StagedWrite::Update {
            entity_type,
            id,
            expected_version,
            fields,
        } => {
            check_precondition(tables, entity_type, id, *expected_version)?;
            let record = tables
                .get_mut(entity_type)
                .and_then(|table| table.get_mut(id))
                .ok_or_else(|| StoreError::UnknownEntity {
                    entity_type: entity_type.clone(),
                    id: id.clone(),
                })?;
            record.fields.extend(fields.clone());
            record.version += 1;
            record.updated_at = chrono::Utc::now();
        }
        StagedWrite::Delete {
            entity_type,
            id,
            expected_version,
        } => {
            check_precondition(tables, entity_type, id, *expected_version)?;
            if let Some(table) = tables.get_mut(entity_type) {
                table.remove(id);
            }
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl EntityTransaction for MemoryTransaction {
    async fn create(
        &mut self,
        entity_type: &str,
        fields: BTreeMap<String, FieldValue>,
    ) -> StoreResult<EntityRecord> {
        self.check_type(entity_type)?;
        let now = chrono::Utc::now();
        let record = EntityRecord {
            entity_type: entity_type.to_string(),
            id: generate_id(),
            version: 0,
            fields,
            created_at: now,
            updated_at: now,
        };
        self.staged.push(StagedWrite::Insert(record.clone()));
        Ok(record)
    }

    async fn update(
        &mut self,
        entity_type: &str,
        id: &Id,
        expected_version: Version,
        fields: BTreeMap<String, FieldValue>,
    ) -> StoreResult<()> {
        self.check_type(entity_type)?;
        self.check_version(entity_type, id, expected_version).await?;
        self.staged.push(StagedWrite::Update {
            entity_type: entity_type.to_string(),
            id: id.clone(),
            expected_version,
            fields,
        });
        Ok(())
    }

    async fn delete(
        &mut self,
        entity_type: &str,
        id: &Id,
        expected_version: Version,
    ) -> StoreResult<()> {
        self.check_type(entity_type)?;
        self.check_version(entity_type, id, expected_version).await?;
        self.staged.push(StagedWrite::Delete {
            entity_type: entity_type.to_string(),
            id: id.clone(),
            expected_version,
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        // Apply onto a copy so a failing precondition leaves nothing behind.
        let mut next = tables.clone();
        for write in &self.staged {
            apply_staged(&mut next, write)?;
        }
        *tables = next;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttributeDef, DataType, EntityDefinition};
    use serde_json::json;

    fn test_store() -> MemoryStore {
        MemoryStore::new(vec![EntityDefinition::new(
            "Person",
            vec![AttributeDef::required_scalar("name", DataType::String)],
        )])
    }

    fn name_fields(name: &str) -> BTreeMap<String, FieldValue> {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), FieldValue::Scalar(json!(name)));
        fields
    }

    #[tokio::test]
    async fn create_is_invisible_until_commit() {
        let store = test_store();
        let mut tx = store.begin().await.unwrap();
        let record = tx.create("Person", name_fields("Ann")).await.unwrap();
        assert_eq!(record.version, 0);

        assert!(store
            .get_entity("Person", &record.id)
            .await
            .unwrap()
            .is_none());

        tx.commit().await.unwrap();
        let stored = store.get_entity("Person", &record.id).await.unwrap();
        assert_eq!(stored.unwrap().fields, name_fields("Ann"));
    }

    #[tokio::test]
    async fn rollback_discards_staged_writes() {
        let store = test_store();
        let mut tx = store.begin().await.unwrap();
        let record = tx.create("Person", name_fields("Ann")).await.unwrap();
        tx.rollback().await.unwrap();
        assert!(store
            .get_entity("Person", &record.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn stale_version_is_rejected_and_state_unchanged() {
        let store = test_store();
        let mut tx = store.begin().await.unwrap();
        let record = tx.create("Person", name_fields("Ann")).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = tx
            .update("Person", &record.id, 5, name_fields("Bea"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));
        tx.rollback().await.unwrap();

        let stored = store.get_entity("Person", &record.id).await.unwrap().unwrap();
        assert_eq!(stored.fields, name_fields("Ann"));
        assert_eq!(stored.version, 0);
    }

    #[tokio::test]
    async fn first_committer_wins_second_conflicts_at_commit() {
        let store = test_store();
        let mut tx = store.begin().await.unwrap();
        let record = tx.create("Person", name_fields("Ann")).await.unwrap();
        tx.commit().await.unwrap();

        let mut first = store.begin().await.unwrap();
        first
            .update("Person", &record.id, 0, name_fields("Bea"))
            .await
            .unwrap();
        let mut second = store.begin().await.unwrap();
        second
            .update("Person", &record.id, 0, name_fields("Cleo"))
            .await
            .unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));

        let stored = store.get_entity("Person", &record.id).await.unwrap().unwrap();
        assert_eq!(stored.fields, name_fields("Bea"));
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn failed_commit_applies_nothing() {
        let store = test_store();
        let mut tx = store.begin().await.unwrap();
        let victim = tx.create("Person", name_fields("Ann")).await.unwrap();
        tx.commit().await.unwrap();

        // Concurrent writer bumps the version after staging.
        let mut batch = store.begin().await.unwrap();
        let extra = batch.create("Person", name_fields("Dan")).await.unwrap();
        batch
            .update("Person", &victim.id, 0, name_fields("Bea"))
            .await
            .unwrap();

        let mut racer = store.begin().await.unwrap();
        racer
            .update("Person", &victim.id, 0, name_fields("Eve"))
            .await
            .unwrap();
        racer.commit().await.unwrap();

        let err = batch.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));

        // The create staged alongside the conflicting update must not land.
        assert!(store
            .get_entity("Person", &extra.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn example_matching_is_partial_field_equality() {
        let store = test_store();
        let mut tx = store.begin().await.unwrap();
        tx.create("Person", name_fields("Ann")).await.unwrap();
        tx.create("Person", name_fields("Bea")).await.unwrap();
        tx.commit().await.unwrap();

        let found = store
            .find_by_example("Person", &name_fields("Ann"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let all = store
            .find_by_example("Person", &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }
}
