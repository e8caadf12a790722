use std::collections::BTreeMap;

use crate::model::{EntityDefinition, EntityRecord, FieldValue, Id, Version};

/// Failures surfaced by a repository implementation. The commit path
/// translates these into the client-facing taxonomy exactly once.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("stored version of {entity_type} {id} does not match the expected version")]
    VersionConflict { entity_type: String, id: Id },
    #[error("no {entity_type} entity with id {id}")]
    UnknownEntity { entity_type: String, id: Id },
    #[error("unknown entity type {0}")]
    UnknownType(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Repository abstraction over the persistent entity graph. The store is the
/// single source of truth for serialization between concurrent commits; the
/// coordinator never takes its own locks.
#[async_trait::async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_definition(&self, entity_type: &str) -> StoreResult<Option<EntityDefinition>>;
    async fn list_definitions(&self) -> StoreResult<Vec<EntityDefinition>>;

    async fn get_entity(&self, entity_type: &str, id: &Id) -> StoreResult<Option<EntityRecord>>;
    async fn get_entities(&self, entity_type: &str, ids: &[Id]) -> StoreResult<Vec<EntityRecord>>;
    async fn list_entities(&self, entity_type: &str) -> StoreResult<Vec<EntityRecord>>;
    /// Entities whose fields equal every value in the example fragment.
    async fn find_by_example(
        &self,
        entity_type: &str,
        example: &BTreeMap<String, FieldValue>,
    ) -> StoreResult<Vec<EntityRecord>>;

    /// Open a transaction scoped to one mutation batch.
    async fn begin(&self) -> StoreResult<Box<dyn EntityTransaction>>;
}

/// Transaction handle owned by the commit coordinator for the duration of one
/// batch. Staged writes become visible only after `commit`; every exit path
/// must call either `commit` or `rollback`.
#[async_trait::async_trait]
pub trait EntityTransaction: Send {
    /// Stage an insert and return the server-assigned record (version 0).
    async fn create(
        &mut self,
        entity_type: &str,
        fields: BTreeMap<String, FieldValue>,
    ) -> StoreResult<EntityRecord>;

    /// Stage an update guarded by the version the client last observed.
    /// Submitted fields are merged over the stored ones.
    async fn update(
        &mut self,
        entity_type: &str,
        id: &Id,
        expected_version: Version,
        fields: BTreeMap<String, FieldValue>,
    ) -> StoreResult<()>;

    /// Stage a delete guarded by the version the client last observed.
    async fn delete(
        &mut self,
        entity_type: &str,
        id: &Id,
        expected_version: Version,
    ) -> StoreResult<()>;

    /// Revalidate every staged precondition and apply all staged writes
    /// atomically. Nothing is applied when any precondition fails.
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Discard all staged writes.
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
