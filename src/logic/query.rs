use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::SyncError;
use crate::logic::permission::PolicyEvaluator;
use crate::logic::refresh::EntitySerializer;
use crate::model::{DataType, EntityDefinition, EntityRef, FieldValue, Id};
use crate::store::traits::EntityStore;

/// Pre-registered, parameterized read query. Request parameters bind as
/// equality constraints against the listed attributes.
#[derive(Debug, Clone)]
pub struct NamedQuery {
    pub name: String,
    pub entity_type: String,
    pub bound_attributes: Vec<String>,
}

impl NamedQuery {
    pub fn new(name: &str, entity_type: &str, bound_attributes: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            entity_type: entity_type.to_string(),
            bound_attributes: bound_attributes.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Named queries known to the server, assembled once at startup.
#[derive(Debug, Default)]
pub struct NamedQueryRegistry {
    queries: BTreeMap<String, NamedQuery>,
}

impl NamedQueryRegistry {
    pub fn new(queries: Vec<NamedQuery>) -> Self {
        Self {
            queries: queries.into_iter().map(|q| (q.name.clone(), q)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&NamedQuery> {
        self.queries.get(name)
    }
}

/// Stateless read path. Every operation takes the shared fetch directive for
/// association materialization and serializes in augmented mode.
pub struct QueryResolver;

impl QueryResolver {
    pub async fn by_id<S: EntityStore + ?Sized>(
        store: &S,
        policy: &dyn PolicyEvaluator,
        entity_type: &str,
        id: &Id,
        fetch: &BTreeSet<String>,
    ) -> Result<Value, SyncError> {
        let record = store
            .get_entity(entity_type, id)
            .await
            .map_err(SyncError::from)?
            .ok_or_else(|| {
                SyncError::malformed(format!("no {entity_type} entity with id {id}"))
            })?;
        EntitySerializer::serialize_augmented(store, policy, &record, fetch).await
    }

    /// Batch fetch. Result order is not guaranteed to match the input order;
    /// unknown ids are skipped.
    pub async fn by_ids<S: EntityStore + ?Sized>(
        store: &S,
        policy: &dyn PolicyEvaluator,
        entity_type: &str,
        ids: &[Id],
        fetch: &BTreeSet<String>,
    ) -> Result<Vec<Value>, SyncError> {
        let records = store
            .get_entities(entity_type, ids)
            .await
            .map_err(SyncError::from)?;
        let mut values = Vec::with_capacity(records.len());
        for record in &records {
            values.push(EntitySerializer::serialize_augmented(store, policy, record, fetch).await?);
        }
        Ok(values)
    }

    pub async fn all<S: EntityStore + ?Sized>(
        store: &S,
        policy: &dyn PolicyEvaluator,
        entity_type: &str,
        fetch: &BTreeSet<String>,
    ) -> Result<Vec<Value>, SyncError> {
        let records = store
            .list_entities(entity_type)
            .await
            .map_err(SyncError::from)?;
        let mut values = Vec::with_capacity(records.len());
        for record in &records {
            values.push(EntitySerializer::serialize_augmented(store, policy, record, fetch).await?);
        }
        Ok(values)
    }

    /// Entities matching a partial-field equality template submitted as JSON.
    pub async fn by_example<S: EntityStore + ?Sized>(
        store: &S,
        policy: &dyn PolicyEvaluator,
        entity_type: &str,
        example_json: &str,
        fetch: &BTreeSet<String>,
    ) -> Result<Vec<Value>, SyncError> {
        let definition = definition_for(store, entity_type).await?;
        let example_tree: Value = serde_json::from_str(example_json)
            .map_err(|e| SyncError::malformed(format!("invalid example fragment: {e}")))?;
        let example_object = example_tree
            .as_object()
            .ok_or_else(|| SyncError::malformed("example fragment must be a JSON object"))?;

        let mut example = BTreeMap::new();
        for (name, value) in example_object {
            example.insert(name.clone(), example_value(&definition, name, value)?);
        }

        let records = store
            .find_by_example(entity_type, &example)
            .await
            .map_err(SyncError::from)?;
        let mut values = Vec::with_capacity(records.len());
        for record in &records {
            values.push(EntitySerializer::serialize_augmented(store, policy, record, fetch).await?);
        }
        Ok(values)
    }

    /// Runs a pre-registered query with the request's remaining string
    /// parameters bound to its attributes. The reserved `fetch` parameter is
    /// stripped by the caller before binding.
    pub async fn named<S: EntityStore + ?Sized>(
        store: &S,
        policy: &dyn PolicyEvaluator,
        registry: &NamedQueryRegistry,
        query_name: &str,
        parameters: &BTreeMap<String, String>,
        fetch: &BTreeSet<String>,
    ) -> Result<Vec<Value>, SyncError> {
        let query = registry
            .get(query_name)
            .ok_or_else(|| SyncError::malformed(format!("unknown named query {query_name}")))?;
        let definition = definition_for(store, &query.entity_type).await?;

        let mut example = BTreeMap::new();
        for (name, raw) in parameters {
            if !query.bound_attributes.iter().any(|a| a == name) {
                return Err(SyncError::malformed(format!(
                    "named query {query_name} does not bind parameter {name}"
                )));
            }
            example.insert(name.clone(), coerce_parameter(&definition, name, raw)?);
        }

        let records = store
            .find_by_example(&query.entity_type, &example)
            .await
            .map_err(SyncError::from)?;
        let mut values = Vec::with_capacity(records.len());
        for record in &records {
            values.push(EntitySerializer::serialize_augmented(store, policy, record, fetch).await?);
        }
        Ok(values)
    }
}

async fn definition_for<S: EntityStore + ?Sized>(
    store: &S,
    entity_type: &str,
) -> Result<EntityDefinition, SyncError> {
    store
        .get_definition(entity_type)
        .await
        .map_err(SyncError::from)?
        .ok_or_else(|| SyncError::malformed(format!("unknown entity type {entity_type}")))
}

fn example_value(
    definition: &EntityDefinition,
    name: &str,
    value: &Value,
) -> Result<FieldValue, SyncError> {
    let attribute = definition.attribute(name).ok_or_else(|| {
        SyncError::malformed(format!(
            "{} has no attribute named {name}",
            definition.entity_type
        ))
    })?;
    match &attribute.association {
        None => Ok(FieldValue::Scalar(value.clone())),
        Some(association) if !association.to_many => {
            let entity_ref: EntityRef = serde_json::from_value(value.clone()).map_err(|_| {
                SyncError::malformed(format!(
                    "example value for {name} must be an entity reference"
                ))
            })?;
            Ok(FieldValue::Ref(Some(entity_ref)))
        }
        Some(_) => Err(SyncError::malformed(format!(
            "collection attribute {name} cannot appear in an example fragment"
        ))),
    }
}

/// Query parameters arrive as strings; the attribute's declared type decides
/// how they compare against stored scalars.
fn coerce_parameter(
    definition: &EntityDefinition,
    name: &str,
    raw: &str,
) -> Result<FieldValue, SyncError> {
    let attribute = definition.attribute(name).ok_or_else(|| {
        SyncError::malformed(format!(
            "{} has no attribute named {name}",
            definition.entity_type
        ))
    })?;
    if attribute.association.is_some() {
        return Err(SyncError::malformed(format!(
            "association attribute {name} cannot be bound from a query parameter"
        )));
    }
    let value = match attribute.data_type {
        DataType::String => Value::String(raw.to_string()),
        DataType::Number => {
            if let Ok(int) = raw.parse::<i64>() {
                Value::from(int)
            } else {
                let float = raw.parse::<f64>().map_err(|_| {
                    SyncError::malformed(format!("parameter {name} must be numeric"))
                })?;
                serde_json::Number::from_f64(float)
                    .map(Value::Number)
                    .ok_or_else(|| {
                        SyncError::malformed(format!("parameter {name} must be a finite number"))
                    })?
            }
        }
        DataType::Boolean => {
            let flag = raw.parse::<bool>().map_err(|_| {
                SyncError::malformed(format!("parameter {name} must be true or false"))
            })?;
            Value::Bool(flag)
        }
        DataType::Object | DataType::Array => {
            return Err(SyncError::malformed(format!(
                "parameter {name} has a structured type and cannot be bound"
            )))
        }
    };
    Ok(FieldValue::Scalar(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::commit::CommitCoordinator;
    use crate::logic::parse::GraphParser;
    use crate::logic::permission::AllowAllPolicy;
    use crate::seed;
    use crate::store::MemoryStore;
    use serde_json::json;

    async fn seeded_store() -> (MemoryStore, String) {
        let store = MemoryStore::new(seed::demo_definitions());
        let batch = GraphParser::parse_batch(
            &store,
            &json!([
                {"entityType": "Person", "tempId": "t1", "name": "Ann", "age": 34},
                {"entityType": "Person", "tempId": "t2", "name": "Bea", "age": 41},
            ]),
            BTreeSet::new(),
        )
        .await
        .unwrap();
        let outcome = CommitCoordinator::apply(&store, &batch).await.unwrap();
        (store, outcome.id_mapping["t1"].clone())
    }

    #[tokio::test]
    async fn by_id_returns_augmented_entity_or_malformed() {
        let (store, ann_id) = seeded_store().await;
        let value = QueryResolver::by_id(&store, &AllowAllPolicy, "Person", &ann_id, &BTreeSet::new())
            .await
            .unwrap();
        assert_eq!(value["name"], "Ann");
        assert_eq!(value["entityType"], "Person");

        let err =
            QueryResolver::by_id(&store, &AllowAllPolicy, "Person", &"nope".to_string(), &BTreeSet::new())
                .await
                .unwrap_err();
        assert!(matches!(err, SyncError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn by_ids_skips_unknown_ids() {
        let (store, ann_id) = seeded_store().await;
        let values = QueryResolver::by_ids(
            &store,
            &AllowAllPolicy,
            "Person",
            &[ann_id, "nope".to_string()],
            &BTreeSet::new(),
        )
        .await
        .unwrap();
        assert_eq!(values.len(), 1);
    }

    #[tokio::test]
    async fn example_fragment_filters_on_partial_fields() {
        let (store, _) = seeded_store().await;
        let values = QueryResolver::by_example(
            &store,
            &AllowAllPolicy,
            "Person",
            r#"{"age": 41}"#,
            &BTreeSet::new(),
        )
        .await
        .unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["name"], "Bea");

        let err = QueryResolver::by_example(
            &store,
            &AllowAllPolicy,
            "Person",
            r#"{"shoeSize": 42}"#,
            &BTreeSet::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SyncError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn named_query_binds_and_coerces_string_parameters() {
        let (store, _) = seeded_store().await;
        let registry = NamedQueryRegistry::new(seed::demo_named_queries());

        let mut params = BTreeMap::new();
        params.insert("age".to_string(), "34".to_string());
        let values = QueryResolver::named(
            &store,
            &AllowAllPolicy,
            &registry,
            "peopleByAge",
            &params,
            &BTreeSet::new(),
        )
        .await
        .unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["name"], "Ann");
    }

    #[tokio::test]
    async fn named_query_rejects_unbound_parameters() {
        let (store, _) = seeded_store().await;
        let registry = NamedQueryRegistry::new(seed::demo_named_queries());

        let mut params = BTreeMap::new();
        params.insert("hairColor".to_string(), "red".to_string());
        let err = QueryResolver::named(
            &store,
            &AllowAllPolicy,
            &registry,
            "peopleByAge",
            &params,
            &BTreeSet::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SyncError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn unknown_named_query_is_malformed() {
        let (store, _) = seeded_store().await;
        let registry = NamedQueryRegistry::new(vec![]);
        let err = QueryResolver::named(
            &store,
            &AllowAllPolicy,
            &registry,
            "nope",
            &BTreeMap::new(),
            &BTreeSet::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SyncError::MalformedRequest(_)));
    }
}
