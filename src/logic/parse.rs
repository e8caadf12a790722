use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::error::SyncError;
use crate::model::{
    AssociationDef, AttributeDef, EntityDefinition, EntityRef, MutationBatch, MutationOp,
    PendingValue, RefTarget,
};
use crate::store::traits::EntityStore;

/// Reserved keys on a mutation node; everything else is an attribute field.
const KEY_ENTITY_TYPE: &str = "entityType";
const KEY_ID: &str = "id";
const KEY_VERSION: &str = "version";
const KEY_TEMP_ID: &str = "tempId";
const KEY_DELETED: &str = "deleted";

/// Converts an incoming generic JSON tree into an ordered mutation sequence.
///
/// A node with `deleted: true` is a delete, a node with an `id` is an update,
/// a node without one is a create carrying a client temp id. All shape
/// problems fail here with `MalformedRequest`, before any permission check or
/// write is attempted.
pub struct GraphParser;

impl GraphParser {
    pub async fn parse_batch<S: EntityStore + ?Sized>(
        store: &S,
        tree: &Value,
        fetch: BTreeSet<String>,
    ) -> Result<MutationBatch, SyncError> {
        let definitions: HashMap<String, EntityDefinition> = store
            .list_definitions()
            .await
            .map_err(SyncError::from)?
            .into_iter()
            .map(|d| (d.entity_type.clone(), d))
            .collect();

        let nodes: Vec<&serde_json::Map<String, Value>> = match tree {
            Value::Object(node) => vec![node],
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_object().ok_or_else(|| {
                        SyncError::malformed("every element of a mutation batch must be an object")
                    })
                })
                .collect::<Result<_, _>>()?,
            _ => {
                return Err(SyncError::malformed(
                    "mutation batch must be an object or an array of objects",
                ))
            }
        };

        let mut ops = Vec::with_capacity(nodes.len());
        for node in nodes {
            ops.push(parse_node(&definitions, node)?);
        }

        validate_temp_references(&ops)?;

        Ok(MutationBatch { ops, fetch })
    }
}

fn parse_node(
    definitions: &HashMap<String, EntityDefinition>,
    node: &serde_json::Map<String, Value>,
) -> Result<MutationOp, SyncError> {
    let entity_type = node
        .get(KEY_ENTITY_TYPE)
        .and_then(Value::as_str)
        .ok_or_else(|| SyncError::malformed("mutation node is missing its entityType tag"))?
        .to_string();
    let definition = definitions
        .get(&entity_type)
        .ok_or_else(|| SyncError::malformed(format!("unknown entity type {entity_type}")))?;

    let id = match node.get(KEY_ID) {
        None | Some(Value::Null) => None,
        Some(Value::String(id)) => Some(id.clone()),
        Some(_) => return Err(SyncError::malformed("entity id must be a string")),
    };
    let version = match node.get(KEY_VERSION) {
        None | Some(Value::Null) => None,
        Some(value) => Some(value.as_i64().ok_or_else(|| {
            SyncError::malformed("entity version must be an integer")
        })?),
    };
    let deleted = match node.get(KEY_DELETED) {
        None | Some(Value::Null) => false,
        Some(Value::Bool(deleted)) => *deleted,
        Some(_) => return Err(SyncError::malformed("deleted marker must be a boolean")),
    };
    let temp_id = match node.get(KEY_TEMP_ID) {
        None | Some(Value::Null) => None,
        Some(Value::String(temp_id)) => Some(temp_id.clone()),
        Some(_) => return Err(SyncError::malformed("tempId must be a string")),
    };

    if deleted {
        let (id, expected_version) = match (id, version) {
            (Some(id), Some(version)) => (id, version),
            _ => {
                return Err(SyncError::malformed(
                    "delete nodes must carry both id and version",
                ))
            }
        };
        return Ok(MutationOp::Delete {
            entity_type,
            id,
            expected_version,
        });
    }

    let fields = parse_fields(definition, node)?;

    match id {
        Some(id) => {
            let expected_version = version.ok_or_else(|| {
                SyncError::malformed("update nodes must carry the last observed version")
            })?;
            Ok(MutationOp::Update {
                entity_type,
                id,
                expected_version,
                fields,
            })
        }
        None => {
            let temp_id = temp_id.ok_or_else(|| {
                SyncError::malformed("create nodes must carry a client tempId")
            })?;
            for attribute in &definition.attributes {
                if attribute.required && !fields.contains_key(&attribute.name) {
                    return Err(SyncError::malformed(format!(
                        "{entity_type} is missing required attribute {}",
                        attribute.name
                    )));
                }
            }
            Ok(MutationOp::Create {
                entity_type,
                temp_id,
                fields,
            })
        }
    }
}

fn parse_fields(
    definition: &EntityDefinition,
    node: &serde_json::Map<String, Value>,
) -> Result<BTreeMap<String, PendingValue>, SyncError> {
    let mut fields = BTreeMap::new();
    for (name, value) in node {
        if matches!(
            name.as_str(),
            KEY_ENTITY_TYPE | KEY_ID | KEY_VERSION | KEY_TEMP_ID | KEY_DELETED
        ) {
            continue;
        }
        let attribute = definition.attribute(name).ok_or_else(|| {
            SyncError::malformed(format!(
                "{} has no attribute named {name}",
                definition.entity_type
            ))
        })?;
        fields.insert(name.clone(), parse_field_value(attribute, value)?);
    }
    Ok(fields)
}

fn parse_field_value(attribute: &AttributeDef, value: &Value) -> Result<PendingValue, SyncError> {
    let Some(association) = &attribute.association else {
        return Ok(PendingValue::Scalar(value.clone()));
    };

    if association.to_many {
        let items = value.as_array().ok_or_else(|| {
            SyncError::malformed(format!("attribute {} expects an array of references", attribute.name))
        })?;
        let targets = items
            .iter()
            .map(|item| parse_ref_target(&attribute.name, association, item))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PendingValue::RefList(targets))
    } else if value.is_null() {
        Ok(PendingValue::Ref(None))
    } else {
        let target = parse_ref_target(&attribute.name, association, value)?;
        Ok(PendingValue::Ref(Some(target)))
    }
}

fn parse_ref_target(
    attribute_name: &str,
    association: &AssociationDef,
    value: &Value,
) -> Result<RefTarget, SyncError> {
    let node = value.as_object().ok_or_else(|| {
        SyncError::malformed(format!(
            "attribute {attribute_name} expects an entity reference object"
        ))
    })?;
    let entity_type = node
        .get(KEY_ENTITY_TYPE)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            SyncError::malformed(format!(
                "reference in {attribute_name} is missing its entityType tag"
            ))
        })?;
    if entity_type != association.target_type {
        return Err(SyncError::malformed(format!(
            "attribute {attribute_name} references {entity_type}, expected {}",
            association.target_type
        )));
    }
    match (node.get(KEY_ID), node.get(KEY_TEMP_ID)) {
        (Some(Value::String(id)), None) => Ok(RefTarget::Persisted(EntityRef::new(
            entity_type,
            id.clone(),
        ))),
        (None, Some(Value::String(temp_id))) => Ok(RefTarget::Pending {
            entity_type: entity_type.to_string(),
            temp_id: temp_id.clone(),
        }),
        _ => Err(SyncError::malformed(format!(
            "reference in {attribute_name} must carry exactly one of id or tempId"
        ))),
    }
}

/// Temp ids must be unique per batch and every pending reference must point
/// at a create within the same batch.
fn validate_temp_references(ops: &[MutationOp]) -> Result<(), SyncError> {
    let mut declared: HashSet<&str> = HashSet::new();
    for op in ops {
        if let MutationOp::Create { temp_id, .. } = op {
            if !declared.insert(temp_id) {
                return Err(SyncError::malformed(format!(
                    "duplicate tempId {temp_id} in batch"
                )));
            }
        }
    }
    for op in ops {
        let fields = match op {
            MutationOp::Create { fields, .. } | MutationOp::Update { fields, .. } => fields,
            MutationOp::Delete { .. } => continue,
        };
        for value in fields.values() {
            for temp_id in value.pending_temp_ids() {
                if !declared.contains(temp_id) {
                    return Err(SyncError::malformed(format!(
                        "reference to unknown tempId {temp_id}"
                    )));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::split_fetch_directives;
    use crate::seed;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn store() -> MemoryStore {
        MemoryStore::new(seed::demo_definitions())
    }

    async fn parse(tree: Value) -> Result<MutationBatch, SyncError> {
        GraphParser::parse_batch(&store(), &tree, BTreeSet::new()).await
    }

    #[tokio::test]
    async fn classifies_create_update_and_delete_nodes() {
        let tree = json!([
            {"entityType": "Person", "tempId": "t1", "name": "Ann"},
            {"entityType": "Person", "id": "p7", "version": 3, "name": "Bea"},
            {"entityType": "Person", "id": "p8", "version": 1, "deleted": true},
        ]);
        let batch = parse(tree).await.unwrap();
        assert_eq!(batch.ops.len(), 3);
        assert!(matches!(batch.ops[0], MutationOp::Create { .. }));
        assert!(matches!(
            batch.ops[1],
            MutationOp::Update { expected_version: 3, .. }
        ));
        assert!(matches!(
            batch.ops[2],
            MutationOp::Delete { expected_version: 1, .. }
        ));
    }

    #[tokio::test]
    async fn single_object_is_a_one_op_batch() {
        let batch = parse(json!({"entityType": "Person", "tempId": "t1", "name": "Ann"}))
            .await
            .unwrap();
        assert_eq!(batch.ops.len(), 1);
    }

    #[tokio::test]
    async fn forward_references_parse_without_sorted_input() {
        // Pet references a Person created later in the same batch.
        let tree = json!([
            {"entityType": "Pet", "tempId": "t2", "name": "Rex",
             "owner": {"entityType": "Person", "tempId": "t1"}},
            {"entityType": "Person", "tempId": "t1", "name": "Ann"},
        ]);
        let batch = parse(tree).await.unwrap();
        let MutationOp::Create { fields, .. } = &batch.ops[0] else {
            panic!("expected create");
        };
        let PendingValue::Ref(Some(RefTarget::Pending { temp_id, .. })) = &fields["owner"] else {
            panic!("expected pending reference");
        };
        assert_eq!(temp_id, "t1");
    }

    #[tokio::test]
    async fn rejects_unknown_entity_type() {
        let err = parse(json!({"entityType": "Ghost", "tempId": "t1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn rejects_update_without_version() {
        let err = parse(json!({"entityType": "Person", "id": "p1", "name": "Ann"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn rejects_create_missing_required_attribute() {
        let err = parse(json!({"entityType": "Person", "tempId": "t1", "age": 30}))
            .await
            .unwrap_err();
        let SyncError::MalformedRequest(message) = err else {
            panic!("expected malformed request");
        };
        assert!(message.contains("name"));
    }

    #[tokio::test]
    async fn rejects_undefined_attribute() {
        let err = parse(json!({"entityType": "Person", "tempId": "t1", "name": "Ann", "shoeSize": 42}))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn rejects_reference_to_unknown_temp_id() {
        let tree = json!([
            {"entityType": "Pet", "tempId": "t2", "name": "Rex",
             "owner": {"entityType": "Person", "tempId": "missing"}},
        ]);
        let err = parse(tree).await.unwrap_err();
        let SyncError::MalformedRequest(message) = err else {
            panic!("expected malformed request");
        };
        assert!(message.contains("missing"));
    }

    #[tokio::test]
    async fn rejects_duplicate_temp_ids() {
        let tree = json!([
            {"entityType": "Person", "tempId": "t1", "name": "Ann"},
            {"entityType": "Person", "tempId": "t1", "name": "Bea"},
        ]);
        let err = parse(tree).await.unwrap_err();
        assert!(matches!(err, SyncError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn rejects_reference_with_wrong_target_type() {
        let tree = json!({"entityType": "Pet", "tempId": "t1", "name": "Rex",
                          "owner": {"entityType": "Pet", "tempId": "t1"}});
        let err = parse(tree).await.unwrap_err();
        assert!(matches!(err, SyncError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn fetch_directives_ride_along() {
        let batch = GraphParser::parse_batch(
            &store(),
            &json!({"entityType": "Person", "tempId": "t1", "name": "Ann"}),
            split_fetch_directives(Some("pets")),
        )
        .await
        .unwrap();
        assert!(batch.fetch.contains("pets"));
    }
}
