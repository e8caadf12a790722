use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::common::{EntityRef, Id, RefTarget, Version};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DataType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

/// Association metadata for an attribute that references other entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationDef {
    /// Entity type on the far side of the association
    pub target_type: String,
    /// True for collection-valued associations
    #[serde(default)]
    pub to_many: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDef {
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub required: bool,
    /// Present when the attribute holds entity references instead of scalars
    #[serde(skip_serializing_if = "Option::is_none")]
    pub association: Option<AssociationDef>,
}

impl AttributeDef {
    pub fn scalar(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            required: false,
            association: None,
        }
    }

    pub fn required_scalar(name: &str, data_type: DataType) -> Self {
        Self {
            required: true,
            ..Self::scalar(name, data_type)
        }
    }

    pub fn to_one(name: &str, target_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: DataType::Object,
            required: false,
            association: Some(AssociationDef {
                target_type: target_type.to_string(),
                to_many: false,
            }),
        }
    }

    pub fn to_many(name: &str, target_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: DataType::Array,
            required: false,
            association: Some(AssociationDef {
                target_type: target_type.to_string(),
                to_many: true,
            }),
        }
    }
}

/// Schema metadata for one entity type, served by the definition endpoints and
/// used by the graph parser to validate incoming mutation nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDefinition {
    #[serde(rename = "entityType")]
    pub entity_type: String,
    pub attributes: Vec<AttributeDef>,
}

impl EntityDefinition {
    pub fn new(entity_type: &str, attributes: Vec<AttributeDef>) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            attributes,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// Value of one stored attribute. Associations always hold resolved refs;
/// pending temp-id targets only exist inside an uncommitted batch.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Scalar(serde_json::Value),
    Ref(Option<EntityRef>),
    RefList(Vec<EntityRef>),
}

/// Value of one attribute as submitted by a client, before temp ids are
/// resolved against the id mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingValue {
    Scalar(serde_json::Value),
    Ref(Option<RefTarget>),
    RefList(Vec<RefTarget>),
}

impl PendingValue {
    /// Temp ids this value refers to, used for dependency ordering.
    pub fn pending_temp_ids(&self) -> Vec<&str> {
        match self {
            PendingValue::Scalar(_) => Vec::new(),
            PendingValue::Ref(target) => target
                .iter()
                .filter_map(|t| t.pending_temp_id())
                .map(|s| s.as_str())
                .collect(),
            PendingValue::RefList(targets) => targets
                .iter()
                .filter_map(|t| t.pending_temp_id())
                .map(|s| s.as_str())
                .collect(),
        }
    }
}

/// One persisted entity as held by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub entity_type: String,
    pub id: Id,
    pub version: Version,
    pub fields: BTreeMap<String, FieldValue>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl EntityRecord {
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.entity_type.clone(), self.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::common::EntityRef;

    #[test]
    fn pending_temp_ids_collects_only_unresolved_targets() {
        let v = PendingValue::RefList(vec![
            RefTarget::Persisted(EntityRef::new("Pet", "p1")),
            RefTarget::Pending {
                entity_type: "Pet".to_string(),
                temp_id: "t9".to_string(),
            },
        ]);
        assert_eq!(v.pending_temp_ids(), vec!["t9"]);

        let s = PendingValue::Scalar(serde_json::json!(42));
        assert!(s.pending_temp_ids().is_empty());
    }

    #[test]
    fn definition_attribute_lookup() {
        let def = EntityDefinition::new(
            "Person",
            vec![
                AttributeDef::required_scalar("name", DataType::String),
                AttributeDef::to_many("pets", "Pet"),
            ],
        );
        assert!(def.attribute("name").is_some());
        assert!(def.attribute("pets").unwrap().association.is_some());
        assert!(def.attribute("missing").is_none());
    }
}
