use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Id = String;

/// Client-assigned temporary token for an entity that has not been persisted yet.
pub type TempId = String;

/// Optimistic-concurrency version counter. Starts at 0 on create and is
/// incremented by the store on every successful update.
pub type Version = i64;

/// Reference to a persisted entity: which type, which row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "entityType")]
    pub entity_type: String,
    pub id: Id,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, id: impl Into<Id>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }
}

/// Target of an association value inside a mutation batch. A `Pending` target
/// names an entity created elsewhere in the same batch by its temp id and is
/// resolved to a real id during commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    Persisted(EntityRef),
    Pending { entity_type: String, temp_id: TempId },
}

impl RefTarget {
    pub fn entity_type(&self) -> &str {
        match self {
            RefTarget::Persisted(r) => &r.entity_type,
            RefTarget::Pending { entity_type, .. } => entity_type,
        }
    }

    pub fn pending_temp_id(&self) -> Option<&TempId> {
        match self {
            RefTarget::Persisted(_) => None,
            RefTarget::Pending { temp_id, .. } => Some(temp_id),
        }
    }
}

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}
