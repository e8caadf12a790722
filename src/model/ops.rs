use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::model::common::{Id, TempId, Version};
use crate::model::entity::PendingValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::Create => write!(f, "create"),
            OpKind::Update => write!(f, "update"),
            OpKind::Delete => write!(f, "delete"),
        }
    }
}

/// One create/update/delete instruction within a commit batch.
///
/// Updates and deletes always carry the version the client last observed;
/// creates never do.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOp {
    Create {
        entity_type: String,
        temp_id: TempId,
        fields: BTreeMap<String, PendingValue>,
    },
    Update {
        entity_type: String,
        id: Id,
        expected_version: Version,
        fields: BTreeMap<String, PendingValue>,
    },
    Delete {
        entity_type: String,
        id: Id,
        expected_version: Version,
    },
}

impl MutationOp {
    pub fn kind(&self) -> OpKind {
        match self {
            MutationOp::Create { .. } => OpKind::Create,
            MutationOp::Update { .. } => OpKind::Update,
            MutationOp::Delete { .. } => OpKind::Delete,
        }
    }

    pub fn entity_type(&self) -> &str {
        match self {
            MutationOp::Create { entity_type, .. }
            | MutationOp::Update { entity_type, .. }
            | MutationOp::Delete { entity_type, .. } => entity_type,
        }
    }
}

/// Ordered mutation sequence plus the association paths requested for the
/// post-commit refresh.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MutationBatch {
    pub ops: Vec<MutationOp>,
    pub fetch: BTreeSet<String>,
}

/// Mapping from client temp ids to server-assigned ids, produced once per
/// commit and never mutated afterwards.
pub type IdMapping = BTreeMap<TempId, Id>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AppliedCounts {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// Canonical outcome of one accepted commit, ready for the wire.
#[derive(Debug, Clone, Serialize)]
pub struct CommitResult {
    #[serde(rename = "idMapping")]
    pub id_mapping: IdMapping,
    pub entities: Vec<serde_json::Value>,
    #[serde(skip)]
    pub applied: AppliedCounts,
}

/// Comma-separated association path set from the shared `fetch` query
/// parameter. Absent or empty means no extra associations are materialized.
pub fn split_fetch_directives(raw: Option<&str>) -> BTreeSet<String> {
    match raw {
        None => BTreeSet::new(),
        Some(raw) => raw
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_directives_split_and_ignore_empties() {
        assert!(split_fetch_directives(None).is_empty());
        assert!(split_fetch_directives(Some("")).is_empty());

        let set = split_fetch_directives(Some("owner,pets, owner.pets ,"));
        assert_eq!(set.len(), 3);
        assert!(set.contains("owner"));
        assert!(set.contains("pets"));
        assert!(set.contains("owner.pets"));
    }

    #[test]
    fn op_kind_reporting() {
        let op = MutationOp::Delete {
            entity_type: "Person".to_string(),
            id: "x".to_string(),
            expected_version: 3,
        };
        assert_eq!(op.kind(), OpKind::Delete);
        assert_eq!(op.entity_type(), "Person");
        assert_eq!(op.kind().to_string(), "delete");
    }
}
