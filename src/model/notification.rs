use std::collections::BTreeSet;

use crate::model::common::EntityRef;

/// Where a commit came from, carried to listeners alongside the change set.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub uri: String,
    pub headers: Vec<(String, String)>,
}

/// Immutable summary of one commit's effects, shared read-only by every
/// registered listener after the transaction has committed durably.
#[derive(Debug, Clone)]
pub struct NotificationBatch {
    pub created: BTreeSet<EntityRef>,
    pub updated: BTreeSet<EntityRef>,
    pub deleted: BTreeSet<EntityRef>,
    pub request_context: RequestContext,
}

impl NotificationBatch {
    pub fn new(
        created: impl IntoIterator<Item = EntityRef>,
        updated: impl IntoIterator<Item = EntityRef>,
        deleted: impl IntoIterator<Item = EntityRef>,
        request_context: RequestContext,
    ) -> Self {
        Self {
            created: created.into_iter().collect(),
            updated: updated.into_iter().collect(),
            deleted: deleted.into_iter().collect(),
            request_context,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_refs_collapse_into_sets() {
        let r = EntityRef::new("Person", "1");
        let batch = NotificationBatch::new(
            vec![r.clone(), r.clone()],
            vec![],
            vec![],
            RequestContext::default(),
        );
        assert_eq!(batch.created.len(), 1);
        assert!(!batch.is_empty());
    }
}
