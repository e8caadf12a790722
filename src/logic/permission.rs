use crate::error::SyncError;
use crate::model::{EntityRecord, MutationBatch, MutationOp, OpKind};
use crate::store::traits::EntityStore;

/// External policy decision point. Implementations are registered once at
/// startup and shared read-only across requests.
pub trait PolicyEvaluator: Send + Sync {
    /// Whether one operation of the batch may proceed. For updates and
    /// deletes the currently stored entity is supplied when it exists.
    fn allows(&self, entity_type: &str, op: OpKind, entity: Option<&EntityRecord>) -> bool;

    /// Write capability reported in augmented entity responses.
    fn can_write(&self, entity_type: &str) -> bool {
        let _ = entity_type;
        true
    }
}

/// Default policy: every authenticated request may do everything.
pub struct AllowAllPolicy;

impl PolicyEvaluator for AllowAllPolicy {
    fn allows(&self, _entity_type: &str, _op: OpKind, _entity: Option<&EntityRecord>) -> bool {
        true
    }
}

/// Checks every mutation against policy before any write is attempted. A
/// single denial aborts the whole batch; nothing has been written yet, so
/// partial application never arises.
pub struct PermissionValidator;

impl PermissionValidator {
    pub async fn validate<S: EntityStore + ?Sized>(
        store: &S,
        policy: &dyn PolicyEvaluator,
        batch: &MutationBatch,
    ) -> Result<(), SyncError> {
        for (op_index, op) in batch.ops.iter().enumerate() {
            let entity = match op {
                MutationOp::Create { .. } => None,
                MutationOp::Update { entity_type, id, .. }
                | MutationOp::Delete { entity_type, id, .. } => store
                    .get_entity(entity_type, id)
                    .await
                    .map_err(SyncError::from)?,
            };
            if !policy.allows(op.entity_type(), op.kind(), entity.as_ref()) {
                return Err(SyncError::PermissionDenied {
                    entity_type: op.entity_type().to_string(),
                    op_index,
                });
            }
        }
        Ok(())
    }
}
