use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::error::SyncError;
use crate::model::{
    AppliedCounts, EntityRef, FieldValue, IdMapping, MutationBatch, MutationOp, PendingValue,
    RefTarget,
};
use crate::store::traits::{EntityStore, EntityTransaction};

/// Refs actually mutated by one accepted batch, plus the temp-id mapping.
/// Serialization happens later, in the refresh step.
#[derive(Debug, Clone, Default)]
pub struct CommitOutcome {
    pub id_mapping: IdMapping,
    pub created: Vec<EntityRef>,
    pub updated: Vec<EntityRef>,
    pub deleted: Vec<EntityRef>,
    pub applied: AppliedCounts,
}

/// Applies a mutation batch against the repository inside one transaction.
///
/// Creates run first, ordered by their temp-id dependencies rather than by
/// input order; updates and deletes follow in submitted order (ordering among
/// independent ops is unspecified). Any failure rolls back the whole batch.
pub struct CommitCoordinator;

impl CommitCoordinator {
    pub async fn apply<S: EntityStore + ?Sized>(
        store: &S,
        batch: &MutationBatch,
    ) -> Result<CommitOutcome, SyncError> {
        let create_order = creation_order(&batch.ops)?;

        let mut tx = store.begin().await.map_err(SyncError::from)?;
        match apply_ops(tx.as_mut(), batch, &create_order).await {
            Ok(outcome) => {
                tx.commit().await.map_err(SyncError::from)?;
                log::debug!(
                    "committed batch: {} created, {} updated, {} deleted",
                    outcome.applied.created,
                    outcome.applied.updated,
                    outcome.applied.deleted
                );
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    log::error!("rollback failed after aborted batch: {rollback_err}");
                }
                Err(err)
            }
        }
    }
}

async fn apply_ops(
    tx: &mut dyn EntityTransaction,
    batch: &MutationBatch,
    create_order: &[usize],
) -> Result<CommitOutcome, SyncError> {
    let mut outcome = CommitOutcome::default();

    for &index in create_order {
        let MutationOp::Create {
            entity_type,
            temp_id,
            fields,
        } = &batch.ops[index]
        else {
            unreachable!("creation order only indexes create ops");
        };
        let resolved = resolve_fields(fields, &outcome.id_mapping)?;
        let record = tx
            .create(entity_type, resolved)
            .await
            .map_err(SyncError::from)?;
        outcome
            .id_mapping
            .insert(temp_id.clone(), record.id.clone());
        outcome.created.push(record.entity_ref());
        outcome.applied.created += 1;
    }

    for op in &batch.ops {
        match op {
            MutationOp::Create { .. } => {}
            MutationOp::Update {
                entity_type,
                id,
                expected_version,
                fields,
            } => {
                let resolved = resolve_fields(fields, &outcome.id_mapping)?;
                tx.update(entity_type, id, *expected_version, resolved)
                    .await
                    .map_err(SyncError::from)?;
                outcome
                    .updated
                    .push(EntityRef::new(entity_type.clone(), id.clone()));
                outcome.applied.updated += 1;
            }
            MutationOp::Delete {
                entity_type,
                id,
                expected_version,
            } => {
                tx.delete(entity_type, id, *expected_version)
                    .await
                    .map_err(SyncError::from)?;
                outcome
                    .deleted
                    .push(EntityRef::new(entity_type.clone(), id.clone()));
                outcome.applied.deleted += 1;
            }
        }
    }

    Ok(outcome)
}

/// Kahn's algorithm over temp-id reference edges between creates. A cycle
/// among not-yet-persisted entities cannot be satisfied and is a request
/// shape error, not a retry condition.
fn creation_order(ops: &[MutationOp]) -> Result<Vec<usize>, SyncError> {
    let mut creates: Vec<usize> = Vec::new();
    let mut by_temp_id: HashMap<&str, usize> = HashMap::new();
    for (index, op) in ops.iter().enumerate() {
        if let MutationOp::Create { temp_id, .. } = op {
            creates.push(index);
            by_temp_id.insert(temp_id.as_str(), index);
        }
    }

    let mut indegree: BTreeMap<usize, usize> = creates.iter().map(|&i| (i, 0)).collect();
    let mut dependants: HashMap<usize, Vec<usize>> = HashMap::new();
    for &index in &creates {
        let MutationOp::Create { fields, .. } = &ops[index] else {
            unreachable!();
        };
        for value in fields.values() {
            for temp_id in value.pending_temp_ids() {
                // The parser guarantees the referenced create exists.
                let dependency = by_temp_id[temp_id];
                if dependency != index {
                    *indegree.get_mut(&index).unwrap() += 1;
                    dependants.entry(dependency).or_default().push(index);
                }
            }
        }
    }

    let mut ready: VecDeque<usize> = indegree
        .iter()
        .filter(|(_, &degree)| degree == 0)
        .map(|(&index, _)| index)
        .collect();
    let mut order = Vec::with_capacity(creates.len());
    while let Some(index) = ready.pop_front() {
        order.push(index);
        for &dependant in dependants.get(&index).map(Vec::as_slice).unwrap_or(&[]) {
            let degree = indegree.get_mut(&dependant).unwrap();
            *degree -= 1;
            if *degree == 0 {
                ready.push_back(dependant);
            }
        }
    }

    if order.len() != creates.len() {
        return Err(SyncError::malformed(
            "reference cycle among created entities",
        ));
    }
    Ok(order)
}

fn resolve_fields(
    fields: &BTreeMap<String, PendingValue>,
    id_mapping: &IdMapping,
) -> Result<BTreeMap<String, FieldValue>, SyncError> {
    fields
        .iter()
        .map(|(name, value)| Ok((name.clone(), resolve_value(value, id_mapping)?)))
        .collect()
}

fn resolve_value(value: &PendingValue, id_mapping: &IdMapping) -> Result<FieldValue, SyncError> {
    Ok(match value {
        PendingValue::Scalar(scalar) => FieldValue::Scalar(scalar.clone()),
        PendingValue::Ref(None) => FieldValue::Ref(None),
        PendingValue::Ref(Some(target)) => {
            FieldValue::Ref(Some(resolve_target(target, id_mapping)?))
        }
        PendingValue::RefList(targets) => FieldValue::RefList(
            targets
                .iter()
                .map(|target| resolve_target(target, id_mapping))
                .collect::<Result<_, _>>()?,
        ),
    })
}

fn resolve_target(target: &RefTarget, id_mapping: &IdMapping) -> Result<EntityRef, SyncError> {
    match target {
        RefTarget::Persisted(entity_ref) => Ok(entity_ref.clone()),
        RefTarget::Pending {
            entity_type,
            temp_id,
        } => {
            let id = id_mapping.get(temp_id).ok_or_else(|| {
                SyncError::Unclassified(anyhow::anyhow!(
                    "tempId {temp_id} was not assigned before being referenced"
                ))
            })?;
            Ok(EntityRef::new(entity_type.clone(), id.clone()))
        }
    }
}
