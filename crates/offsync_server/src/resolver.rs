//! Server-side conflict resolution.

use crate::error::{ServerError, ServerResult};
use crate::store::StoreState;
use offsync_protocol::{
    ClientId, HttpMethod, Operation, OperationId, OperationStatus, ResolutionStrategy,
    ResolvedOperation, StrategyName, Timestamp,
};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Applies resolution strategies to conflict groups.
///
/// Resolution is monotonic: once recorded, every participant maps to the
/// same [`ResolvedOperation`]. Asking again with the same strategy returns
/// it unchanged; a different strategy fails with
/// [`ServerError::AlreadyResolved`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ConflictResolver;

impl ConflictResolver {
    /// Creates a resolver.
    pub fn new() -> Self {
        Self
    }

    /// Resolves the conflict `id` takes part in.
    ///
    /// `requester` owns the synthetic merge record of a manual resolution.
    ///
    /// # Errors
    ///
    /// - [`ServerError::NotFound`] for an unknown id or one never in conflict
    /// - [`ServerError::AlreadyResolved`] for a different strategy or
    ///   merged state on a settled conflict
    pub fn resolve(
        &self,
        state: &mut StoreState,
        id: OperationId,
        strategy: &ResolutionStrategy,
        requester: ClientId,
        now: Timestamp,
    ) -> ServerResult<ResolvedOperation> {
        let op = state
            .get(&id)
            .ok_or_else(|| ServerError::NotFound(format!("operation {id}")))?;

        if let Some(done) = state.resolutions.get(&id) {
            return if Self::same_request(done, strategy) {
                debug!(%id, "resolution repeated");
                Ok(done.clone())
            } else {
                Err(ServerError::AlreadyResolved(id))
            };
        }

        if op.status != OperationStatus::Conflict && op.conflicts_with.is_empty() {
            return Err(ServerError::NotFound(format!(
                "operation {id} is not in conflict"
            )));
        }
        let entity = op
            .entity_key()
            .ok_or_else(|| ServerError::NotFound(format!("operation {id} has no entity")))?;

        let group = Self::group(state, id);
        let resolved = match strategy {
            ResolutionStrategy::LastWriteWins => Self::last_write_wins(state, &group, now),
            ResolutionStrategy::Manual { merged_data } => {
                let merge = Operation::new(
                    requester,
                    HttpMethod::Put,
                    format!("/{}/{}", entity.entity_type, entity.entity_id),
                    Some(merged_data.clone()),
                    now,
                )
                .with_entity(entity.entity_type.clone(), entity.entity_id.clone());
                Self::manual(state, &group, merge, now)
            }
        }
        .ok_or_else(|| ServerError::NotFound(format!("conflict group of {id} is empty")))?;

        for participant in group.iter().chain(std::iter::once(&resolved.winner)) {
            state.conflicts.remove(participant);
            state.resolutions.insert(*participant, resolved.clone());
        }

        info!(
            %id,
            entity = %resolved.entity,
            strategy = ?resolved.strategy,
            winner = %resolved.winner,
            superseded = resolved.superseded.len(),
            "conflict resolved"
        );
        Ok(resolved)
    }

    /// The latest `(createdAt, clientId)` wins and is applied if it was not.
    fn last_write_wins(
        state: &mut StoreState,
        group: &BTreeSet<OperationId>,
        now: Timestamp,
    ) -> Option<ResolvedOperation> {
        let winner = group
            .iter()
            .filter_map(|id| state.get(id))
            .max_by_key(|op| (op.created_at, op.client_id))?
            .clone();

        let losers: Vec<OperationId> = group
            .iter()
            .copied()
            .filter(|id| *id != winner.id)
            .collect();
        // A loser applied after the winner has overwritten it.
        let overwritten = losers.iter().filter_map(|id| state.get(id)).any(|op| {
            op.status == OperationStatus::Completed
                && op.completed_at.unwrap_or(0) > winner.completed_at.unwrap_or(0)
        });
        for loser in &losers {
            Self::supersede(state, loser, winner.id, now);
        }

        let state_after = if winner.status != OperationStatus::Completed || overwritten {
            let applied = state.apply_effect(&winner);
            if let Some(op) = state.ops.get_mut(&winner.id) {
                op.status = OperationStatus::Completed;
                op.completed_at = Some(now);
                op.response_status = Some(200);
                op.response_data.clone_from(&applied);
                op.error_message = None;
            }
            applied
        } else {
            winner.entity_key().and_then(|k| state.entities.get(&k).cloned())
        };

        Some(ResolvedOperation {
            entity: winner.entity_key()?,
            strategy: StrategyName::LastWriteWins,
            winner: winner.id,
            superseded: losers,
            state: state_after,
            resolved_at: now,
        })
    }

    /// The merged state replaces the entity; every original is superseded
    /// by a synthetic merge record.
    fn manual(
        state: &mut StoreState,
        group: &BTreeSet<OperationId>,
        mut merge: Operation,
        now: Timestamp,
    ) -> Option<ResolvedOperation> {
        if group.is_empty() {
            return None;
        }
        let applied = state.apply_effect(&merge);
        merge.status = OperationStatus::Completed;
        merge.completed_at = Some(now);
        merge.received_at = Some(now);
        merge.response_status = Some(200);
        merge.response_data.clone_from(&applied);
        merge.conflicts_with = group.iter().copied().collect();
        let winner = merge.id;
        let entity = merge.entity_key()?;
        state.put(merge);

        for id in group {
            Self::supersede(state, id, winner, now);
        }

        Some(ResolvedOperation {
            entity,
            strategy: StrategyName::Manual,
            winner,
            superseded: group.iter().copied().collect(),
            state: applied,
            resolved_at: now,
        })
    }

    /// Marks `id` superseded by `winner`. The server may move `completed`
    /// records here; no other path leaves `completed`.
    fn supersede(state: &mut StoreState, id: &OperationId, winner: OperationId, now: Timestamp) {
        if let Some(op) = state.ops.get_mut(id) {
            op.status = OperationStatus::Superseded;
            op.superseded_by = Some(winner);
            op.completed_at.get_or_insert(now);
            debug!(%id, %winner, "operation superseded");
        }
    }

    /// `id` and everything transitively cross-linked to it.
    fn group(state: &StoreState, id: OperationId) -> BTreeSet<OperationId> {
        let mut group = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let Some(op) = state.get(&next) else {
                continue;
            };
            if op.status == OperationStatus::Superseded || !group.insert(next) {
                continue;
            }
            stack.extend(op.conflicts_with.iter().copied());
        }
        group
    }

    fn same_request(done: &ResolvedOperation, strategy: &ResolutionStrategy) -> bool {
        match strategy {
            ResolutionStrategy::LastWriteWins => {
                done.strategy == StrategyName::LastWriteWins
            }
            ResolutionStrategy::Manual { merged_data } => {
                done.strategy == StrategyName::Manual
                    && done.state.as_ref() == Some(merged_data)
            }
        }
    }
}
