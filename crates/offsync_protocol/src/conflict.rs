//! Conflict payloads and resolution strategies.

use crate::entity::EntityKey;
use crate::error::{ProtocolError, ProtocolResult};
use crate::http::HttpMethod;
use crate::operation::{ClientId, Operation, OperationId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One side of a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictSide {
    /// Competing operation.
    pub operation_id: OperationId,
    /// Its client.
    pub client_id: ClientId,
    /// Its creation time.
    pub created_at: Timestamp,
    /// Its method.
    pub method: HttpMethod,
    /// Its body snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&Operation> for ConflictSide {
    fn from(op: &Operation) -> Self {
        Self {
            operation_id: op.id,
            client_id: op.client_id,
            created_at: op.created_at,
            method: op.method,
            data: op.body.clone(),
        }
    }
}

/// Body of a 409 response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictPayload {
    /// Contested entity.
    pub entity: EntityKey,
    /// The submission that triggered detection.
    pub challenger: ConflictSide,
    /// Operations it collided with.
    pub incumbents: Vec<ConflictSide>,
    /// Entity state on the server at detection time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_state: Option<Value>,
}

impl ConflictPayload {
    /// All competing operation ids, challenger first.
    #[must_use]
    pub fn operation_ids(&self) -> Vec<OperationId> {
        std::iter::once(self.challenger.operation_id)
            .chain(self.incumbents.iter().map(|side| side.operation_id))
            .collect()
    }
}

/// Strategy names on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyName {
    /// `last-write-wins`
    LastWriteWins,
    /// `manual`
    Manual,
}

/// How to settle a conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionStrategy {
    /// The later operation by `(createdAt, clientId)` becomes authoritative.
    LastWriteWins,
    /// Caller-supplied state replaces both sides.
    Manual {
        /// New authoritative entity state.
        merged_data: Value,
    },
}

impl ResolutionStrategy {
    /// Wire name.
    #[must_use]
    pub fn name(&self) -> StrategyName {
        match self {
            Self::LastWriteWins => StrategyName::LastWriteWins,
            Self::Manual { .. } => StrategyName::Manual,
        }
    }
}

/// Body of `POST /sync/resolve`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    /// Strategy name.
    pub strategy: StrategyName,
    /// Any operation taking part in the conflict.
    pub operation_id: OperationId,
    /// Required for `manual`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_data: Option<Value>,
}

impl ResolveRequest {
    /// Builds a request from a typed strategy.
    #[must_use]
    pub fn new(operation_id: OperationId, strategy: &ResolutionStrategy) -> Self {
        let merged_data = match strategy {
            ResolutionStrategy::LastWriteWins => None,
            ResolutionStrategy::Manual { merged_data } => Some(merged_data.clone()),
        };
        Self {
            strategy: strategy.name(),
            operation_id,
            merged_data,
        }
    }

    /// Converts to the typed strategy.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MissingField`] for `manual` without `mergedData`.
    pub fn strategy(&self) -> ProtocolResult<ResolutionStrategy> {
        match self.strategy {
            StrategyName::LastWriteWins => Ok(ResolutionStrategy::LastWriteWins),
            StrategyName::Manual => self
                .merged_data
                .clone()
                .map(|merged_data| ResolutionStrategy::Manual { merged_data })
                .ok_or(ProtocolError::MissingField("mergedData")),
        }
    }
}

/// Outcome of a resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedOperation {
    /// Contested entity.
    pub entity: EntityKey,
    /// Strategy applied.
    pub strategy: StrategyName,
    /// Authoritative operation: the LWW winner or the synthetic merge record.
    pub winner: OperationId,
    /// Operations marked `superseded`.
    pub superseded: Vec<OperationId>,
    /// Entity state after resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    /// When the resolution was recorded.
    pub resolved_at: Timestamp,
}
