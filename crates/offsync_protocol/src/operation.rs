//! Queued operations.

use crate::entity::EntityKey;
use crate::error::{ProtocolError, ProtocolResult};
use crate::http::HttpMethod;
use crate::status::OperationStatus;
use offsync_codec::{from_cbor, to_cbor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Client-generated, globally unique operation identifier.
///
/// The server deduplicates replays on this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identity of a client installation.
///
/// Ordered so that equal-timestamp conflicts break ties deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Generates a fresh random client id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Raw 16 bytes, as embedded in bearer tokens.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Rebuilds a client id from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ClientId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A queued mutating request representing one user action.
///
/// Once `completed` or `superseded` the record is immutable apart from its
/// audit fields and is never resubmitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Client-generated id.
    pub id: OperationId,
    /// Target URL (absolute or path).
    pub url: String,
    /// HTTP method.
    pub method: HttpMethod,
    /// JSON body, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Extra request headers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Collection of the targeted entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    /// Id of the targeted entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Originating client.
    pub client_id: ClientId,
    /// When the user action happened.
    pub created_at: Timestamp,
    /// Lifecycle status.
    pub status: OperationStatus,
    /// Transient failures so far.
    #[serde(default)]
    pub retries: u32,
    /// Time of the last failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_retry_at: Option<Timestamp>,
    /// Last failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// When the server applied it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    /// HTTP status of the last attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_status: Option<u16>,
    /// Server response body, or the conflict payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_data: Option<Value>,
    /// Winning operation when this one lost a conflict.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<OperationId>,
    /// Operations this one was found to conflict with.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts_with: Vec<OperationId>,
    /// Server receipt time. Unset on the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<Timestamp>,
}

impl Operation {
    /// Creates a pending operation, deriving the entity key from `url`.
    pub fn new(
        client_id: ClientId,
        method: HttpMethod,
        url: impl Into<String>,
        body: Option<Value>,
        created_at: Timestamp,
    ) -> Self {
        let url = url.into();
        let (entity_type, entity_id) = EntityKey::parts_from_url(&url);
        Self {
            id: OperationId::new(),
            url,
            method,
            body,
            headers: BTreeMap::new(),
            entity_type,
            entity_id,
            client_id,
            created_at,
            status: OperationStatus::Pending,
            retries: 0,
            last_retry_at: None,
            error_message: None,
            completed_at: None,
            response_status: None,
            response_data: None,
            superseded_by: None,
            conflicts_with: Vec::new(),
            received_at: None,
        }
    }

    /// Overrides the generated id.
    #[must_use]
    pub fn with_id(mut self, id: OperationId) -> Self {
        self.id = id;
        self
    }

    /// Sets request headers.
    #[must_use]
    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Overrides the URL-derived entity key.
    #[must_use]
    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    /// The conflict-detection key; `None` unless both parts are known.
    #[must_use]
    pub fn entity_key(&self) -> Option<EntityKey> {
        match (&self.entity_type, &self.entity_id) {
            (Some(kind), Some(id)) => Some(EntityKey::new(kind.clone(), id.clone())),
            _ => None,
        }
    }

    /// Moves to `status` and applies `patch`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidTransition`] if the state machine
    /// forbids the move. The record is left untouched in that case.
    pub fn transition(&mut self, status: OperationStatus, patch: &OperationPatch) -> ProtocolResult<()> {
        self.status.check_transition(status)?;
        self.status = status;
        patch.apply_to(self);
        Ok(())
    }

    /// Encodes for the journal.
    ///
    /// # Errors
    ///
    /// Returns a codec error if CBOR encoding fails.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(to_cbor(self)?)
    }

    /// Decodes a journal payload.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the bytes are not a valid operation.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(from_cbor(bytes)?)
    }
}

/// Field updates applied alongside a status change.
///
/// `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationPatch {
    /// New retry count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    /// New last-retry time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_retry_at: Option<Timestamp>,
    /// New error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Clears `errorMessage`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub clear_error: bool,
    /// Completion time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    /// HTTP status of the attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_status: Option<u16>,
    /// Response body or conflict payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_data: Option<Value>,
    /// Winning operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<OperationId>,
    /// Conflict cross-links to add.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts_with: Vec<OperationId>,
}

impl OperationPatch {
    /// An empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry count.
    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Sets the last retry time.
    #[must_use]
    pub fn last_retry_at(mut self, at: Timestamp) -> Self {
        self.last_retry_at = Some(at);
        self
    }

    /// Sets the error message.
    #[must_use]
    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Clears any stored error message.
    #[must_use]
    pub fn clear_error(mut self) -> Self {
        self.clear_error = true;
        self
    }

    /// Sets the completion time.
    #[must_use]
    pub fn completed_at(mut self, at: Timestamp) -> Self {
        self.completed_at = Some(at);
        self
    }

    /// Records the response of an attempt.
    #[must_use]
    pub fn response(mut self, status: u16, data: Option<Value>) -> Self {
        self.response_status = Some(status);
        self.response_data = data;
        self
    }

    /// Points at the winning operation.
    #[must_use]
    pub fn superseded_by(mut self, winner: OperationId) -> Self {
        self.superseded_by = Some(winner);
        self
    }

    /// Adds conflict cross-links.
    #[must_use]
    pub fn conflicts_with(mut self, others: impl IntoIterator<Item = OperationId>) -> Self {
        self.conflicts_with.extend(others);
        self
    }

    /// Applies the patch to `op`. Cross-links are merged without duplicates.
    pub fn apply_to(&self, op: &mut Operation) {
        if let Some(retries) = self.retries {
            op.retries = retries;
        }
        if let Some(at) = self.last_retry_at {
            op.last_retry_at = Some(at);
        }
        if self.clear_error {
            op.error_message = None;
        }
        if let Some(message) = &self.error_message {
            op.error_message = Some(message.clone());
        }
        if let Some(at) = self.completed_at {
            op.completed_at = Some(at);
        }
        if let Some(status) = self.response_status {
            op.response_status = Some(status);
        }
        if let Some(data) = &self.response_data {
            op.response_data = Some(data.clone());
        }
        if let Some(winner) = self.superseded_by {
            op.superseded_by = Some(winner);
        }
        for other in &self.conflicts_with {
            if *other != op.id && !op.conflicts_with.contains(other) {
                op.conflicts_with.push(*other);
            }
        }
    }
}

/// An operation as submitted over HTTP, before validation.
///
/// Every field is optional so that a missing `url` or `method` surfaces as
/// a 400 instead of a JSON parse failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDraft {
    /// Client-generated id.
    #[serde(default)]
    pub id: Option<OperationId>,
    /// Target URL.
    #[serde(default)]
    pub url: Option<String>,
    /// HTTP method name.
    #[serde(default)]
    pub method: Option<String>,
    /// JSON body.
    #[serde(default)]
    pub body: Option<Value>,
    /// Request headers.
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    /// Entity collection.
    #[serde(default)]
    pub entity_type: Option<String>,
    /// Entity id.
    #[serde(default)]
    pub entity_id: Option<String>,
    /// Submitting client.
    #[serde(default)]
    pub client_id: Option<ClientId>,
    /// Creation time.
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

impl OperationDraft {
    /// Validates the draft into a pending [`Operation`].
    ///
    /// `client_id` is the authenticated client and takes precedence over the
    /// body. A missing `createdAt` falls back to `received_at`.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::MissingField`] for an absent id, url or method
    /// - [`ProtocolError::InvalidMethod`] for an unknown method
    pub fn validate(self, client_id: ClientId, received_at: Timestamp) -> ProtocolResult<Operation> {
        let id = self.id.ok_or(ProtocolError::MissingField("id"))?;
        let url = self
            .url
            .filter(|u| !u.trim().is_empty())
            .ok_or(ProtocolError::MissingField("url"))?;
        let method: HttpMethod = self
            .method
            .filter(|m| !m.trim().is_empty())
            .ok_or(ProtocolError::MissingField("method"))?
            .parse()?;

        let mut op = Operation::new(
            client_id,
            method,
            url,
            self.body,
            self.created_at.unwrap_or(received_at),
        )
        .with_id(id)
        .with_headers(self.headers.unwrap_or_default());

        if self.entity_type.is_some() {
            op.entity_type = self.entity_type;
        }
        if self.entity_id.is_some() {
            op.entity_id = self.entity_id;
        }
        op.received_at = Some(received_at);
        Ok(op)
    }
}

impl From<&Operation> for OperationDraft {
    fn from(op: &Operation) -> Self {
        Self {
            id: Some(op.id),
            url: Some(op.url.clone()),
            method: Some(op.method.as_str().to_string()),
            body: op.body.clone(),
            headers: (!op.headers.is_empty()).then(|| op.headers.clone()),
            entity_type: op.entity_type.clone(),
            entity_id: op.entity_id.clone(),
            client_id: Some(op.client_id),
            created_at: Some(op.created_at),
        }
    }
}
