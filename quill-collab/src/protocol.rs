//! JSON wire protocol: envelope peek plus kind-specific validation.
//!
//! Every frame is a UTF-8 JSON object with a top-level `"type"`. The hub
//! peeks the type first and hands the raw bytes to the matching validator,
//! so a frame is fully parsed at most twice and oversized frames are
//! refused before any allocation-heavy work.
//!
//! Broadcast kinds (`insert`, `delete`, `cursor`, `sync`) fan out to the
//! sender's co-editors; `join` is forwarded to one peer for catch-up;
//! `sync_op`/`sync_done` are directed at a single target site. Undo is an
//! ordinary insert/delete whose `inverseOpId` names the op being reversed;
//! the server does not treat it specially.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::validate::{self, DocIdError};

/// Maximum frame size in bytes. Larger frames are refused.
pub const MAX_FRAME_BYTES: usize = 1 << 20;

pub const TYPE_INSERT: &str = "insert";
pub const TYPE_DELETE: &str = "delete";
pub const TYPE_CURSOR: &str = "cursor";
pub const TYPE_SYNC: &str = "sync";
pub const TYPE_JOIN: &str = "join";
pub const TYPE_SYNC_OP: &str = "sync_op";
pub const TYPE_SYNC_DONE: &str = "sync_done";
pub const TYPE_PEER_JOINED: &str = "peer_joined";

/// Kinds accepted by [`validate_operation`].
pub fn is_operation_kind(kind: &str) -> bool {
    matches!(
        kind,
        TYPE_INSERT | TYPE_DELETE | TYPE_CURSOR | TYPE_SYNC | TYPE_JOIN
    )
}

/// Kinds routed to exactly one peer.
pub fn is_targeted_kind(kind: &str) -> bool {
    matches!(kind, TYPE_SYNC_OP | TYPE_SYNC_DONE)
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame exceeds {MAX_FRAME_BYTES} bytes")]
    FrameTooLarge,
    #[error("invalid frame json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing message type")]
    MissingKind,
    #[error("invalid message type {0:?}")]
    InvalidKind(String),
    #[error(transparent)]
    DocId(#[from] DocIdError),
    #[error("missing siteId")]
    MissingSiteId,
    #[error("missing target")]
    MissingTarget,
}

/// Operation identity: `counter` is locally monotone per `site`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpId {
    #[serde(default)]
    pub site: String,
    #[serde(default)]
    pub counter: i64,
}

/// A broadcast edit: insert, delete, cursor move or client sync marker.
///
/// The payload is opaque to the server; only envelope fields are validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub doc_id: String,
    #[serde(default)]
    pub site_id: String,
    #[serde(default)]
    pub op_id: OpId,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse_op_id: Option<OpId>,
}

/// A late joiner announcing itself. `known_clock` is the client's catch-up
/// watermark; the server relays it untouched to the selected peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinMessage {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub doc_id: String,
    #[serde(default)]
    pub site_id: String,
    #[serde(default)]
    pub known_clock: i64,
}

/// Server-originated membership notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerJoined {
    #[serde(rename = "type")]
    pub kind: String,
    pub doc_id: String,
    pub site_id: String,
}

impl PeerJoined {
    pub fn new(doc_id: impl Into<String>, site_id: impl Into<String>) -> Self {
        PeerJoined {
            kind: TYPE_PEER_JOINED.to_string(),
            doc_id: doc_id.into(),
            site_id: site_id.into(),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Deserialize)]
struct TypeProbe {
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(rename = "docId", default)]
    doc_id: String,
    #[serde(default)]
    target: String,
}

fn check_size(raw: &str) -> Result<(), ProtocolError> {
    if raw.len() > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge);
    }
    Ok(())
}

/// Peeks the top-level `"type"` without validating the rest of the frame.
pub fn parse_message_type(raw: &str) -> Result<String, ProtocolError> {
    check_size(raw)?;
    let probe: TypeProbe = serde_json::from_str(raw)?;
    probe.kind.ok_or(ProtocolError::MissingKind)
}

/// Validates a broadcast operation envelope.
pub fn validate_operation(raw: &str) -> Result<Operation, ProtocolError> {
    check_size(raw)?;
    let op: Operation = serde_json::from_str(raw)?;
    if !is_operation_kind(&op.kind) {
        return Err(ProtocolError::InvalidKind(op.kind));
    }
    validate::doc_id(&op.doc_id)?;
    if op.site_id.is_empty() {
        return Err(ProtocolError::MissingSiteId);
    }
    Ok(op)
}

/// Validates a join announcement.
pub fn validate_join(raw: &str) -> Result<JoinMessage, ProtocolError> {
    check_size(raw)?;
    let join: JoinMessage = serde_json::from_str(raw)?;
    if join.kind != TYPE_JOIN {
        return Err(ProtocolError::InvalidKind(join.kind));
    }
    validate::doc_id(&join.doc_id)?;
    if join.site_id.is_empty() {
        return Err(ProtocolError::MissingSiteId);
    }
    Ok(join)
}

/// Validates a targeted frame and returns `(doc_id, target)`.
pub fn parse_targeted(raw: &str) -> Result<(String, String), ProtocolError> {
    check_size(raw)?;
    let env: Envelope = serde_json::from_str(raw)?;
    let kind = env.kind.ok_or(ProtocolError::MissingKind)?;
    if !is_targeted_kind(&kind) {
        return Err(ProtocolError::InvalidKind(kind));
    }
    validate::doc_id(&env.doc_id)?;
    if env.target.is_empty() {
        return Err(ProtocolError::MissingTarget);
    }
    Ok((env.doc_id, env.target))
}
