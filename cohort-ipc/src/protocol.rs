//! IPC protocol definitions and message types
//!
//! A controller sends [`RequestMessage`]s to an engine server and receives
//! [`EngineReply`] messages back, each wrapped in a [`MessageEnvelope`].
//! Every request carries a correlation id that its response echoes, and a
//! response is either `ok` with a payload or `err` with an [`EngineError`],
//! so success and failure are distinguishable on the wire.

use chrono::{DateTime, Utc};
use cohort_core::{Codec, EngineError, EngineId, ExecuteResult, ResultIndex, Serialized};
use cohort_engine::Bindings;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use uuid::Uuid;

/// IPC protocol version for compatibility checking
pub const IPC_PROTOCOL_VERSION: u32 = 1;

/// Values in codec form, keyed by name
pub type SerializedBindings = BTreeMap<String, Serialized>;

/// Encode every binding, failing on the first value the codec rejects
pub fn encode_bindings(
    codec: &dyn Codec,
    bindings: &Bindings,
) -> Result<SerializedBindings, EngineError> {
    bindings
        .iter()
        .map(|(name, value)| Ok((name.clone(), codec.serialize(value)?)))
        .collect()
}

pub fn decode_bindings(
    codec: &dyn Codec,
    bindings: &SerializedBindings,
) -> Result<Bindings, EngineError> {
    bindings
        .iter()
        .map(|(name, data)| Ok((name.clone(), codec.deserialize(data)?)))
        .collect()
}

pub fn encode_values(
    codec: &dyn Codec,
    values: &[JsonValue],
) -> Result<Vec<Serialized>, EngineError> {
    values.iter().map(|value| codec.serialize(value)).collect()
}

pub fn decode_values(
    codec: &dyn Codec,
    values: &[Serialized],
) -> Result<Vec<JsonValue>, EngineError> {
    values.iter().map(|data| codec.deserialize(data)).collect()
}

/// Engine operations that can cross the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum EngineRequest {
    SetId { id: EngineId },
    Execute { source: String },
    Push { bindings: SerializedBindings },
    Pull { names: Vec<String> },
    GetResult { index: ResultIndex },
    Reset,
    Kill,
    Keys,
    GetProperties { names: Option<Vec<String>> },
    SetProperties { properties: SerializedBindings },
    HasProperties { names: Vec<String> },
    DelProperties { names: Vec<String> },
    ClearProperties,
    /// Health check
    Ping,
    /// Stop serving after replying
    Shutdown,
}

impl EngineRequest {
    pub fn method(&self) -> &'static str {
        match self {
            EngineRequest::SetId { .. } => "set_id",
            EngineRequest::Execute { .. } => "execute",
            EngineRequest::Push { .. } => "push",
            EngineRequest::Pull { .. } => "pull",
            EngineRequest::GetResult { .. } => "get_result",
            EngineRequest::Reset => "reset",
            EngineRequest::Kill => "kill",
            EngineRequest::Keys => "keys",
            EngineRequest::GetProperties { .. } => "get_properties",
            EngineRequest::SetProperties { .. } => "set_properties",
            EngineRequest::HasProperties { .. } => "has_properties",
            EngineRequest::DelProperties { .. } => "del_properties",
            EngineRequest::ClearProperties => "clear_properties",
            EngineRequest::Ping => "ping",
            EngineRequest::Shutdown => "shutdown",
        }
    }
}

/// A request with its correlation id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
    pub correlation_id: Uuid,
    pub request: EngineRequest,
}

impl RequestMessage {
    pub fn new(request: EngineRequest) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            request,
        }
    }
}

/// Successful reply payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ReplyPayload {
    Done,
    Executed(ExecuteResult),
    Values(Vec<Serialized>),
    Keys(Vec<String>),
    Properties(SerializedBindings),
    Flags(Vec<bool>),
    Pong { engine_id: EngineId },
}

impl ReplyPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            ReplyPayload::Done => "done",
            ReplyPayload::Executed(_) => "executed",
            ReplyPayload::Values(_) => "values",
            ReplyPayload::Keys(_) => "keys",
            ReplyPayload::Properties(_) => "properties",
            ReplyPayload::Flags(_) => "flags",
            ReplyPayload::Pong { .. } => "pong",
        }
    }
}

/// Outcome of one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum Outcome {
    Ok(ReplyPayload),
    Err(EngineError),
}

impl From<Result<ReplyPayload, EngineError>> for Outcome {
    fn from(result: Result<ReplyPayload, EngineError>) -> Self {
        match result {
            Ok(payload) => Outcome::Ok(payload),
            Err(err) => Outcome::Err(err),
        }
    }
}

impl From<Outcome> for Result<ReplyPayload, EngineError> {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Ok(payload) => Ok(payload),
            Outcome::Err(err) => Err(err),
        }
    }
}

/// Messages sent from an engine server to the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineReply {
    /// Engine is ready for work
    Ready { engine_id: EngineId, pid: u32 },

    /// Response to one request
    Response { correlation_id: Uuid, outcome: Outcome },
}

/// Message envelope for all IPC communications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub protocol_version: u32,
    pub timestamp: DateTime<Utc>,
    pub message: T,
}

impl<T> MessageEnvelope<T> {
    /// Create a new message envelope
    pub fn new(message: T) -> Self {
        Self {
            protocol_version: IPC_PROTOCOL_VERSION,
            timestamp: Utc::now(),
            message,
        }
    }

    /// Check if protocol version is compatible
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == IPC_PROTOCOL_VERSION
    }
}
