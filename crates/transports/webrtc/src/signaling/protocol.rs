//! Signaling message types
//!
//! Every message travels as one JSON object `{"event": <name>, "data": {...}}`.

use crate::peer::IceCandidate;
use crate::Result;
use serde::{Deserialize, Serialize};

/// SDP payload of an `offer` or `answer`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: "offer".to_string(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: "answer".to_string(),
        }
    }
}

/// Body of `start_live_session` and `join_live_session`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Body of `leave_session`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub session_id: String,
}

/// Messages a client sends to the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
    StartLiveSession(SessionRequest),
    JoinLiveSession(SessionRequest),
    LeaveSession(LeaveRequest),
}

impl ClientMessage {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Event name, for logging
    pub fn event(&self) -> &'static str {
        match self {
            ClientMessage::Offer(_) => "offer",
            ClientMessage::Answer(_) => "answer",
            ClientMessage::IceCandidate(_) => "ice_candidate",
            ClientMessage::StartLiveSession(_) => "start_live_session",
            ClientMessage::JoinLiveSession(_) => "join_live_session",
            ClientMessage::LeaveSession(_) => "leave_session",
        }
    }
}

/// Messages the coordinator sends to one client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
    LiveSessionStarted { session_id: String, status: String },
    LiveSessionJoined { session_id: String, teacher_id: String },
    SessionLeft { session_id: String, status: String },
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn event(&self) -> &'static str {
        match self {
            ServerMessage::Offer(_) => "offer",
            ServerMessage::Answer(_) => "answer",
            ServerMessage::IceCandidate(_) => "ice_candidate",
            ServerMessage::LiveSessionStarted { .. } => "live_session_started",
            ServerMessage::LiveSessionJoined { .. } => "live_session_joined",
            ServerMessage::SessionLeft { .. } => "session_left",
            ServerMessage::Error { .. } => "error",
        }
    }
}
