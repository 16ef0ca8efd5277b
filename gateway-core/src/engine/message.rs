//! The wire envelope shared by every endpoint (spec.md §6).
//!
//! Field ordering on the wire is free; the envelope is always
//! `{ type, topic?, channel?, data?, request_id?, timestamp? }`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An inbound frame, decoded but not yet interpreted.
///
/// Decoding failure (not valid JSON, or missing `type`) is itself a
/// `ProtocolError` — see [`crate::engine::base`].
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub request_id: Option<String>,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// An outbound frame. Built with the small helpers below rather than
/// constructed field-by-field, so every send path gets a timestamp and
/// consistent field naming for free.
#[derive(Debug, Clone, Serialize)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ServerMessage {
    fn base(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            channel: None,
            topic: None,
            data: None,
            request_id: None,
            code: None,
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn welcome(connection_id: impl Serialize, capabilities: Value) -> Self {
        let mut m = Self::base("welcome");
        m.data = Some(serde_json::json!({
            "capabilities": capabilities,
            "connectionId": serde_json::to_value(connection_id).unwrap_or(Value::Null),
        }));
        m
    }

    pub fn connection_established(
        connection_id: impl Serialize,
        authenticated: bool,
        user: Option<Value>,
    ) -> Self {
        let mut m = Self::base("connection_established");
        m.data = Some(serde_json::json!({
            "connectionId": serde_json::to_value(connection_id).unwrap_or(Value::Null),
            "authenticated": authenticated,
            "user": user,
        }));
        m
    }

    pub fn subscription_confirmed(channel: impl Into<String>) -> Self {
        let mut m = Self::base("subscription_confirmed");
        m.channel = Some(channel.into());
        m
    }

    pub fn unsubscription_confirmed(channel: impl Into<String>) -> Self {
        let mut m = Self::base("unsubscription_confirmed");
        m.channel = Some(channel.into());
        m
    }

    pub fn heartbeat_ack() -> Self {
        Self::base("heartbeat_ack")
    }

    pub fn error(code: ErrorCode, message: impl Into<String>, request_id: Option<String>) -> Self {
        let mut m = Self::base("error");
        m.code = Some(code.as_str().to_string());
        m.message = Some(message.into());
        m.request_id = request_id;
        m
    }

    /// A domain data frame, e.g. `token_update`, `balance_update`.
    pub fn data_frame(kind: impl Into<String>, channel: impl Into<String>, data: Value) -> Self {
        let mut m = Self::base(kind);
        m.channel = Some(channel.into());
        m.data = Some(data);
        m
    }

    /// A response to an endpoint-specific request (e.g. `get_token`).
    pub fn reply(kind: impl Into<String>, data: Value, request_id: Option<String>) -> Self {
        let mut m = Self::base(kind);
        m.data = Some(data);
        m.request_id = request_id;
        m
    }

    /// Inject the channel name and a timestamp if not already present,
    /// per the broadcast router's contract (spec.md §4.5).
    pub fn with_channel_if_absent(mut self, channel: &str) -> Self {
        if self.channel.is_none() {
            self.channel = Some(channel.to_string());
        }
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Error codes used in `error` frames (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Unauthorized,
    InvalidMessage,
    RateLimitExceeded,
    SubscriptionDenied,
    NotFound,
    ServerError,
    Forbidden,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::InvalidMessage => "invalid_message",
            ErrorCode::RateLimitExceeded => "rate_limit_exceeded",
            ErrorCode::SubscriptionDenied => "subscription_denied",
            ErrorCode::NotFound => "not_found",
            ErrorCode::ServerError => "server_error",
            ErrorCode::Forbidden => "forbidden",
        }
    }
}

/// Close codes used by the engine (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    Normal,
    GoingAway,
    UnsupportedData,
    PolicyViolation,
    InternalError,
    Unauthorized,
    Forbidden,
    InvalidMessage,
    SubscriptionFailure,
    NotFound,
}

impl CloseCode {
    pub fn as_u16(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::UnsupportedData => 1003,
            CloseCode::PolicyViolation => 1008,
            CloseCode::InternalError => 1011,
            CloseCode::Unauthorized => 4001,
            CloseCode::Forbidden => 4003,
            CloseCode::InvalidMessage => 4004,
            CloseCode::SubscriptionFailure => 4022,
            CloseCode::NotFound => 4044,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            CloseCode::Normal => "normal",
            CloseCode::GoingAway => "going_away",
            CloseCode::UnsupportedData => "unsupported_data",
            CloseCode::PolicyViolation => "policy_violation",
            CloseCode::InternalError => "internal_error",
            CloseCode::Unauthorized => "unauthorized",
            CloseCode::Forbidden => "forbidden",
            CloseCode::InvalidMessage => "invalid_message",
            CloseCode::SubscriptionFailure => "subscription_failure",
            CloseCode::NotFound => "not_found",
        }
    }
}
