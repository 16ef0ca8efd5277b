//! Error taxonomy and frame/response conversion
//!
//! Mirrors the propagation policy of the engine: most errors become a
//! structured `error` frame on an otherwise-open connection; a handful
//! carry a close code because they invalidate the session.

use axum::extract::ws::CloseFrame;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::message::{CloseCode, ErrorCode, ServerMessage};

/// Errors surfaced by the connection-and-subscription engine.
///
/// Each variant maps to one of the taxonomy entries in the specification
/// (`ProtocolError`, `AuthError`, `AuthorizationError`, `RateError`,
/// `ResourceError`, `UpstreamError`, `FatalError`).
#[derive(Debug, Error, Clone)]
pub enum Error {
    /// Malformed frame, oversize payload, unknown message type.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Missing/invalid/expired token, unknown principal.
    #[error("auth error: {0}")]
    Auth(String),

    /// Access to a channel or command denied.
    #[error("authorization error: {0}")]
    Authorization(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded")]
    RateLimited,

    /// Target not found (token/service/wallet/channel).
    #[error("not found: {0}")]
    NotFound(String),

    /// Backend service failed.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Handler panic/exception or transport write failure.
    #[error("fatal error: {0}")]
    Fatal(String),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The structured `error` frame code, per spec.md §6.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Protocol(_) => ErrorCode::InvalidMessage,
            Error::Auth(_) => ErrorCode::Unauthorized,
            Error::Authorization(_) => ErrorCode::SubscriptionDenied,
            Error::RateLimited => ErrorCode::RateLimitExceeded,
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::Upstream(_) => ErrorCode::ServerError,
            Error::Fatal(_) => ErrorCode::ServerError,
            Error::Config(_) => ErrorCode::ServerError,
        }
    }

    /// Whether this error closes the connection, and with which code.
    ///
    /// `None` means the connection stays open after the error frame is
    /// sent (`AuthorizationError`, `ResourceError`, `UpstreamError`).
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Error::Protocol(_) => Some(CloseCode::UnsupportedData),
            Error::Auth(_) => Some(CloseCode::Unauthorized),
            Error::Authorization(_) => None,
            Error::RateLimited => Some(CloseCode::PolicyViolation),
            Error::NotFound(_) => None,
            Error::Upstream(_) => None,
            Error::Fatal(_) => Some(CloseCode::InternalError),
            Error::Config(_) => Some(CloseCode::InternalError),
        }
    }

    /// Render this error as the structured frame the client receives.
    ///
    /// User-visible failures are always a single error frame, never a
    /// bare transport abort (spec.md §7).
    pub fn to_frame(&self, request_id: Option<String>) -> ServerMessage {
        ServerMessage::error(self.code(), self.to_string(), request_id)
    }

    /// Render the close frame to send immediately before closing, if any.
    pub fn to_close_frame(&self) -> Option<CloseFrame> {
        self.close_code().map(|code| CloseFrame {
            code: code.as_u16(),
            reason: code.reason().into(),
        })
    }
}

/// Error payload returned from config loading, kept separate from the
/// wire-facing [`Error`] so the binary's `main` can print it plainly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigError {
    pub message: String,
}

impl From<figment::Error> for Error {
    fn from(e: figment::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        Error::Auth(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Protocol(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_closes_unsupported_data() {
        let err = Error::Protocol("bad json".into());
        assert_eq!(err.close_code(), Some(CloseCode::UnsupportedData));
        assert_eq!(err.code(), ErrorCode::InvalidMessage);
    }

    #[test]
    fn authorization_error_does_not_close() {
        let err = Error::Authorization("no access".into());
        assert_eq!(err.close_code(), None);
    }

    #[test]
    fn rate_limited_closes_policy_violation() {
        let err = Error::RateLimited;
        assert_eq!(err.close_code(), Some(CloseCode::PolicyViolation));
    }
}
