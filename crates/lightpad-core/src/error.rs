// ── Core error types ──
//
// `SubscriptionError` is what a subscription stream yields. `CoreError`
// is the user-facing error of the client facade: callers see what went
// wrong in Lightpad terms, not which layer raised it.

use lightpad_api::{AuthError, CommandError, ConnectError, ConnectionLost};
use thiserror::Error;

/// Failure to start, or terminal failure of, a subscription.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// Connecting failed, including the single retry after re-authentication.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// The session could not be refreshed after the device rejected it.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The connection's event lane is already owned by another subscription.
    #[error("Connection already has an active subscription")]
    AlreadySubscribed,

    /// The socket ended mid-stream. Always the last item.
    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },
}

impl From<ConnectionLost> for SubscriptionError {
    fn from(lost: ConnectionLost) -> Self {
        Self::ConnectionLost {
            reason: lost.reason,
        }
    }
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Session ──────────────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("House service unavailable: {reason}")]
    ServiceUnavailable { reason: String },

    #[error("House not found: {house_id}")]
    HouseNotFound { house_id: String },

    // ── Device ───────────────────────────────────────────────────────
    #[error("Cannot connect to lightpad: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Lightpad rejected the house access token: {reason}")]
    AccessDenied { reason: String },

    #[error("Timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Lightpad disconnected: {reason}")]
    Disconnected { reason: String },

    // ── Commands ─────────────────────────────────────────────────────
    #[error("Invalid argument `{field}`: {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    #[error("Command rejected (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Connection already has an active subscription")]
    AlreadySubscribed,

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal ─────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from api-layer errors ─────────────────────────────────

impl From<AuthError> for CoreError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials { message } => Self::AuthenticationFailed { message },
            AuthError::ServiceUnavailable { reason } => Self::ServiceUnavailable { reason },
            AuthError::HouseNotFound { house_id } => Self::HouseNotFound { house_id },
            AuthError::Deserialization { message, body: _ } => {
                Self::Internal(format!("Unexpected house service response: {message}"))
            }
            AuthError::InvalidUrl(e) => Self::Config {
                message: format!("Invalid cloud URL: {e}"),
            },
        }
    }
}

impl From<ConnectError> for CoreError {
    fn from(err: ConnectError) -> Self {
        match err {
            ConnectError::Unreachable { addr, reason } => Self::ConnectionFailed {
                reason: format!("{addr}: {reason}"),
            },
            ConnectError::Tls(msg) => Self::ConnectionFailed {
                reason: format!("TLS error: {msg}"),
            },
            ConnectError::AuthRejected { reason } => Self::AccessDenied { reason },
            ConnectError::Timeout { timeout_ms } => Self::Timeout { timeout_ms },
        }
    }
}

impl From<CommandError> for CoreError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::InvalidArgument { field, reason } => {
                Self::InvalidArgument { field, reason }
            }
            CommandError::Timeout { timeout_ms } => Self::Timeout { timeout_ms },
            CommandError::TransportClosed => Self::Disconnected {
                reason: "connection closed before the reply arrived".into(),
            },
            CommandError::Rejected { status, message } => Self::Rejected { status, message },
            CommandError::SessionExpired => Self::AccessDenied {
                reason: "session expired".into(),
            },
            CommandError::Deserialization { message, body: _ } => {
                Self::Internal(format!("Unexpected lightpad reply: {message}"))
            }
        }
    }
}

impl From<SubscriptionError> for CoreError {
    fn from(err: SubscriptionError) -> Self {
        match err {
            SubscriptionError::Connect(e) => e.into(),
            SubscriptionError::Auth(e) => e.into(),
            SubscriptionError::AlreadySubscribed => Self::AlreadySubscribed,
            SubscriptionError::ConnectionLost { reason } => Self::Disconnected { reason },
        }
    }
}
