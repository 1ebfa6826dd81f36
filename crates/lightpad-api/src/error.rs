use thiserror::Error;

// ── Authentication ──────────────────────────────────────────────────

/// Failure to obtain a house access token from the cloud service.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The cloud rejected the email/password pair.
    #[error("Invalid credentials: {message}")]
    InvalidCredentials { message: String },

    /// The cloud endpoint could not be reached or answered with a server error.
    #[error("House service unavailable: {reason}")]
    ServiceUnavailable { reason: String },

    /// The account has no house with the requested id (or no house at all).
    #[error("House not found: {house_id}")]
    HouseNotFound { house_id: String },

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// The configured cloud URL could not be joined with an endpoint path.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        Self::ServiceUnavailable {
            reason: err.to_string(),
        }
    }
}

// ── Device transport ────────────────────────────────────────────────

/// Failure to establish an authenticated connection to a Lightpad.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// TCP connect failed (refused, unroutable, reset during handshake).
    #[error("Lightpad at {addr} unreachable: {reason}")]
    Unreachable { addr: String, reason: String },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The device refused the house access token, or the session had
    /// already expired before any I/O was attempted.
    #[error("House access token rejected: {reason}")]
    AuthRejected { reason: String },

    /// Connect or handshake did not finish in time.
    #[error("Connection timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl ConnectError {
    /// Returns `true` if refreshing the session might resolve this error.
    pub fn is_auth_rejected(&self) -> bool {
        matches!(self, Self::AuthRejected { .. })
    }

    /// Returns `true` if this is a transient error worth retrying later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable { .. } | Self::Timeout { .. })
    }
}

// ── Commands ────────────────────────────────────────────────────────

/// Failure of a single command round trip.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Rejected locally before any I/O.
    #[error("Invalid argument `{field}`: {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    /// No reply arrived within the command timeout.
    #[error("No reply within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The connection closed before the reply arrived.
    #[error("Connection closed")]
    TransportClosed,

    /// The session behind the connection expired; nothing was sent.
    #[error("Session expired")]
    SessionExpired,

    /// The device answered with a non-success status.
    #[error("Command rejected (status {status}): {message}")]
    Rejected { status: u16, message: String },

    /// The reply body did not have the expected shape.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl CommandError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            reason: reason.into(),
        }
    }
}

/// Terminal item on a connection's event lane: the socket is gone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Connection lost: {reason}")]
pub struct ConnectionLost {
    pub reason: String,
}

// ── Frame decoding ──────────────────────────────────────────────────

/// Frame-level decode failure. Fatal for the decoder that raised it and
/// only ever observed as the reason a connection was lost; payload
/// problems inside a well-framed message never produce one.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame body of {len} bytes exceeds limit of {max}")]
    Oversized { len: usize, max: usize },

    #[error("stream ended inside a frame ({buffered} bytes buffered)")]
    TruncatedFrame { buffered: usize },

    #[error("decoder already failed")]
    Poisoned,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_error_predicates() {
        let rejected = ConnectError::AuthRejected {
            reason: "bad token".into(),
        };
        assert!(rejected.is_auth_rejected());
        assert!(!rejected.is_transient());

        let timeout = ConnectError::Timeout { timeout_ms: 10 };
        assert!(timeout.is_transient());
        assert!(!timeout.is_auth_rejected());

        assert!(!ConnectError::Tls("bad cert".into()).is_transient());
    }

    #[test]
    fn command_error_messages() {
        let err = CommandError::invalid("level", "256 is outside 0..=255");
        assert_eq!(
            err.to_string(),
            "Invalid argument `level`: 256 is outside 0..=255"
        );
        assert_eq!(
            CommandError::Timeout { timeout_ms: 5000 }.to_string(),
            "No reply within 5000ms"
        );
    }
}
