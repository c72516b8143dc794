//! Error codes surfaced in `err.payload.code` and the handler error type.

// ── Error code constants ────────────────────────────────────────────

/// Malformed request or missing required field.
pub const BAD_REQUEST: &str = "BAD_REQUEST";
/// No registered module claims the command kind.
pub const UNKNOWN_KIND: &str = "UNKNOWN_KIND";
/// A module claimed the kind but rejects it with no specific reason.
pub const UNKNOWN: &str = "UNKNOWN";
/// Referenced player is not online.
pub const NOT_ONLINE: &str = "NOT_ONLINE";
/// Referenced entity, session or menu does not exist.
pub const NOT_FOUND: &str = "NOT_FOUND";
/// Invalid inventory size.
pub const BAD_SIZE: &str = "BAD_SIZE";
/// Invalid inventory slot.
pub const BAD_SLOT: &str = "BAD_SLOT";
/// Item could not be decoded.
pub const BAD_ITEM: &str = "BAD_ITEM";
/// Request does not match the current state of the referenced object.
pub const MISMATCH: &str = "MISMATCH";
/// Unexpected fault inside a handler, caught at the boundary.
pub const EX: &str = "EX";
/// Handshake credential did not match the configured shared secret.
pub const UNAUTHORIZED: &str = "UNAUTHORIZED";

/// Error a handler module completes a request with.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OpError {
    /// Required field missing or of the wrong type.
    #[error("{0}")]
    BadRequest(String),

    /// Referenced player is not online.
    #[error("{0}")]
    NotOnline(String),

    /// Referenced object not found.
    #[error("{0}")]
    NotFound(String),

    /// Kind claimed but not understood.
    #[error("{0}")]
    Unknown(String),

    /// Unexpected runtime fault.
    #[error("{0}")]
    Exception(String),

    /// Domain-specific error with an arbitrary code.
    #[error("{message}")]
    Custom {
        /// Machine-readable code.
        code: String,
        /// Human-readable message.
        message: String,
    },
}

impl OpError {
    /// Shorthand for a [`OpError::Custom`] with the given code.
    pub fn custom(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Custom {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &str {
        match self {
            Self::BadRequest(_) => BAD_REQUEST,
            Self::NotOnline(_) => NOT_ONLINE,
            Self::NotFound(_) => NOT_FOUND,
            Self::Unknown(_) => UNKNOWN,
            Self::Exception(_) => EX,
            Self::Custom { code, .. } => code,
        }
    }
}
