//! Error types for the team gateway.
//!
//! All errors are strongly typed using thiserror. Validation failures are
//! resolved locally and never reach the engine; engine failures cross the
//! gateway verbatim unless a more specific exportable variant exists.

use thiserror::Error;

/// Validation errors raised before any engine interaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("only one of {fields:?} may be set at a time")]
    MutuallyExclusiveFields {
        fields: Vec<&'static str>,
    },

    #[error("attempted to add 0 users to a team")]
    EmptyBatch,

    #[error("required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        field: String,
        max_length: usize,
    },

    #[error("invalid value for '{field}': {reason}")]
    InvalidField {
        field: String,
        reason: String,
    },

    #[error("invalid team name '{name}': {reason}")]
    InvalidTeamName {
        name: String,
        reason: String,
    },

    #[error("invalid assertion '{value}': {reason}")]
    InvalidAssertion {
        value: String,
        reason: String,
    },

    #[error("invalid duration '{value}': {reason}")]
    InvalidDuration {
        value: String,
        reason: String,
    },
}

/// A single failed identity check inside an identify summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifyProblem {
    /// The assertion that failed to verify.
    pub assertion: String,
    /// User-facing remediation detail.
    pub detail: String,
}

/// Discriminant for [`EngineError`], used to decide what crosses the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineErrorKind {
    AddMembers,
    IdentifySummary,
    ContactRestricted,
    PermissionDenied,
    UnknownIdentity,
    NotFound,
    AlreadyExists,
    Unavailable,
    Other,
}

/// Errors reported by the team engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Bulk add failed; wraps the underlying cause.
    #[error("failed to add members: {cause}")]
    AddMembers {
        cause: Box<EngineError>,
    },

    /// Identity verification failed for one or more assertions. Carries
    /// remediation detail the client presents directly.
    #[error("identify failed for {} assertion(s)", problems.len())]
    IdentifySummary {
        problems: Vec<IdentifyProblem>,
    },

    /// Recipients could not be added because of their contact settings.
    #[error("contact settings prevent adding: {}", assertions.join(", "))]
    ContactRestricted {
        assertions: Vec<String>,
    },

    #[error("permission denied: {message}")]
    PermissionDenied {
        message: String,
    },

    #[error("unknown identity: {assertion}")]
    UnknownIdentity {
        assertion: String,
    },

    #[error("not found: {what}")]
    NotFound {
        what: String,
    },

    #[error("already exists: {what}")]
    AlreadyExists {
        what: String,
    },

    #[error("engine unavailable: {message}")]
    Unavailable {
        message: String,
    },

    #[error("{message}")]
    Other {
        message: String,
    },
}

impl EngineError {
    /// Wraps a bulk-add failure cause.
    #[must_use]
    pub fn add_members(cause: EngineError) -> Self {
        Self::AddMembers {
            cause: Box::new(cause),
        }
    }

    /// Returns the discriminant of this error.
    #[must_use]
    pub const fn kind(&self) -> EngineErrorKind {
        match self {
            Self::AddMembers { .. } => EngineErrorKind::AddMembers,
            Self::IdentifySummary { .. } => EngineErrorKind::IdentifySummary,
            Self::ContactRestricted { .. } => EngineErrorKind::ContactRestricted,
            Self::PermissionDenied { .. } => EngineErrorKind::PermissionDenied,
            Self::UnknownIdentity { .. } => EngineErrorKind::UnknownIdentity,
            Self::NotFound { .. } => EngineErrorKind::NotFound,
            Self::AlreadyExists { .. } => EngineErrorKind::AlreadyExists,
            Self::Unavailable { .. } => EngineErrorKind::Unavailable,
            Self::Other { .. } => EngineErrorKind::Other,
        }
    }

    /// Returns the wrapped cause, if any.
    #[must_use]
    pub fn wrapped(&self) -> Option<&EngineError> {
        match self {
            Self::AddMembers { cause } => Some(cause),
            _ => None,
        }
    }

    /// Unwraps an identify summary out of a bulk-add wrapper.
    ///
    /// Only that one variant is exportable on its own; every other error,
    /// wrapped or not, is returned unchanged.
    #[must_use]
    pub fn into_exportable(self) -> Self {
        match self {
            Self::AddMembers { cause } if cause.kind() == EngineErrorKind::IdentifySummary => *cause,
            other => other,
        }
    }
}

/// Errors raised by a chat notifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    #[error("delivery to {recipient} failed: {reason}")]
    Delivery {
        recipient: String,
        reason: String,
    },

    #[error("chat service unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by a cache store backend.
#[derive(Debug, Error)]
pub enum CacheStoreError {
    #[error("cache backend error: {0}")]
    BackendError(String),

    #[error("cache serialization error: {0}")]
    SerializationError(String),
}

/// Errors raised while loading gateway configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Top-level error type for gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("login required")]
    AuthenticationRequired,

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("cache loader for {operation} failed: {source}")]
    CacheLoader {
        operation: &'static str,
        #[source]
        source: EngineError,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: EngineError,
    },

    #[error("internal error: {message}")]
    Internal {
        message: String,
    },
}

impl GatewayError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an engine error.
    #[must_use]
    pub const fn is_engine(&self) -> bool {
        matches!(self, Self::Engine(_))
    }

    /// Returns the engine error carried by this error, if any.
    #[must_use]
    pub const fn engine_error(&self) -> Option<&EngineError> {
        match self {
            Self::Engine(e) | Self::CacheLoader { source: e, .. } | Self::Exhausted { last: e, .. } => Some(e),
            _ => None,
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Engine(e) | Self::CacheLoader { source: e, .. } => e.kind() == EngineErrorKind::Unavailable,
            Self::AuthenticationRequired
            | Self::Validation(_)
            | Self::Cancelled
            | Self::Exhausted { .. }
            | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for engine calls.
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
