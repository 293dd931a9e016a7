use thiserror::Error;

// ---------------------------------------------------------------------------
// ExternalErrorKind
// ---------------------------------------------------------------------------

/// Classification of a failure reported by an external provider
/// (LLM, connector, notification transport).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalErrorKind {
    Timeout,
    Transport,
    Server,
    RateLimited,
    Auth,
    Quota,
    Validation,
}

impl ExternalErrorKind {
    /// True when the provider itself is unhealthy, as opposed to the caller
    /// sending something the provider refused.
    pub fn is_system(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Transport | Self::Server | Self::RateLimited
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::Server => "server",
            Self::RateLimited => "rate_limited",
            Self::Auth => "auth",
            Self::Quota => "quota",
            Self::Validation => "validation",
        }
    }
}

impl std::fmt::Display for ExternalErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ErrorKind: taxonomy bucket used for propagation decisions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InputValidation,
    PolicyDenied,
    Conflict,
    NotFound,
    ExternalTransient,
    CircuitOpen,
    OrgMismatch,
    Internal,
}

// ---------------------------------------------------------------------------
// GovernError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum GovernError {
    #[error("not initialized: run 'govern init'")]
    NotInitialized,

    #[error("invalid decision input: {0}")]
    InvalidDecisionInput(String),

    #[error("invalid decision type '{0}': must be APPROVED, REJECTED, or MODIFIED")]
    InvalidDecisionType(String),

    #[error("invalid policy level '{0}': must be ADVISORY, ASSISTED, PROACTIVE, or AUTOPILOT")]
    InvalidPolicyLevel(String),

    #[error("unknown action type: {0}")]
    InvalidActionType(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("field '{field}' may not be modified on {action_type} proposals")]
    ModifiedFieldNotAllowed { action_type: String, field: String },

    #[error("policy denied: {reason}")]
    PolicyDenied { reason: String },

    #[error("proposal {0} already has a decision")]
    DecisionConflict(String),

    #[error("assignment conflict: {0}")]
    AssignmentConflict(String),

    #[error("invalid transition for {entity} from {from} to {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },

    #[error("organization mismatch: expected {expected}, found {actual}")]
    OrgMismatch { expected: String, actual: String },

    #[error("proposal not found: {0}")]
    ProposalNotFound(String),

    #[error("decision not found: {0}")]
    DecisionNotFound(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("assignment not found: {0}")]
    AssignmentNotFound(String),

    #[error("outbox message not found: {0}")]
    OutboxMessageNotFound(String),

    #[error("circuit '{resource}' is open; retry in {retry_after_ms}ms")]
    CircuitOpen { resource: String, retry_after_ms: u64 },

    #[error("external {kind} error: {message}")]
    External {
        kind: ExternalErrorKind,
        message: String,
    },

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl GovernError {
    pub fn external(kind: ExternalErrorKind, message: impl Into<String>) -> Self {
        Self::External {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidDecisionInput(_)
            | Self::InvalidDecisionType(_)
            | Self::InvalidPolicyLevel(_)
            | Self::InvalidActionType(_)
            | Self::InvalidInput(_)
            | Self::ModifiedFieldNotAllowed { .. }
            | Self::InvalidTransition { .. } => ErrorKind::InputValidation,
            Self::PolicyDenied { .. } => ErrorKind::PolicyDenied,
            Self::DecisionConflict(_) | Self::AssignmentConflict(_) => ErrorKind::Conflict,
            Self::ProposalNotFound(_)
            | Self::DecisionNotFound(_)
            | Self::JobNotFound(_)
            | Self::AssignmentNotFound(_)
            | Self::OutboxMessageNotFound(_) => ErrorKind::NotFound,
            Self::OrgMismatch { .. } => ErrorKind::OrgMismatch,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::External { kind, .. } if kind.is_system() => ErrorKind::ExternalTransient,
            Self::External { .. } => ErrorKind::InputValidation,
            Self::NotInitialized
            | Self::Store(_)
            | Self::Io(_)
            | Self::Yaml(_)
            | Self::Json(_) => ErrorKind::Internal,
        }
    }

    /// Whether the job engine should schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ExternalTransient | ErrorKind::CircuitOpen
        )
    }
}

/// Map any redb error into [`GovernError::Store`].
pub(crate) fn db_err(e: impl std::fmt::Display) -> GovernError {
    GovernError::Store(e.to_string())
}

pub type Result<T> = std::result::Result<T, GovernError>;
