//! Engine-wide error taxonomy.
//!
//! Every dispatch and chain operation resolves to `Result<_, EngineError>`;
//! nothing throws across the dispatch boundary. Variants mirror the tags the
//! audit sink and the result summarizer consume, so `kind()` is stable.

use serde_json::Value;

/// Discriminated error union for dispatch, chain, and analysis operations.
///
/// Each variant carries a human-readable message plus the structured fields
/// downstream consumers need (HTTP status bucket, entity, id, field).
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// Access token missing, unverified, or from the wrong source.
    #[error("authorization failed: {message}")]
    Authorization {
        /// Why the token was rejected.
        message: String,
    },

    /// The requested tool is not present in the registry.
    #[error("unknown tool: {tool}")]
    UnknownTool {
        /// The tool name that failed lookup.
        tool: String,
    },

    /// Argument validation failed before the tool could run.
    #[error("validation failed: {message}")]
    Validation {
        /// What was wrong with the arguments.
        message: String,
        /// The offending field, when a single field is at fault.
        field: Option<String>,
    },

    /// Caller's role is not in the policy's required-role set.
    #[error("insufficient permissions: {message}")]
    InsufficientPermissions {
        /// Which role was required and which was presented.
        message: String,
    },

    /// Per-minute rate limit for the tool class was exhausted.
    #[error("rate limit exceeded: {message}")]
    RateLimitExceeded {
        /// Limit description (class and ceiling).
        message: String,
        /// Seconds until the counter window rolls over.
        retry_after_secs: u64,
    },

    /// A delete-class tool was invoked without `confirmed` or `force`.
    #[error("confirmation required: {message}")]
    ConfirmationRequired {
        /// Which tool demanded confirmation.
        message: String,
        /// The tool name, for callers that re-prompt.
        tool: String,
    },

    /// The executor call failed, timed out, or panicked.
    #[error("execution error: {message}")]
    Execution {
        /// Failure description.
        message: String,
        /// The operation (function name) that was running, when known.
        operation: Option<String>,
    },

    /// The backend reported that the target record does not exist.
    #[error("not found: {message}")]
    NotFound {
        /// Backend-provided description.
        message: String,
        /// Entity type, when the backend identified one.
        entity: Option<String>,
        /// Record id, when the backend identified one.
        id: Option<String>,
    },

    /// The backend refused the operation for this principal.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Backend-provided description.
        message: String,
    },

    /// Transport-level failure reaching the backend.
    #[error("network error: {message}")]
    Network {
        /// Connectivity failure description.
        message: String,
    },

    /// Persistence-layer failure reported by the backend.
    #[error("database error: {message}")]
    Database {
        /// Backend-provided description.
        message: String,
    },

    /// Non-2xx response from the backend API.
    #[error("api error: {message}")]
    Api {
        /// Backend-provided description.
        message: String,
        /// HTTP status code, when the failure carried one.
        code: Option<u16>,
    },

    /// Chain pre-flight validation rejected the invocation.
    #[error("chain validation failed for '{chain}': {}", reasons.join("; "))]
    ChainValidation {
        /// The chain that failed validation.
        chain: String,
        /// Every concrete validation failure found.
        reasons: Vec<String>,
    },

    /// A dynamic chain generated zero steps.
    #[error("chain '{chain}' produced no steps")]
    EmptyChain {
        /// The chain whose generator came back empty.
        chain: String,
    },

    /// A step's argument template threw while evaluating.
    #[error("argument generation failed for step '{step}': {message}")]
    ArgumentGeneration {
        /// The step whose template failed.
        step: String,
        /// Template failure description.
        message: String,
    },

    /// A required chain step failed; rollback was attempted.
    #[error("chain '{chain}' failed at step '{step}': {message}")]
    ChainStepFailed {
        /// The chain that failed.
        chain: String,
        /// The required step that failed.
        step: String,
        /// The failing step's error, rendered.
        message: String,
    },

    /// Chain machinery failed outside any individual step.
    #[error("chain execution error: {message}")]
    ChainExecution {
        /// Failure description.
        message: String,
    },
}

impl EngineError {
    /// Stable kind tag used in audit rows and summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authorization { .. } => "AuthorizationError",
            Self::UnknownTool { .. } => "UnknownTool",
            Self::Validation { .. } => "ValidationError",
            Self::InsufficientPermissions { .. } => "InsufficientPermissions",
            Self::RateLimitExceeded { .. } => "RateLimitExceeded",
            Self::ConfirmationRequired { .. } => "ConfirmationRequired",
            Self::Execution { .. } => "ExecutionError",
            Self::NotFound { .. } => "NotFound",
            Self::PermissionDenied { .. } => "PermissionDenied",
            Self::Network { .. } => "NetworkError",
            Self::Database { .. } => "DatabaseError",
            Self::Api { .. } => "APIError",
            Self::ChainValidation { .. } => "ChainValidationError",
            Self::EmptyChain { .. } => "EmptyChain",
            Self::ArgumentGeneration { .. } => "ArgumentGenerationError",
            Self::ChainStepFailed { .. } => "ChainStepFailed",
            Self::ChainExecution { .. } => "ChainExecutionError",
        }
    }

    /// HTTP status code carried by the error, when one exists.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { code, .. } => *code,
            Self::NotFound { .. } => Some(404),
            Self::PermissionDenied { .. } => Some(403),
            _ => None,
        }
    }

    /// Render as a JSON object for chain contexts and execution logs.
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
        })
    }
}
