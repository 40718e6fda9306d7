//! Error handling module for the X-Road subsystem controller
//!
//! Every fallible step of a reconciliation surfaces one of these variants. A
//! missing client on lookup is not an error (lookups return `Option`); the
//! variants below cover the remote API, the secret store, polling budgets and
//! the lifecycle host.

use thiserror::Error;

/// Result type alias for controller operations
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Longest remote response body kept for diagnostics
const MAX_BODY_EXCERPT: usize = 512;

/// Error taxonomy of the subsystem controller
#[derive(Error, Debug)]
pub enum ControllerError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The API token could not be fetched from the secret store
    #[error("Secret {secret_id} unavailable: {reason}")]
    SecretUnavailable { secret_id: String, reason: String },

    /// The X-Road API answered with an unexpected status code
    #[error("X-Road API operation {operation} returned unexpected status {status}")]
    RemoteOperationFailed {
        operation: String,
        status: u16,
        body: String,
    },

    /// The X-Road API answered with a body of the wrong shape
    #[error("Malformed response for {operation}: {reason}")]
    MalformedResponse { operation: String, reason: String },

    /// A bounded wait ran out of budget
    #[error("Timed out during {operation}: {message}")]
    Timeout { operation: String, message: String },

    /// A client that must exist was not found
    #[error("Client {client_id} not found")]
    ClientMissing { client_id: String },

    /// The lifecycle event or its resource properties could not be parsed
    #[error("Invalid lifecycle event: {reason}")]
    InvalidEvent { reason: String },

    /// The lifecycle host rejected the terminal report
    #[error("Lifecycle response was rejected with status {status}")]
    ResponseDelivery { status: u16 },

    /// Host runtime API errors
    #[error("Runtime API error: {message}")]
    Runtime { message: String },

    /// HTTP transport errors
    #[error("HTTP client error: {source}")]
    HttpClient {
        #[from]
        source: reqwest::Error,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

impl ControllerError {
    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new secret unavailable error
    pub fn secret_unavailable<S1: Into<String>, S2: Into<String>>(
        secret_id: S1,
        reason: S2,
    ) -> Self {
        Self::SecretUnavailable {
            secret_id: secret_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a new remote operation error, keeping an excerpt of the body
    pub fn remote_operation_failed<S1: Into<String>, S2: AsRef<str>>(
        operation: S1,
        status: u16,
        body: S2,
    ) -> Self {
        let body: String = body.as_ref().chars().take(MAX_BODY_EXCERPT).collect();
        Self::RemoteOperationFailed {
            operation: operation.into(),
            status,
            body,
        }
    }

    /// Create a new malformed response error
    pub fn malformed_response<S1: Into<String>, S2: Into<String>>(
        operation: S1,
        reason: S2,
    ) -> Self {
        Self::MalformedResponse {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S1: Into<String>, S2: Into<String>>(operation: S1, message: S2) -> Self {
        Self::Timeout {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a new missing client error
    pub fn client_missing<S: Into<String>>(client_id: S) -> Self {
        Self::ClientMissing {
            client_id: client_id.into(),
        }
    }

    /// Create a new invalid event error
    pub fn invalid_event<S: Into<String>>(reason: S) -> Self {
        Self::InvalidEvent {
            reason: reason.into(),
        }
    }

    /// Create a new runtime API error
    pub fn runtime<S: Into<String>>(message: S) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    /// Get the error code for this error (for lifecycle reports and logs)
    pub fn error_code(&self) -> &'static str {
        match self {
            ControllerError::Configuration { .. } => "CONFIGURATION_ERROR",
            ControllerError::SecretUnavailable { .. } => "SECRET_UNAVAILABLE",
            ControllerError::RemoteOperationFailed { .. } => "REMOTE_OPERATION_FAILED",
            ControllerError::MalformedResponse { .. } => "MALFORMED_RESPONSE",
            ControllerError::Timeout { .. } => "TIMEOUT",
            ControllerError::ClientMissing { .. } => "CLIENT_MISSING",
            ControllerError::InvalidEvent { .. } => "INVALID_EVENT",
            ControllerError::ResponseDelivery { .. } => "RESPONSE_DELIVERY_FAILED",
            ControllerError::Runtime { .. } => "RUNTIME_ERROR",
            ControllerError::HttpClient { .. } => "HTTP_CLIENT_ERROR",
            ControllerError::Serialization { .. } => "SERIALIZATION_ERROR",
        }
    }

    /// Check if re-running the lifecycle event is likely to succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ControllerError::HttpClient { .. }
            | ControllerError::Timeout { .. }
            | ControllerError::SecretUnavailable { .. } => true,
            ControllerError::RemoteOperationFailed { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
