//! Typed error hierarchy for Shopfloor.
//!
//! Three top-level enums cover the three tiers:
//! - `ProductionError`: work-order progression and record validation
//! - `ClientError`: REST calls made by the client tier
//! - `SyncError`: background sync task failures

use thiserror::Error;

/// Errors from work-order progression and record validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProductionError {
    #[error("Work order {id} not found")]
    WorkOrderNotFound { id: String },

    #[error("{resource} {id} not found")]
    RecordNotFound { resource: &'static str, id: String },

    #[error("Work order {id} has no path steps")]
    NoSteps { id: String },

    #[error("Work order {id} is already finished")]
    AlreadyFinished { id: String },

    #[error("Work order {id} has not started")]
    NotStarted { id: String },

    #[error("Step '{label}' is {status}, expected {expected}")]
    InvalidStepStatus {
        label: String,
        status: String,
        expected: &'static str,
    },

    #[error("Invalid split: {0}")]
    InvalidSplit(String),

    #[error("Invalid {field}: {message}")]
    Validation { field: &'static str, message: String },
}

impl ProductionError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }
}

/// Errors from outbound REST calls.
///
/// Timeouts are reported as `Network`, so callers treat them like any other
/// transport failure.
#[derive(Debug, Error, Clone)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn is_network(&self) -> bool {
        matches!(self, ClientError::Network(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Network("request timed out".to_string())
        } else if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Network(err.to_string())
        }
    }
}

/// Errors surfaced to a sync task's `on_error` callback.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Production(#[from] ProductionError),

    #[error("Sync task panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_error_not_found_carries_id() {
        let err = ProductionError::WorkOrderNotFound { id: "wo-42".into() };
        assert!(err.to_string().contains("wo-42"));
    }

    #[test]
    fn validation_helper_builds_variant() {
        let err = ProductionError::validation("quantity", "must be greater than zero");
        match &err {
            ProductionError::Validation { field, message } => {
                assert_eq!(*field, "quantity");
                assert_eq!(message, "must be greater than zero");
            }
            _ => panic!("Expected Validation"),
        }
        assert_eq!(err.to_string(), "Invalid quantity: must be greater than zero");
    }

    #[test]
    fn sync_error_converts_from_client_error() {
        let err: SyncError = ClientError::Network("connection refused".into()).into();
        match &err {
            SyncError::Client(ClientError::Network(msg)) => assert_eq!(msg, "connection refused"),
            _ => panic!("Expected SyncError::Client(Network)"),
        }
    }

    #[test]
    fn client_error_status_formats_code() {
        let err = ClientError::Status {
            status: 409,
            message: "duplicate id".into(),
        };
        assert_eq!(err.to_string(), "Server returned 409: duplicate id");
        assert!(!err.is_network());
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ProductionError::NoSteps { id: "x".into() });
        assert_std_error(&ClientError::Decode("x".into()));
        assert_std_error(&SyncError::Panicked("x".into()));
    }
}
