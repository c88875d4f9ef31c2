//! Typed error hierarchy for devboard.
//!
//! - `ClientError` (in `clients`) covers upstream HTTP failures.
//! - `DashboardError` covers everything the service, job and notes layers
//!   can report to a route handler.

use thiserror::Error;

use crate::clients::ClientError;

/// Errors surfaced by the dashboard service, job tracker and notes store.
#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("{service} is not configured")]
    NotConfigured { service: &'static str },

    #[error("Job {id} not found")]
    JobNotFound { id: String },

    #[error("No note for {kind} {id}")]
    NoteNotFound { kind: String, id: String },

    #[error("Invalid note kind '{0}': expected 'ticket' or 'pr'")]
    InvalidNoteKind(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DashboardError {
    /// True for missing-credential failures that read paths treat as "no data".
    pub fn is_not_configured(&self) -> bool {
        matches!(
            self,
            DashboardError::NotConfigured { .. } | DashboardError::Client(ClientError::NotConfigured(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_not_found_carries_id() {
        let err = DashboardError::JobNotFound { id: "abc".into() };
        match &err {
            DashboardError::JobNotFound { id } => assert_eq!(id, "abc"),
            _ => panic!("Expected JobNotFound"),
        }
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn not_configured_is_detected_through_client_errors() {
        assert!(DashboardError::NotConfigured { service: "Jira" }.is_not_configured());
        let err: DashboardError = ClientError::NotConfigured("Azure DevOps").into();
        assert!(err.is_not_configured());
        assert!(!DashboardError::BadRequest("x".into()).is_not_configured());
    }

    #[test]
    fn io_errors_convert() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: DashboardError = io_err.into();
        assert!(matches!(err, DashboardError::Io(_)));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&DashboardError::InvalidNoteKind("x".into()));
        assert_std_error(&ClientError::NotConfigured("Jira"));
    }
}
