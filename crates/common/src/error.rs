//! Admission error codes.
//!
//! Admission-path failures are surfaced synchronously to the caller with
//! a structured code; background-path failures are only observable
//! through persisted entity status and logs.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdmissionError {
    /// A required admission field is missing or malformed.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A field carries a value outside its domain.
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// The admission signature does not recover to the engine address.
    #[error("signature verification failed")]
    SignatureVerification,

    /// The resource matcher found no node satisfying the requirement.
    #[error("resources unavailable")]
    ResourcesUnavailable,

    /// Anything else; details recorded against the entity for later
    /// inspection.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AdmissionError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            AdmissionError::MissingField(_) => "param_error",
            AdmissionError::InvalidField { .. } => "param_error",
            AdmissionError::SignatureVerification => "signature_error",
            AdmissionError::ResourcesUnavailable => "resources_unavailable",
            AdmissionError::Internal(_) => "internal_error",
        }
    }
}
