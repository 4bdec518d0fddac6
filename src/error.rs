use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum MillError {
    #[error("invalid submission: {0}")]
    Validation(String),

    #[error("duplicate job id {0}")]
    DuplicateJob(Uuid),

    #[error("unknown topic [{0}]")]
    UnknownTopic(String),

    #[error("principal [{principal}] is not allowed to {operation} [{resource}]")]
    AccessDenied {
        principal: String,
        operation: &'static str,
        resource: String,
    },

    #[error("malformed queue message: {0}")]
    MalformedMessage(String),

    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("job failed: {0}")]
    JobFailure(String),

    #[error("resource probe failed: {0}")]
    ResourceProbe(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error classification used for dispatch at component boundaries.
///
/// Transient infra errors are retried with backoff at the call site; validation
/// errors are rejected synchronously; job failures are recorded as a terminal
/// Failed state; everything else is logged and degrades to a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    TransientInfra,
    Validation,
    JobFailure,
    Unknown,
}

impl MillError {
    pub fn class(&self) -> ErrorClass {
        match self {
            MillError::Validation(_) | MillError::DuplicateJob(_) => ErrorClass::Validation,
            MillError::BrokerUnavailable(_) | MillError::StoreUnavailable(_) => {
                ErrorClass::TransientInfra
            }
            MillError::JobFailure(_) => ErrorClass::JobFailure,
            MillError::UnknownTopic(_)
            | MillError::AccessDenied { .. }
            | MillError::MalformedMessage(_)
            | MillError::ResourceProbe(_)
            | MillError::Io(_) => ErrorClass::Unknown,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::TransientInfra
    }
}

pub type Result<T> = std::result::Result<T, MillError>;
