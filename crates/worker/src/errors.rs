use thiserror::Error;

use leasecheck_core::errors::{ApplicationError, DomainError};
use leasecheck_db::repositories::RepositoryError;

use crate::outbound::PublishError;

#[derive(Debug, Error)]
pub enum ScreeningError {
    #[error("vendor response carries no submission id")]
    MissingSubmissionId,
    #[error("unknown submission `{0}`")]
    UnknownSubmission(String),
    #[error("unknown party `{0}`")]
    UnknownParty(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl ScreeningError {
    /// Protocol and domain failures repeat on redelivery; store and transport
    /// failures may not.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Repository(_) | Self::Publish(_))
    }

    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::MissingSubmissionId | Self::UnknownSubmission(_) | Self::UnknownParty(_)
        )
    }
}

impl From<ScreeningError> for ApplicationError {
    fn from(value: ScreeningError) -> Self {
        match value {
            protocol @ (ScreeningError::MissingSubmissionId
            | ScreeningError::UnknownSubmission(_)
            | ScreeningError::UnknownParty(_)) => Self::Protocol(protocol.to_string()),
            ScreeningError::Domain(error) => Self::Domain(error),
            ScreeningError::Repository(error) => Self::Persistence(error.to_string()),
            ScreeningError::Publish(error) => Self::Integration(error.to_string()),
        }
    }
}
