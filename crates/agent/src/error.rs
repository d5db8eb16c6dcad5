use slawatch_core::errors::{CollaboratorError, DomainError};
use slawatch_core::resilience::CircuitBreakerError;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("circuit breaker `{0}` is open")]
    CircuitOpen(String),
    #[error("mailbox for agent `{agent}` is full")]
    MailboxFull { agent: String },
    #[error("agent `{0}` is not accepting messages")]
    NotRunning(String),
    #[error("agent failed to start: {0}")]
    Startup(String),
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("message processing failed: {0}")]
    Processing(String),
}

impl AgentError {
    /// Whether another attempt at the same message could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidMessage(_) | Self::Domain(_))
    }
}

impl From<CircuitBreakerError<CollaboratorError>> for AgentError {
    fn from(value: CircuitBreakerError<CollaboratorError>) -> Self {
        match value {
            CircuitBreakerError::Open(name) => Self::CircuitOpen(name),
            CircuitBreakerError::Operation(error) => Self::Collaborator(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use slawatch_core::errors::{CollaboratorError, DomainError};
    use slawatch_core::resilience::CircuitBreakerError;

    use super::AgentError;

    #[test]
    fn breaker_errors_keep_their_meaning() {
        let open: AgentError =
            CircuitBreakerError::<CollaboratorError>::Open("ingest".into()).into();
        assert_eq!(open, AgentError::CircuitOpen("ingest".into()));

        let failed: AgentError =
            CircuitBreakerError::Operation(CollaboratorError::Transient("timeout".into())).into();
        assert_eq!(failed.to_string(), "transient remote failure: timeout");
    }

    #[test]
    fn malformed_input_is_not_retried() {
        assert!(!AgentError::InvalidMessage("missing ticket".into()).is_retryable());
        assert!(!AgentError::from(DomainError::InvalidEvent("x".into())).is_retryable());
        assert!(AgentError::Processing("boom".into()).is_retryable());
        assert!(AgentError::Collaborator(CollaboratorError::NotFound("t-1".into())).is_retryable());
    }
}
