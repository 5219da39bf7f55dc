use crate::BotError;

/// The failure classes a War tournament can run into.
///
/// Engine functions return [`BotError`]; the scheduler downcasts to this type to decide
/// whether a tournament should be cancelled, aborted, or simply retried on the next tick.
#[derive(Debug, thiserror::Error)]
pub enum WarError {
    /// The tournament cannot be created as requested (too few entrants, built twice, ...).
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// An operation would break a bracket invariant, e.g. overwriting a decided match.
    #[error("State violation: {0}")]
    StateViolation(String),
    /// A presentation or roster call failed. Retried on the next tick.
    #[error("Collaborator call failed: {0}")]
    TransientCollaborator(String),
    /// Persisted records reference each other inconsistently.
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),
}

/// How the scheduler should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Configuration,
    StateViolation,
    Transient,
    DataIntegrity,
}

impl WarError {
    /// Classifies any bot error. Errors that did not originate from the engine (database
    /// hiccups, HTTP failures) are treated as transient.
    pub fn classify(error: &BotError) -> ErrorClass {
        match error.downcast_ref::<WarError>() {
            Some(WarError::Configuration(_)) => ErrorClass::Configuration,
            Some(WarError::StateViolation(_)) => ErrorClass::StateViolation,
            Some(WarError::DataIntegrity(_)) => ErrorClass::DataIntegrity,
            Some(WarError::TransientCollaborator(_)) | None => ErrorClass::Transient,
        }
    }

    /// Wraps a failed collaborator call, keeping its message.
    pub fn collaborator(call: &str, error: BotError) -> BotError {
        WarError::TransientCollaborator(format!("{}: {:#}", call, error)).into()
    }
}
