use thiserror::Error;

/// The five error kinds from the relay's error-handling design.
///
/// Each variant maps to a recovery strategy at the call site rather than a
/// single "log and bubble up" policy — see the `code()` accessor, which the
/// command layer and mirror path use to decide whether to react `failure`
/// or silently swallow the error.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The platform call itself failed (network / server / rate limit).
    #[error("transport error: {0}")]
    Transport(String),

    /// Expected record not found — treated as "nothing to do", not an error
    /// by callers on the hot path.
    #[error("not found: {0}")]
    NotFound(String),

    /// A resume/contact attempt named a participant who is now a staff
    /// member or blacklisted. Suppressed from logs per spec.
    #[error("user not allowed")]
    UserNotAllowed,

    /// Storage failure during a write. In-memory state remains authoritative
    /// for the rest of the event-loop iteration.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Invalid auth, unparseable config, unreachable DB at startup.
    /// Terminates the affected bot, or the process for startup-time fatals.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl RelayError {
    /// Short error code, useful for tests asserting which error class was hit.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Transport(_) => "TRANSPORT",
            RelayError::NotFound(_) => "NOT_FOUND",
            RelayError::UserNotAllowed => "USER_NOT_ALLOWED",
            RelayError::Persistence(_) => "PERSISTENCE",
            RelayError::Fatal(_) => "FATAL",
        }
    }

    /// True for errors that should never be logged at error/warn level
    /// (the "not-allowed" sentinel is expected, user-triggered behaviour).
    pub fn is_quiet(&self) -> bool {
        matches!(self, RelayError::UserNotAllowed)
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
