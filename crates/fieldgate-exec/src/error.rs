use thiserror::Error;

use fieldgate_core::error::RenderError;

pub type Result<T> = std::result::Result<T, FetchError>;

/// Failures of the out-of-process query engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine closed")]
    Closed,

    #[error("engine already closed")]
    DoubleClose,

    #[error("failed to launch engine '{path}': {reason}")]
    Launch { path: String, reason: String },

    #[error("engine did not become ready before the deadline")]
    NotReady,

    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("engine answered with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("engine protocol error: {0}")]
    Protocol(String),

    #[error("engine i/o: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Startup and availability failures; a later attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::Launch { .. }
                | EngineError::NotReady
                | EngineError::Unavailable(_)
                | EngineError::Io(_)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineError::Closed | EngineError::DoubleClose)
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            EngineError::Unavailable(e.to_string())
        } else {
            EngineError::Protocol(e.to_string())
        }
    }
}

/// Failures of one upstream fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch deadline exceeded after {attempts} attempt(s)")]
    DeadlineExceeded { attempts: usize },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("http transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream answered with status {status}")]
    Status { status: u16, body: String },

    #[error("render request: {0}")]
    Render(#[from] RenderError),

    #[error("invalid request input: {0}")]
    InvalidInput(String),

    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),

    #[error("no source registered for data source {0}")]
    UnknownSource(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Engine(e) => e.is_transient(),
            FetchError::Transport(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    /// Never retried, whatever the policy.
    pub fn is_terminal(&self) -> bool {
        match self {
            FetchError::DeadlineExceeded { .. } => true,
            FetchError::Engine(e) => e.is_terminal(),
            FetchError::Render(_) | FetchError::InvalidInput(_) | FetchError::UnknownSource(_) => {
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(EngineError::NotReady.is_transient());
        assert!(!EngineError::Closed.is_transient());
        assert!(EngineError::Closed.is_terminal());

        let closed = FetchError::from(EngineError::Closed);
        assert!(closed.is_terminal());
        assert!(!closed.is_transient());

        let deadline = FetchError::DeadlineExceeded { attempts: 3 };
        assert!(deadline.is_terminal());

        let protocol = FetchError::from(EngineError::Protocol("bad json".into()));
        assert!(!protocol.is_transient());
        assert!(!protocol.is_terminal());
    }
}
