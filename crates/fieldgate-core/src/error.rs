use thiserror::Error;

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Hashing error: {0}")]
    Hash(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}

/// Failures while filling a template's placeholders for one request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("placeholder $${position}$$ has no binding (table size {table_len})")]
    UnboundPlaceholder { position: usize, table_len: usize },

    #[error("malformed placeholder at byte {offset}")]
    MalformedPlaceholder { offset: usize },

    #[error("renderer {renderer} cannot render value: {reason}")]
    Unrenderable {
        renderer: &'static str,
        reason: String,
    },
}
