/// Typed failures surfaced inside `anyhow::Error` so callers can `downcast_ref`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("embedding request failed with status {status}: {body}")]
    EmbeddingRequest { status: u16, body: String },

    #[error("invalid embedding response: {0}")]
    EmbeddingResponse(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
