use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DevError>;

#[derive(Error, Debug)]
pub enum DevError {
    /// The SSE stream disconnected, or the HTTP round-trip itself failed.
    /// The agent loop treats this as a retryable transport failure.
    #[error("stream disconnected: {0}")]
    Stream(String),

    /// Non-2xx response from the chat completions endpoint.
    #[error("unexpected status {0}: {1}")]
    UnexpectedStatus(StatusCode, String),

    /// Retry budget exhausted while talking to the model.
    #[error("transport error: exceeded retry limit ({0} attempts)")]
    RetryLimit(u32),

    /// The model's response could not be parsed into the Agent Response
    /// envelope (missing marker, or zero tool calls accumulated).
    #[error("malformed agent response: {0}")]
    MalformedResponse(String),

    /// The agent loop hit `maxLoops` without the model declaring `DONE`
    /// and passing audit.
    #[error("loop cap of {0} iterations reached without completion")]
    LoopCapReached(u32),

    /// No session exists for the given id, or none is recorded for the
    /// working directory's "last session" map.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
