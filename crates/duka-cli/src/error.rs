use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] duka_core::Error),
    #[error(transparent)]
    Remote(#[from] duka_core::RemoteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No payload provided; pass JSON as an argument or pipe it on stdin")]
    EmptyPayload,
    #[error("Invalid {kind} payload: {message}")]
    InvalidPayload { kind: String, message: String },
    #[error("{kind} {id} not found")]
    RecordNotFound { kind: String, id: i64 },
    #[error("Operation {0} not found in the queue")]
    OperationNotFound(i64),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error(
        "Sync is not configured. Run `duka config init --api-base-url <URL>` + `duka auth login`, or set DUKA_API_URL and DUKA_API_TOKEN."
    )]
    SyncNotConfigured,
}
