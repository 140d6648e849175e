use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Device not found")]
    NotFound,

    #[error("Offline")]
    Offline,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown telemetry kind: {0}")]
    UnknownKind(String),

    #[error("JSON parsing error: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
