use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Action parse error: {0}")]
    Parse(String),

    #[error("Device error: {0}")]
    Device(anyhow::Error),

    #[error("Recording error: {0}")]
    Recording(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
