use thiserror::Error;

#[derive(Error, Debug)]
pub enum RulError {
    #[error("No valid model: {0}")]
    NoValidModel(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type RulResult<T> = Result<T, RulError>;
