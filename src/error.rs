use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid detection (track {ephemeral_id}): {reason}")]
    InvalidDetection { ephemeral_id: i64, reason: String },

    #[error("Embedding extraction failed: {0}")]
    Extraction(String),

    #[error("Parse Error: {0}")]
    Parse(String),

    #[error("Config Error: {0}")]
    Config(String),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),
}
