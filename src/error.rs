// Porchlight Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PorchlightError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Frame dimensions changed: {previous_width}x{previous_height} -> {width}x{height}")]
    DimensionMismatch {
        previous_width: u32,
        previous_height: u32,
        width: u32,
        height: u32,
    },

    #[error("Malformed sample: {0}")]
    MalformedSample(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("FFmpeg error: {0}")]
    FFmpeg(String),

    #[error("Probe error: {0}")]
    Probe(String),

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for PorchlightError {
    fn from(err: anyhow::Error) -> Self {
        PorchlightError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PorchlightError>;
