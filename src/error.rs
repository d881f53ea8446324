//! 错误类型 (Error types)

use thiserror::Error;

/// 库内统一的 Result 别名
pub type Result<T> = std::result::Result<T, CounterError>;

/// 计数系统错误
#[derive(Error, Debug)]
pub enum CounterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Video source error: {0}")]
    Source(String),

    #[error("Detection failed: {0}")]
    Detection(String),

    #[error("Malformed detection output: {0}")]
    MalformedDetection(String),

    #[error("HTTP camera error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl CounterError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn video_source<S: Into<String>>(msg: S) -> Self {
        Self::Source(msg.into())
    }

    pub fn detection<S: Into<String>>(msg: S) -> Self {
        Self::Detection(msg.into())
    }
}
