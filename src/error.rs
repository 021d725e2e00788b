use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Invalid window: {0} (must be a positive integer)")]
    InvalidWindow(i64),

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Upstream error: HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        AppError::MalformedPayload(msg.into())
    }
}
