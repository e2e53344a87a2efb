use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReviewError {
    #[error("HTTP error: {0}")]
    Http(Box<reqwest::Error>),

    #[error("{operation} failed: {message}")]
    Remote { operation: &'static str, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Async runtime unavailable: {0}")]
    Runtime(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ReviewError {
    pub fn remote(operation: &'static str, message: impl Into<String>) -> Self {
        ReviewError::Remote {
            operation,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for ReviewError {
    fn from(error: reqwest::Error) -> Self {
        ReviewError::Http(Box::new(error))
    }
}

pub type ReviewResult<T> = Result<T, ReviewError>;
