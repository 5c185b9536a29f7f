use axum::http::StatusCode;
use thiserror::Error;

/// Typed error hierarchy for scalazap.
///
/// Use at module boundaries (resolver, dispatcher, store, config validation).
/// Internal/leaf functions can continue using `anyhow::Result`; the `Internal`
/// variant allows seamless conversion via the `?` operator.
#[derive(Debug, Error)]
pub enum ScalazapError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("No usable connection: {0}")]
    NoConnection(String),

    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Convenience alias for results using `ScalazapError`.
pub type ScalazapResult<T> = std::result::Result<T, ScalazapError>;

impl ScalazapError {
    /// Whether the caller caused this (bad input, nothing to send with).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NoConnection(_))
    }

    /// HTTP status used by the gateway when this error fails a whole request.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::NoConnection(_) => StatusCode::BAD_REQUEST,
            Self::Provider { .. } | Self::Store(_) | Self::Config(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<rusqlite::Error> for ScalazapError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests;
