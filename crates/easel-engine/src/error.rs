//! Error types for engine components.

use thiserror::Error;

/// Result type alias using [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures raised by engine components to their caller.
///
/// The session orchestrator is the only place these are turned into
/// user-visible text; components never swallow them.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A credential or setting needed by this feature is missing.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Network-level failure (connect, timeout, broken body).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-success status or explicit failure payload from a remote service.
    #[error("{service} request failed ({status}): {message}")]
    Vendor {
        service: String,
        status: u16,
        message: String,
    },

    /// Image container outside the codec allow-list.
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid data URI: {0}")]
    InvalidDataUri(String),

    #[error("Image generation failed: {0}")]
    GenerationFailed(String),

    #[error("Outpaint submission failed: {0}")]
    SubmissionFailed(String),

    /// The remote job reached its failed state.
    #[error("Outpaint failed: {0}")]
    OutpaintFailed(String),

    /// Status queries kept failing past the retry budget.
    #[error("Outpaint polling failed after {retries} retries: {message}")]
    PollingFailed { retries: u32, message: String },

    #[error("Outpaint job {task_id} timed out after {waited_s:.1}s")]
    Timeout { task_id: String, waited_s: f64 },

    #[error("Download failed after {attempts} attempts ({url}): {message}")]
    DownloadFailed {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    pub fn vendor(service: &str, status: u16, message: impl Into<String>) -> Self {
        Self::Vendor {
            service: service.to_string(),
            status,
            message: message.into(),
        }
    }

    /// True for failures a caller may retry: transport errors only.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        let mut message = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            let text = cause.to_string();
            if !text.trim().is_empty() && !message.contains(text.trim()) {
                message.push_str(" | caused by: ");
                message.push_str(text.trim());
            }
            source = cause.source();
        }
        Self::Transport(message)
    }
}

#[cfg(test)]
mod tests {
    use super::EngineError;

    #[test]
    fn only_transport_errors_are_retryable() {
        assert!(EngineError::Transport("reset".to_string()).is_transport());
        assert!(!EngineError::vendor("DashScope", 500, "boom").is_transport());
        assert!(!EngineError::OutpaintFailed("nsfw".to_string()).is_transport());
    }

    #[test]
    fn messages_carry_vendor_details() {
        let err = EngineError::vendor("DashScope", 400, "InvalidParameter: size");
        assert_eq!(
            err.to_string(),
            "DashScope request failed (400): InvalidParameter: size"
        );
        let timeout = EngineError::Timeout {
            task_id: "t-1".to_string(),
            waited_s: 301.0,
        };
        assert_eq!(timeout.to_string(), "Outpaint job t-1 timed out after 301.0s");
    }
}
