use std::time::Duration;

/// Failures reported by the browser and HTTP collaborators
///
/// Channels translate these into attempt outcomes; they never cross the
/// channel boundary as errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("WebDriver error '{error}': {message}")]
    WebDriver { error: String, message: String },

    #[error("Malformed response: {0}")]
    Protocol(String),

    #[error("Anti-forgery token not found")]
    MissingToken,

    #[error("Session closed")]
    SessionClosed,
}

impl ChannelError {
    /// Whether retrying cannot help
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChannelError::Status(401) | ChannelError::Status(403))
    }

    /// Whether the underlying browser session is gone and must be recreated
    pub fn is_session_lost(&self) -> bool {
        match self {
            ChannelError::SessionClosed => true,
            ChannelError::WebDriver { error, .. } => {
                error == "invalid session id" || error == "no such window"
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ChannelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not report the configured limit on the error
            ChannelError::Timeout(Duration::ZERO)
        } else if let Some(status) = err.status() {
            ChannelError::Status(status.as_u16())
        } else {
            ChannelError::Http(err.to_string())
        }
    }
}
