use crate::channel::ChannelError;
use crate::error::{CadenceError, ErrorCode};
use std::time::Duration;
use thiserror::Error;

/// Failures while creating or using a stateful session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no session registered for channel '{0}'")]
    NotRegistered(String),

    #[error("session for '{0}' failed earlier in this run")]
    Failed(String),

    #[error("could not start session for '{channel}': {source}")]
    Launch {
        channel: String,
        #[source]
        source: ChannelError,
    },

    #[error("challenge for '{channel}' was not answered within {timeout:?}")]
    ChallengeTimeout { channel: String, timeout: Duration },

    #[error("challenge for '{channel}' was not accepted: {message}")]
    Challenge { channel: String, message: String },

    #[error("session for '{channel}' was stopped before it was ready")]
    Interrupted { channel: String },

    #[error("browser command failed: {0}")]
    Browser(#[from] ChannelError),

    #[error("artifact store error: {0}")]
    Store(String),
}

impl SessionError {
    pub fn channel(&self) -> Option<&str> {
        match self {
            SessionError::NotRegistered(c) | SessionError::Failed(c) => Some(c),
            SessionError::Launch { channel, .. }
            | SessionError::ChallengeTimeout { channel, .. }
            | SessionError::Challenge { channel, .. }
            | SessionError::Interrupted { channel } => Some(channel),
            SessionError::Browser(_) | SessionError::Store(_) => None,
        }
    }
}

impl From<SessionError> for CadenceError {
    fn from(err: SessionError) -> Self {
        let code = match &err {
            SessionError::NotRegistered(_) => ErrorCode::SESSION_NOT_REGISTERED,
            SessionError::Failed(_) => ErrorCode::SESSION_FAILED_STATE,
            SessionError::ChallengeTimeout { .. } => ErrorCode::SESSION_CHALLENGE_TIMEOUT,
            SessionError::Launch { .. } | SessionError::Challenge { .. } => {
                ErrorCode::SESSION_CREATION_FAILED
            }
            _ => ErrorCode::SESSION_GENERIC,
        };
        let channel = err.channel().map(str::to_string);
        CadenceError::session_with_code(code, err.to_string(), channel).with_source(err)
    }
}
