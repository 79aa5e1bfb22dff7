//! Human-in-the-loop challenge answering

use super::SessionError;
use async_trait::async_trait;
use std::io::{BufRead, Write};
use std::path::PathBuf;

/// A challenge captured from the page
#[derive(Debug, Clone)]
pub struct ChallengeImage {
    pub bytes: Vec<u8>,
    /// Where the image was saved, when the store kept a copy
    pub path: Option<PathBuf>,
}

/// Produces an answer for a challenge image
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    async fn solve(&self, channel: &str, image: &ChallengeImage) -> Result<String, SessionError>;
}

/// Asks the operator on the terminal
///
/// The prompt goes to stderr so `--json` output on stdout stays clean.
#[derive(Debug, Default, Clone)]
pub struct ConsoleSolver;

impl ConsoleSolver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChallengeSolver for ConsoleSolver {
    async fn solve(&self, channel: &str, image: &ChallengeImage) -> Result<String, SessionError> {
        let location = image
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<not saved>".to_string());
        let prompt = format!("[{channel}] Challenge image saved to {location}\nEnter the answer: ");
        let channel = channel.to_string();

        tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr();
            let _ = stderr.write_all(prompt.as_bytes());
            let _ = stderr.flush();

            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .map_err(|e| SessionError::Challenge {
                    channel: channel.clone(),
                    message: e.to_string(),
                })?;
            Ok(line.trim().to_string())
        })
        .await
        .map_err(|e| SessionError::Store(format!("solver task failed: {e}")))?
    }
}
