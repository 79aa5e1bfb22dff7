//! Browser-driven session collaborator
//!
//! Only channel and gate implementations talk to a [`BrowserSession`]; the
//! orchestration layers never see one.

use super::ChannelError;
use async_trait::async_trait;
use std::time::{Duration, Instant};

/// Opaque handle to an element found in the current page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef(pub String);

/// A live, stateful automation session
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn navigate(&mut self, url: &str) -> Result<(), ChannelError>;

    /// `Ok(None)` when nothing matches the selector
    async fn find(&mut self, selector: &str) -> Result<Option<ElementRef>, ChannelError>;

    async fn fill(&mut self, element: &ElementRef, text: &str) -> Result<(), ChannelError>;

    async fn click(&mut self, element: &ElementRef) -> Result<(), ChannelError>;

    async fn text(&mut self, element: &ElementRef) -> Result<String, ChannelError>;

    /// PNG bytes of one element, used for challenge images
    async fn screenshot(&mut self, element: &ElementRef) -> Result<Vec<u8>, ChannelError>;

    async fn current_url(&mut self) -> Result<String, ChannelError>;

    async fn export_cookies(&mut self) -> Result<Vec<u8>, ChannelError>;

    async fn import_cookies(&mut self, blob: &[u8]) -> Result<(), ChannelError>;

    async fn close(&mut self) -> Result<(), ChannelError>;
}

/// Creates browser sessions
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, ChannelError>;
}

/// Try each selector in order, returning the first match and its position
pub async fn find_first(
    session: &mut dyn BrowserSession,
    selectors: &[String],
) -> Result<Option<(ElementRef, usize)>, ChannelError> {
    for (i, selector) in selectors.iter().enumerate() {
        if let Some(element) = session.find(selector).await? {
            return Ok(Some((element, i)));
        }
    }
    Ok(None)
}

/// Poll for a selector until it appears or `timeout` passes
pub async fn wait_for(
    session: &mut dyn BrowserSession,
    selector: &str,
    timeout: Duration,
) -> Result<Option<ElementRef>, ChannelError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(element) = session.find(selector).await? {
            return Ok(Some(element));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}
