//! Stateless HTTP collaborator with per-session cookie continuity

use super::ChannelError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// A fully read HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lowercased
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// `Retry-After` in seconds, when present and numeric
    pub fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

/// One cookie-carrying conversation with a site
#[async_trait]
pub trait HttpSession: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpResponse, ChannelError>;

    async fn post_form(
        &self,
        url: &str,
        fields: &[(String, String)],
    ) -> Result<HttpResponse, ChannelError>;
}

/// Factory for fresh HTTP sessions
pub trait HttpClient: Send + Sync {
    fn open(&self) -> Result<Box<dyn HttpSession>, ChannelError>;
}

/// `reqwest`-backed client; every `open` gets its own cookie store
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    user_agent: String,
    timeout: Duration,
}

impl ReqwestHttpClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            user_agent: format!("cadence/{}", env!("CARGO_PKG_VERSION")),
            timeout,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

impl HttpClient for ReqwestHttpClient {
    fn open(&self) -> Result<Box<dyn HttpSession>, ChannelError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(&self.user_agent)
            .timeout(self.timeout)
            .build()
            .map_err(|e| ChannelError::Http(e.to_string()))?;
        Ok(Box::new(ReqwestSession {
            client,
            timeout: self.timeout,
        }))
    }
}

struct ReqwestSession {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestSession {
    async fn read(&self, response: reqwest::Response) -> Result<HttpResponse, ChannelError> {
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(|e| self.map_error(e))?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    fn map_error(&self, err: reqwest::Error) -> ChannelError {
        if err.is_timeout() {
            ChannelError::Timeout(self.timeout)
        } else {
            ChannelError::from(err)
        }
    }
}

#[async_trait]
impl HttpSession for ReqwestSession {
    async fn get(&self, url: &str) -> Result<HttpResponse, ChannelError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;
        self.read(response).await
    }

    async fn post_form(
        &self,
        url: &str,
        fields: &[(String, String)],
    ) -> Result<HttpResponse, ChannelError> {
        let response = self
            .client
            .post(url)
            .form(fields)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;
        self.read(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_parsing() {
        let mut headers = HashMap::new();
        headers.insert("retry-after".to_string(), " 12 ".to_string());
        let response = HttpResponse {
            status: 429,
            headers,
            body: String::new(),
        };
        assert_eq!(response.retry_after(), Some(Duration::from_secs(12)));
        assert_eq!(response.header("Retry-After"), Some(" 12 "));
        assert!(!response.is_success());
    }
}
