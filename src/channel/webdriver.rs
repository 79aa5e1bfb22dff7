//! Minimal W3C WebDriver client
//!
//! Speaks the JSON wire protocol of chromedriver/geckodriver directly over
//! `reqwest`. Only the handful of commands the interactive channel and the
//! challenge gate need are implemented.

use super::browser::{BrowserLauncher, BrowserSession, ElementRef};
use super::ChannelError;
use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Key under which W3C drivers return element references
const ELEMENT_KEY: &str = "element-6066-11e4-a6c3-4a4b7f8e1e4f";

/// Launches sessions against a running WebDriver endpoint
#[derive(Debug, Clone)]
pub struct WebDriverLauncher {
    endpoint: String,
    headless: bool,
    client: reqwest::Client,
}

impl WebDriverLauncher {
    pub fn new(
        endpoint: impl Into<String>,
        headless: bool,
        command_timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(command_timeout)
            .build()
            .map_err(|e| ChannelError::Http(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            headless,
            client,
        })
    }

    fn capabilities(&self) -> Value {
        let mut chrome_args = vec!["--window-size=1280,900", "--disable-gpu"];
        let mut firefox_args = Vec::new();
        if self.headless {
            chrome_args.push("--headless=new");
            firefox_args.push("-headless");
        }
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "goog:chromeOptions": { "args": chrome_args },
                    "moz:firefoxOptions": { "args": firefox_args }
                }
            }
        })
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, ChannelError> {
        let url = format!("{}/session", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(&self.capabilities())
            .send()
            .await?;
        let value = unwrap_value(response).await?;
        let id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| ChannelError::Protocol("new session response lacks sessionId".into()))?
            .to_string();

        debug!("Started WebDriver session {}", id);
        Ok(Box::new(WebDriverSession {
            base: format!("{}/session/{}", self.endpoint, id),
            client: self.client.clone(),
            closed: false,
        }))
    }
}

/// One live WebDriver session
pub struct WebDriverSession {
    base: String,
    client: reqwest::Client,
    closed: bool,
}

impl WebDriverSession {
    async fn get(&self, path: &str) -> Result<Value, ChannelError> {
        self.ensure_open()?;
        let response = self
            .client
            .get(format!("{}{}", self.base, path))
            .send()
            .await?;
        unwrap_value(response).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, ChannelError> {
        self.ensure_open()?;
        let response = self
            .client
            .post(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await?;
        unwrap_value(response).await
    }

    fn ensure_open(&self) -> Result<(), ChannelError> {
        if self.closed {
            Err(ChannelError::SessionClosed)
        } else {
            Ok(())
        }
    }
}

/// Extract `value` from a WebDriver reply, mapping protocol errors
async fn unwrap_value(response: reqwest::Response) -> Result<Value, ChannelError> {
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| ChannelError::Protocol(e.to_string()))?;
    let value = body.get("value").cloned().unwrap_or(Value::Null);

    if let Some(error) = value.get("error").and_then(Value::as_str) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(ChannelError::WebDriver {
            error: error.to_string(),
            message,
        });
    }
    if !status.is_success() {
        return Err(ChannelError::Status(status.as_u16()));
    }
    Ok(value)
}

fn element_id(value: &Value) -> Result<ElementRef, ChannelError> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(|id| ElementRef(id.to_string()))
        .ok_or_else(|| ChannelError::Protocol("element reference missing".into()))
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn navigate(&mut self, url: &str) -> Result<(), ChannelError> {
        self.post("/url", json!({ "url": url })).await.map(|_| ())
    }

    async fn find(&mut self, selector: &str) -> Result<Option<ElementRef>, ChannelError> {
        let result = self
            .post(
                "/element",
                json!({ "using": "css selector", "value": selector }),
            )
            .await;
        match result {
            Ok(value) => element_id(&value).map(Some),
            Err(ChannelError::WebDriver { error, .. }) if error == "no such element" => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn fill(&mut self, element: &ElementRef, text: &str) -> Result<(), ChannelError> {
        let path = format!("/element/{}", element.0);
        self.post(&format!("{path}/clear"), json!({})).await?;
        self.post(&format!("{path}/value"), json!({ "text": text }))
            .await
            .map(|_| ())
    }

    async fn click(&mut self, element: &ElementRef) -> Result<(), ChannelError> {
        self.post(&format!("/element/{}/click", element.0), json!({}))
            .await
            .map(|_| ())
    }

    async fn text(&mut self, element: &ElementRef) -> Result<String, ChannelError> {
        let value = self.get(&format!("/element/{}/text", element.0)).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn screenshot(&mut self, element: &ElementRef) -> Result<Vec<u8>, ChannelError> {
        let value = self
            .get(&format!("/element/{}/screenshot", element.0))
            .await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| ChannelError::Protocol("screenshot is not a string".into()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| ChannelError::Protocol(e.to_string()))
    }

    async fn current_url(&mut self) -> Result<String, ChannelError> {
        let value = self.get("/url").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn export_cookies(&mut self) -> Result<Vec<u8>, ChannelError> {
        let value = self.get("/cookie").await?;
        serde_json::to_vec(&value).map_err(|e| ChannelError::Protocol(e.to_string()))
    }

    async fn import_cookies(&mut self, blob: &[u8]) -> Result<(), ChannelError> {
        let cookies: Vec<Value> =
            serde_json::from_slice(blob).map_err(|e| ChannelError::Protocol(e.to_string()))?;
        for cookie in cookies {
            if let Err(e) = self.post("/cookie", json!({ "cookie": cookie })).await {
                // Cookies for another domain are rejected; keep the rest
                warn!("Skipping cookie that could not be restored: {}", e);
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let response = self.client.delete(&self.base).send().await?;
        unwrap_value(response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};

    async fn spawn_driver() -> String {
        let app = Router::new()
            .route(
                "/session",
                post(|| async { Json(json!({"value": {"sessionId": "abc", "capabilities": {}}})) }),
            )
            .route(
                "/session/{id}",
                axum::routing::delete(|| async { Json(json!({"value": null})) }),
            )
            .route(
                "/session/{id}/url",
                post(|| async { Json(json!({"value": null})) })
                    .get(|| async { Json(json!({"value": "https://svc.test/home"})) }),
            )
            .route(
                "/session/{id}/element",
                post(|Json(body): Json<Value>| async move {
                    if body["value"] == "#present" {
                        (StatusCode::OK, Json(json!({"value": {ELEMENT_KEY: "el-1"}})))
                    } else {
                        (
                            StatusCode::NOT_FOUND,
                            Json(json!({"value": {"error": "no such element", "message": "nope"}})),
                        )
                    }
                }),
            )
            .route(
                "/session/{id}/element/{el}/text",
                get(|Path((_id, el)): Path<(String, String)>| async move {
                    Json(json!({"value": format!("text of {el}")}))
                }),
            )
            .route(
                "/session/{id}/element/{el}/screenshot",
                get(|| async { Json(json!({"value": "aGVsbG8="})) }),
            )
            .route(
                "/session/{id}/cookie",
                get(|| async { Json(json!({"value": [{"name": "sid", "value": "1"}]})) })
                    .post(|| async { Json(json!({"value": null})) }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_session_commands_against_stub_driver() {
        let endpoint = spawn_driver().await;
        let launcher = WebDriverLauncher::new(endpoint, true, Duration::from_secs(5)).unwrap();
        let mut session = launcher.launch().await.unwrap();

        session.navigate("https://svc.test/home").await.unwrap();
        assert_eq!(session.current_url().await.unwrap(), "https://svc.test/home");

        let element = session.find("#present").await.unwrap().unwrap();
        assert_eq!(element, ElementRef("el-1".into()));
        assert!(session.find("#missing").await.unwrap().is_none());
        assert_eq!(session.text(&element).await.unwrap(), "text of el-1");
        assert_eq!(session.screenshot(&element).await.unwrap(), b"hello");

        let cookies = session.export_cookies().await.unwrap();
        session.import_cookies(&cookies).await.unwrap();

        session.close().await.unwrap();
        assert!(matches!(
            session.navigate("https://svc.test/").await,
            Err(ChannelError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_driver_is_an_error() {
        let launcher =
            WebDriverLauncher::new("http://127.0.0.1:1", true, Duration::from_millis(500)).unwrap();
        assert!(launcher.launch().await.is_err());
    }
}
