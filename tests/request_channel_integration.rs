//! Request channel against a local HTTP server
//!
//! Exercises the real `reqwest` client: token extraction, cookie continuity
//! between the landing page and the form post, and response classification.

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use cadence::channel::http::ReqwestHttpClient;
use cadence::channel::request::{FormStep, RequestChannel, RequestChannelConfig};
use cadence::channel::{Channel, DEFAULT_COOLDOWN_PATTERN};
use cadence::model::{ActionKind, AttemptOutcome, FailureReason, Target};
use cadence::retry::{RetryConfig, RetryPolicy};
use cadence::stop::StopSignal;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How the fake service answers form posts, one entry per post; the last
/// entry repeats
#[derive(Clone)]
struct Service {
    answers: Arc<Vec<Answer>>,
    posts: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

#[derive(Clone, Copy)]
enum Answer {
    Sent,
    Cooldown,
    RateLimited,
    Forbidden,
}

impl Service {
    fn new(answers: &[Answer]) -> Self {
        Self {
            answers: Arc::new(answers.to_vec()),
            posts: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

async fn landing() -> impl IntoResponse {
    (
        [(header::SET_COOKIE, "sid=abc123; Path=/")],
        Html(r#"<form><input type="hidden" name="token" value="tok-42"></form>"#),
    )
}

async fn send(
    State(service): State<Service>,
    headers: HeaderMap,
    Form(fields): Form<HashMap<String, String>>,
) -> Response {
    let has_session = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("sid=abc123"));
    if !has_session || fields.get("token").map(String::as_str) != Some("tok-42") {
        return (StatusCode::BAD_REQUEST, "missing session").into_response();
    }

    let index = {
        let mut posts = service.posts.lock().unwrap();
        posts.push(fields);
        posts.len() - 1
    };
    let answer = service
        .answers
        .get(index)
        .or(service.answers.last())
        .copied()
        .unwrap_or(Answer::Sent);

    match answer {
        Answer::Sent => Html("<p>Successfully sent!</p>").into_response(),
        Answer::Cooldown => Html("<p>Please wait 0 minute(s) 1 second(s)</p>").into_response(),
        Answer::RateLimited => (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, "0")],
            "slow down",
        )
            .into_response(),
        Answer::Forbidden => (StatusCode::FORBIDDEN, "banned").into_response(),
    }
}

async fn serve(service: Service) -> String {
    let app = Router::new()
        .route("/", get(landing))
        .route("/send", post(send))
        .with_state(service);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn channel(base: &str) -> RequestChannel {
    let mut fields = BTreeMap::new();
    fields.insert("token".to_string(), "{token}".to_string());
    fields.insert("url".to_string(), "{target}".to_string());
    fields.insert("service".to_string(), "{kind}".to_string());

    let config = RequestChannelConfig {
        name: "local".to_string(),
        kinds: vec![ActionKind::Like, ActionKind::View],
        landing_url: format!("{base}/"),
        token_pattern: r#"name="token" value="([^"]+)""#.to_string(),
        steps: vec![FormStep {
            url: format!("{base}/send"),
            fields,
        }],
        success_marker: Some("Successfully".to_string()),
        failure_marker: None,
        cooldown_pattern: DEFAULT_COOLDOWN_PATTERN.to_string(),
        rate_limit_cooldown: Duration::from_secs(60),
        timeout: Duration::from_secs(5),
    };
    RequestChannel::new(config, Arc::new(ReqwestHttpClient::new(Duration::from_secs(5)))).unwrap()
}

fn quick_policy() -> RetryPolicy {
    RetryPolicy::new(RetryConfig {
        backoff_min: Duration::from_millis(1),
        backoff_max: Duration::from_millis(5),
        ..Default::default()
    })
}

fn video() -> Target {
    Target::content("https://video.example/123").unwrap()
}

#[tokio::test]
async fn test_attempt_carries_token_cookie_and_target() {
    let service = Service::new(&[Answer::Sent]);
    let base = serve(service.clone()).await;

    let outcome = channel(&base).attempt(ActionKind::Like, &video()).await;
    assert_eq!(outcome, AttemptOutcome::Success);

    let posts = service.posts.lock().unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0]["url"], "https://video.example/123");
    assert_eq!(posts[0]["service"], "like");
}

#[tokio::test]
async fn test_cooldown_page_is_reported() {
    let base = serve(Service::new(&[Answer::Cooldown])).await;
    let outcome = channel(&base).attempt(ActionKind::View, &video()).await;
    assert_eq!(outcome, AttemptOutcome::CooldownRequired(Duration::from_secs(1)));
}

#[tokio::test]
async fn test_rate_limit_then_success_through_policy() {
    let base = serve(Service::new(&[Answer::RateLimited, Answer::Sent])).await;
    let channel = channel(&base);

    let result = quick_policy()
        .execute(&channel, ActionKind::Like, &video(), &StopSignal::new(), None)
        .await;

    assert!(result.succeeded);
    assert_eq!(result.attempts_used, 2);
    assert_eq!(result.cooldowns_honored, 1);
    assert_eq!(result.budgeted_attempts(), 1);
}

#[tokio::test]
async fn test_forbidden_is_fatal_without_retry() {
    let service = Service::new(&[Answer::Forbidden]);
    let base = serve(service.clone()).await;
    let channel = channel(&base);

    let result = quick_policy()
        .execute(&channel, ActionKind::Like, &video(), &StopSignal::new(), None)
        .await;

    assert!(!result.succeeded);
    assert!(matches!(result.failure, Some(FailureReason::Fatal(_))));
    assert_eq!(service.posts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unreachable_service_is_transient() {
    // Bind then drop to get a port nothing listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let outcome = channel(&base).attempt(ActionKind::Like, &video()).await;
    assert!(matches!(outcome, AttemptOutcome::TransientFailure(_)));
}
