use super::mock::{FakeBrowser, MemoryArtifactStore, ScriptedSolver};
use super::*;

const HOME: &str = "https://svc.test/home";

fn manager_with(
    browser: &FakeBrowser,
    gate: Option<Arc<dyn SessionGate>>,
    store: Arc<MemoryArtifactStore>,
    timeout: Duration,
) -> SessionManager {
    let mut manager = SessionManager::new(store, timeout);
    manager.register(
        "web",
        SessionSpec {
            launcher: Arc::new(browser.clone()),
            home_url: HOME.to_string(),
            gate,
        },
    );
    manager
}

fn captcha(solver: Arc<ScriptedSolver>, store: Arc<MemoryArtifactStore>) -> Arc<dyn SessionGate> {
    Arc::new(CaptchaGate::new(
        GateConfig {
            page_url: None,
            image_selector: "#captcha".into(),
            input_selector: "#answer".into(),
            submit_selector: "#go".into(),
            ready_selector: "#home".into(),
            max_rounds: 3,
            element_wait: Duration::from_millis(10),
        },
        solver,
        store,
    ))
}

#[tokio::test]
async fn test_session_is_created_once_and_reused() {
    let browser = FakeBrowser::new();
    let store = Arc::new(MemoryArtifactStore::default());
    let manager = manager_with(&browser, None, store.clone(), Duration::from_secs(1));

    assert_eq!(manager.state("web"), Some(SessionState::Uninitialized));
    {
        let mut lease = manager.acquire("web").await.unwrap();
        lease.session().unwrap().navigate("https://svc.test/a").await.unwrap();
    }
    let _lease = manager.acquire("web").await.unwrap();

    assert_eq!(browser.launches(), 1);
    assert_eq!(manager.state("web"), Some(SessionState::Ready));
    assert!(store.cookies("web").is_some());
}

#[tokio::test]
async fn test_saved_cookies_are_restored() {
    let browser = FakeBrowser::new();
    let store = Arc::new(MemoryArtifactStore::with_cookies("web", b"saved"));
    let manager = manager_with(&browser, None, store, Duration::from_secs(1));

    let _lease = manager.acquire("web").await.unwrap();
    assert_eq!(browser.imported(), vec![b"saved".to_vec()]);
    assert_eq!(browser.visited(), vec![HOME.to_string(), HOME.to_string()]);
}

#[tokio::test]
async fn test_gate_moves_through_awaiting_input() {
    let browser = FakeBrowser::new()
        .with_elements(&["#captcha", "#answer", "#go"])
        .reveal_on_answer("ok", "#home");
    let store = Arc::new(MemoryArtifactStore::default());
    let solver = Arc::new(ScriptedSolver::new(&["ok"]));
    let manager = manager_with(
        &browser,
        Some(captcha(solver.clone(), store.clone())),
        store,
        Duration::from_secs(1),
    );

    let mut states = manager.subscribe("web").unwrap();
    let _lease = manager.acquire("web").await.unwrap();

    assert_eq!(solver.asked(), 1);
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), SessionState::Ready);
}

#[tokio::test]
async fn test_unanswered_challenge_times_out_and_fails() {
    let browser = FakeBrowser::new().with_elements(&["#captcha", "#answer", "#go"]);
    let store = Arc::new(MemoryArtifactStore::default());
    let solver = Arc::new(ScriptedSolver::new(&[]));
    let manager = manager_with(
        &browser,
        Some(captcha(solver, store.clone())),
        store,
        Duration::from_millis(50),
    );

    let err = manager.acquire("web").await.err().unwrap();
    assert!(matches!(err, SessionError::ChallengeTimeout { .. }));
    assert_eq!(manager.state("web"), Some(SessionState::Failed));
    assert_eq!(browser.closed_sessions(), 1);

    // Failed sessions are not retried within the run
    assert!(matches!(
        manager.acquire("web").await.err().unwrap(),
        SessionError::Failed(_)
    ));
    assert_eq!(browser.launches(), 1);

    manager.reset(StopSignal::new()).await;
    assert_eq!(manager.state("web"), Some(SessionState::Uninitialized));
}

#[tokio::test]
async fn test_stop_interrupts_challenge_wait() {
    let browser = FakeBrowser::new().with_elements(&["#captcha", "#answer", "#go"]);
    let store = Arc::new(MemoryArtifactStore::default());
    let manager = Arc::new(manager_with(
        &browser,
        Some(captcha(Arc::new(ScriptedSolver::new(&[])), store.clone())),
        store,
        Duration::from_secs(60),
    ));
    let stop = StopSignal::new();
    manager.reset(stop.clone()).await;

    let acquiring = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.acquire("web").await.err() })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    stop.trigger();

    let err = tokio::time::timeout(Duration::from_secs(1), acquiring)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(matches!(err, SessionError::Interrupted { .. }));
    // Interrupted, not failed: the half-built session is closed and the
    // channel stays eligible for the next run
    assert_eq!(manager.state("web"), Some(SessionState::Uninitialized));
    assert_eq!(browser.closed_sessions(), 1);
}

#[tokio::test]
async fn test_launch_failure_marks_failed() {
    let browser = FakeBrowser::new().failing_launch();
    let manager = manager_with(
        &browser,
        None,
        Arc::new(MemoryArtifactStore::default()),
        Duration::from_secs(1),
    );

    assert!(matches!(
        manager.acquire("web").await.err().unwrap(),
        SessionError::Launch { .. }
    ));
    assert_eq!(manager.state("web"), Some(SessionState::Failed));
}

#[tokio::test]
async fn test_concurrent_acquire_creates_single_session() {
    let browser = FakeBrowser::new().with_launch_delay(Duration::from_millis(20));
    let manager = Arc::new(manager_with(
        &browser,
        None,
        Arc::new(MemoryArtifactStore::default()),
        Duration::from_secs(1),
    ));

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.acquire("web").await.is_ok() })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap());
    }
    assert_eq!(browser.launches(), 1);
}

#[tokio::test]
async fn test_discard_and_release() {
    let browser = FakeBrowser::new();
    let manager = manager_with(
        &browser,
        None,
        Arc::new(MemoryArtifactStore::default()),
        Duration::from_secs(1),
    );

    let lease = manager.acquire("web").await.unwrap();
    lease.discard().await;
    assert_eq!(manager.state("web"), Some(SessionState::Uninitialized));

    let _ = manager.acquire("web").await.unwrap();
    assert_eq!(browser.launches(), 2);

    manager.release_all().await;
    assert_eq!(manager.state("web"), Some(SessionState::Closed));
    assert_eq!(browser.closed_sessions(), 2);

    assert!(matches!(
        manager.acquire("missing").await.err().unwrap(),
        SessionError::NotRegistered(_)
    ));
}
