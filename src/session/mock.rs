//! In-memory browser, solver and store doubles for session tests

use super::solver::{ChallengeImage, ChallengeSolver};
use super::store::ArtifactStore;
use super::SessionError;
use crate::channel::browser::{BrowserLauncher, BrowserSession, ElementRef};
use crate::channel::ChannelError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct PageState {
    present: HashSet<String>,
    texts: HashMap<String, String>,
    answer_reveals: Vec<(String, String)>,
    visited: Vec<String>,
    filled: Vec<String>,
    clicked: Vec<String>,
    imported: Vec<Vec<u8>>,
    closed_sessions: usize,
    lose_after_finds: Option<usize>,
    finds: usize,
}

/// A fake page whose elements are addressed by their selector
///
/// Every session launched from the same `FakeBrowser` shares one page.
#[derive(Clone, Default)]
pub struct FakeBrowser {
    page: Arc<Mutex<PageState>>,
    launches: Arc<AtomicUsize>,
    fail_launch: bool,
    launch_delay: Duration,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_elements(self, selectors: &[&str]) -> Self {
        self.page
            .lock()
            .unwrap()
            .present
            .extend(selectors.iter().map(|s| s.to_string()));
        self
    }

    pub fn with_text(self, selector: &str, text: &str) -> Self {
        {
            let mut page = self.page.lock().unwrap();
            page.present.insert(selector.to_string());
            page.texts.insert(selector.to_string(), text.to_string());
        }
        self
    }

    /// Make `selector` appear once `answer` is typed anywhere
    pub fn reveal_on_answer(self, answer: &str, selector: &str) -> Self {
        self.page
            .lock()
            .unwrap()
            .answer_reveals
            .push((answer.to_string(), selector.to_string()));
        self
    }

    /// After `finds` element lookups every command reports a lost session
    pub fn lose_session_after(self, finds: usize) -> Self {
        self.page.lock().unwrap().lose_after_finds = Some(finds);
        self
    }

    pub fn failing_launch(mut self) -> Self {
        self.fail_launch = true;
        self
    }

    pub fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = delay;
        self
    }

    pub fn session(&self) -> FakeSession {
        FakeSession {
            page: self.page.clone(),
            closed: false,
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn visited(&self) -> Vec<String> {
        self.page.lock().unwrap().visited.clone()
    }

    pub fn filled(&self) -> Vec<String> {
        self.page.lock().unwrap().filled.clone()
    }

    pub fn clicked(&self) -> Vec<String> {
        self.page.lock().unwrap().clicked.clone()
    }

    pub fn imported(&self) -> Vec<Vec<u8>> {
        self.page.lock().unwrap().imported.clone()
    }

    pub fn closed_sessions(&self) -> usize {
        self.page.lock().unwrap().closed_sessions
    }
}

#[async_trait]
impl BrowserLauncher for FakeBrowser {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, ChannelError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if !self.launch_delay.is_zero() {
            tokio::time::sleep(self.launch_delay).await;
        }
        if self.fail_launch {
            return Err(ChannelError::Http("connection refused".into()));
        }
        Ok(Box::new(self.session()))
    }
}

pub struct FakeSession {
    page: Arc<Mutex<PageState>>,
    closed: bool,
}

impl FakeSession {
    fn check(&self) -> Result<(), ChannelError> {
        let page = self.page.lock().unwrap();
        let lost = page.lose_after_finds.is_some_and(|limit| page.finds > limit);
        if self.closed || lost {
            Err(ChannelError::SessionClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&mut self, url: &str) -> Result<(), ChannelError> {
        self.check()?;
        self.page.lock().unwrap().visited.push(url.to_string());
        Ok(())
    }

    async fn find(&mut self, selector: &str) -> Result<Option<ElementRef>, ChannelError> {
        self.page.lock().unwrap().finds += 1;
        self.check()?;
        let page = self.page.lock().unwrap();
        Ok(page
            .present
            .contains(selector)
            .then(|| ElementRef(selector.to_string())))
    }

    async fn fill(&mut self, _element: &ElementRef, text: &str) -> Result<(), ChannelError> {
        self.check()?;
        let mut page = self.page.lock().unwrap();
        page.filled.push(text.to_string());
        let reveals: Vec<String> = page
            .answer_reveals
            .iter()
            .filter(|(answer, _)| answer == text)
            .map(|(_, selector)| selector.clone())
            .collect();
        page.present.extend(reveals);
        Ok(())
    }

    async fn click(&mut self, element: &ElementRef) -> Result<(), ChannelError> {
        self.check()?;
        self.page.lock().unwrap().clicked.push(element.0.clone());
        Ok(())
    }

    async fn text(&mut self, element: &ElementRef) -> Result<String, ChannelError> {
        self.check()?;
        let page = self.page.lock().unwrap();
        Ok(page.texts.get(&element.0).cloned().unwrap_or_default())
    }

    async fn screenshot(&mut self, element: &ElementRef) -> Result<Vec<u8>, ChannelError> {
        self.check()?;
        Ok(format!("image of {}", element.0).into_bytes())
    }

    async fn current_url(&mut self) -> Result<String, ChannelError> {
        self.check()?;
        let page = self.page.lock().unwrap();
        Ok(page.visited.last().cloned().unwrap_or_default())
    }

    async fn export_cookies(&mut self) -> Result<Vec<u8>, ChannelError> {
        self.check()?;
        Ok(b"[\"fake-cookie\"]".to_vec())
    }

    async fn import_cookies(&mut self, blob: &[u8]) -> Result<(), ChannelError> {
        self.check()?;
        self.page.lock().unwrap().imported.push(blob.to_vec());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        if !self.closed {
            self.closed = true;
            self.page.lock().unwrap().closed_sessions += 1;
        }
        Ok(())
    }
}

/// Returns canned answers in order; blocks forever once they run out
pub struct ScriptedSolver {
    answers: Mutex<VecDeque<String>>,
    asked: AtomicUsize,
}

impl ScriptedSolver {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().map(|a| a.to_string()).collect()),
            asked: AtomicUsize::new(0),
        }
    }

    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChallengeSolver for ScriptedSolver {
    async fn solve(&self, _channel: &str, _image: &ChallengeImage) -> Result<String, SessionError> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        let next = self.answers.lock().unwrap().pop_front();
        match next {
            Some(answer) => Ok(answer),
            None => std::future::pending().await,
        }
    }
}

/// Keeps artifacts in memory
#[derive(Default)]
pub struct MemoryArtifactStore {
    cookies: Mutex<HashMap<String, Vec<u8>>>,
    challenges: AtomicUsize,
}

impl MemoryArtifactStore {
    pub fn with_cookies(channel: &str, blob: &[u8]) -> Self {
        let store = Self::default();
        store
            .cookies
            .lock()
            .unwrap()
            .insert(channel.to_string(), blob.to_vec());
        store
    }

    pub fn cookies(&self, channel: &str) -> Option<Vec<u8>> {
        self.cookies.lock().unwrap().get(channel).cloned()
    }

    pub fn challenges(&self) -> usize {
        self.challenges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn load_cookies(&self, channel: &str) -> Result<Option<Vec<u8>>, SessionError> {
        Ok(self.cookies(channel))
    }

    async fn save_cookies(&self, channel: &str, blob: &[u8]) -> Result<(), SessionError> {
        self.cookies
            .lock()
            .unwrap()
            .insert(channel.to_string(), blob.to_vec());
        Ok(())
    }

    async fn save_challenge(
        &self,
        channel: &str,
        _image: &[u8],
    ) -> Result<Option<PathBuf>, SessionError> {
        let n = self.challenges.fetch_add(1, Ordering::SeqCst);
        Ok(Some(PathBuf::from(format!("{channel}-{n}.png"))))
    }
}
