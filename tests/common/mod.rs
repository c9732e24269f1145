//! Shared scripted doubles for integration tests: an in-memory transport the
//! tests can push frames into, and a media engine that never touches a real
//! network.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use relay_session::calls::{MediaEngine, MediaEngineEvent, MediaEngineFactory};
use relay_session::envelope::IceCandidateData;
use relay_session::transport::{Transport, TransportEvent, TransportFactory};

/// Enables `RUST_LOG`-controlled output for a test run.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A transport that records every outbound frame.
pub struct ScriptedTransport {
    pub sent: Arc<Mutex<Vec<String>>>,
    fail_sends: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send_frame(&self, frame: &str) -> Result<(), anyhow::Error> {
        if self.fail_sends.load(Ordering::SeqCst) {
            anyhow::bail!("write refused");
        }
        self.sent.lock().await.push(frame.to_string());
        Ok(())
    }

    async fn ping(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }

    async fn disconnect(&self) {}
}

/// Factory handing out [`ScriptedTransport`]s and keeping the server-side
/// handle so tests can inject inbound frames or a connection loss.
#[derive(Default)]
pub struct ScriptedFactory {
    pub sent: Arc<Mutex<Vec<String>>>,
    fail_sends: Arc<AtomicBool>,
    server: StdMutex<Option<mpsc::Sender<TransportEvent>>>,
}

impl ScriptedFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pushes one inbound frame, as if the relay had sent it.
    pub async fn push_frame(&self, frame: &str) {
        let tx = self
            .server
            .lock()
            .unwrap()
            .clone()
            .expect("no live transport");
        tx.send(TransportEvent::FrameReceived(frame.to_string()))
            .await
            .expect("transport event channel closed");
    }

    pub async fn drop_connection(&self) {
        let tx = self
            .server
            .lock()
            .unwrap()
            .clone()
            .expect("no live transport");
        let _ = tx.send(TransportEvent::Disconnected).await;
    }

    pub async fn sent_frames(&self) -> Vec<String> {
        self.sent.lock().await.clone()
    }

    /// Makes every transport handed out so far (and later) refuse writes.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransportFactory for ScriptedFactory {
    async fn create_transport(
        &self,
        _endpoint: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        let (tx, rx) = mpsc::channel(100);
        *self.server.lock().unwrap() = Some(tx);
        Ok((
            Arc::new(ScriptedTransport {
                sent: self.sent.clone(),
                fail_sends: self.fail_sends.clone(),
            }),
            rx,
        ))
    }
}

/// A media engine that answers with canned SDP and records what it was fed.
pub struct FakeMediaEngine {
    pub remote_descriptions: Arc<Mutex<Vec<String>>>,
    pub candidates: Arc<Mutex<Vec<IceCandidateData>>>,
}

#[async_trait]
impl MediaEngine for FakeMediaEngine {
    async fn create_offer(&self, _video: bool) -> Result<String, anyhow::Error> {
        Ok("offer-sdp".to_string())
    }

    async fn create_answer(&self, _video: bool) -> Result<String, anyhow::Error> {
        Ok("answer-sdp".to_string())
    }

    async fn set_remote_description(&self, sdp: &str) -> Result<(), anyhow::Error> {
        self.remote_descriptions.lock().await.push(sdp.to_string());
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidateData) -> Result<(), anyhow::Error> {
        self.candidates.lock().await.push(candidate.clone());
        Ok(())
    }

    async fn close(&self) {}
}

#[derive(Default)]
pub struct FakeMediaFactory {
    pub remote_descriptions: Arc<Mutex<Vec<String>>>,
    pub candidates: Arc<Mutex<Vec<IceCandidateData>>>,
    events: StdMutex<Option<mpsc::Sender<MediaEngineEvent>>>,
}

impl FakeMediaFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Emits an event from the current engine, as a real stack would from its
    /// own callbacks.
    pub async fn emit(&self, event: MediaEngineEvent) {
        let tx = self
            .events
            .lock()
            .unwrap()
            .clone()
            .expect("no live media engine");
        tx.send(event).await.expect("media event channel closed");
    }
}

#[async_trait]
impl MediaEngineFactory for FakeMediaFactory {
    async fn create_engine(
        &self,
    ) -> Result<(Arc<dyn MediaEngine>, mpsc::Receiver<MediaEngineEvent>), anyhow::Error> {
        let (tx, rx) = mpsc::channel(100);
        *self.events.lock().unwrap() = Some(tx);
        Ok((
            Arc::new(FakeMediaEngine {
                remote_descriptions: self.remote_descriptions.clone(),
                candidates: self.candidates.clone(),
            }),
            rx,
        ))
    }
}

/// Polls `condition` until it holds or the deadline passes. The deadline is
/// generous because paused-clock tests auto-advance through the sleeps.
pub async fn wait_for<F>(what: &str, condition: F)
where
    F: AsyncFnMut() -> bool,
{
    wait_for_within(what, Duration::from_secs(10), condition).await;
}

/// [`wait_for`] with an explicit deadline, for flows whose own sleeps (for
/// example a full backoff schedule) outlast the default.
pub async fn wait_for_within<F>(what: &str, deadline: Duration, mut condition: F)
where
    F: AsyncFnMut() -> bool,
{
    let poll = Duration::from_millis(10);
    let result = tokio::time::timeout(deadline, async {
        while !condition().await {
            tokio::time::sleep(poll).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}
