//! Transport connection: owns the one duplex socket to the relay server and
//! keeps it alive with heartbeats and exponential-backoff reconnects.
//!
//! All state here is owned exclusively by the connection; other components
//! only read snapshots through [`Connection::state`]. Decoded envelopes are
//! handed to the client's dispatch channel in receipt order and never
//! processed here.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

use crate::envelope::Envelope;
use crate::error::{ProtocolError, TransportError};
use crate::transport::{Transport, TransportEvent, TransportFactory};
use crate::types::events::{Connected, Disconnected, EventBus};

/// Exponential backoff parameters for reconnect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub multiplier: f64,
    pub cap: Duration,
    /// Minimum spacing between consecutive attempts. A reconnect requested
    /// sooner is delayed to respect this floor.
    pub floor: Duration,
    /// Consecutive failures tolerated before giving up until the next
    /// explicit connect.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            multiplier: 1.5,
            cap: Duration::from_secs(30),
            floor: Duration::from_secs(1),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the attempt following `failures` consecutive failures.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let factor = self.multiplier.powi(failures.saturating_sub(1) as i32);
        let delay = self.base.mul_f64(factor);
        delay.min(self.cap)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub endpoint: String,
    pub heartbeat_foreground: Duration,
    pub heartbeat_background: Duration,
    pub reconnect: ReconnectPolicy,
}

impl ConnectionConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            heartbeat_foreground: Duration::from_secs(15),
            heartbeat_background: Duration::from_secs(30),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Read-only view of the connection state.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub connected: bool,
    pub reconnect_attempts: u32,
    pub last_attempt: Option<Instant>,
    pub should_reconnect: bool,
}

pub struct Connection {
    config: ConnectionConfig,
    factory: Arc<dyn TransportFactory>,
    inbound_tx: mpsc::Sender<Envelope>,
    bus: Arc<EventBus>,

    transport: tokio::sync::Mutex<Option<Arc<dyn Transport>>>,
    connected: AtomicBool,
    attempts: AtomicU32,
    should_reconnect: AtomicBool,
    /// Set once a register envelope has been written on the live connection;
    /// cleared on every disconnect. Suppresses duplicate registrations.
    registered: AtomicBool,
    background: AtomicBool,
    is_connecting: AtomicBool,
    reconnect_pending: AtomicBool,
    expected_disconnect: AtomicBool,
    last_attempt: std::sync::Mutex<Option<Instant>>,
    reconnect_timer: std::sync::Mutex<Option<JoinHandle<()>>>,
    /// Incremented per established connection; receive/heartbeat tasks carry
    /// their generation so a stale task cannot tear down its successor.
    generation: AtomicU64,
    shutdown: Notify,
}

impl Connection {
    pub fn new(
        config: ConnectionConfig,
        factory: Arc<dyn TransportFactory>,
        inbound_tx: mpsc::Sender<Envelope>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            factory,
            inbound_tx,
            bus,
            transport: tokio::sync::Mutex::new(None),
            connected: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
            should_reconnect: AtomicBool::new(true),
            registered: AtomicBool::new(false),
            background: AtomicBool::new(false),
            is_connecting: AtomicBool::new(false),
            reconnect_pending: AtomicBool::new(false),
            expected_disconnect: AtomicBool::new(false),
            last_attempt: std::sync::Mutex::new(None),
            reconnect_timer: std::sync::Mutex::new(None),
            generation: AtomicU64::new(0),
            shutdown: Notify::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState {
            connected: self.connected.load(Ordering::Acquire),
            reconnect_attempts: self.attempts.load(Ordering::Acquire),
            last_attempt: *self.last_attempt.lock().unwrap(),
            should_reconnect: self.should_reconnect.load(Ordering::Acquire),
        }
    }

    /// Switches the heartbeat cadence. Takes effect on the next tick.
    pub fn set_background(&self, background: bool) {
        self.background.store(background, Ordering::Release);
    }

    /// Opens the socket. A no-op while another connect attempt is in flight.
    /// Cancels any pending reconnect timer and re-enables reconnection.
    pub async fn connect(self: &Arc<Self>) -> Result<(), TransportError> {
        if self.is_connecting.swap(true, Ordering::SeqCst) {
            debug!(target: "Connection", "connect called while already connecting; ignoring");
            return Ok(());
        }
        let _guard = scopeguard::guard((), |_| {
            self.is_connecting.store(false, Ordering::Release);
        });

        if self.is_connected() {
            debug!(target: "Connection", "connect called while connected; ignoring");
            return Ok(());
        }

        self.cancel_reconnect_timer();
        self.attempts.store(0, Ordering::Release);
        self.should_reconnect.store(true, Ordering::Release);
        self.expected_disconnect.store(false, Ordering::Release);

        match self.establish().await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(target: "Connection", "connect failed: {e}");
                self.schedule_reconnect();
                Err(e)
            }
        }
    }

    /// Deliberate shutdown. Disables reconnection until the next explicit
    /// [`Connection::connect`].
    pub async fn disconnect(&self) {
        info!(target: "Connection", "disconnecting");
        self.should_reconnect.store(false, Ordering::Release);
        self.expected_disconnect.store(true, Ordering::Release);
        self.cancel_reconnect_timer();
        self.shutdown.notify_waiters();

        if let Some(transport) = self.transport.lock().await.take() {
            transport.disconnect().await;
        }
        self.registered.store(false, Ordering::Release);
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self
                .bus
                .disconnected
                .send(Arc::new(Disconnected { will_retry: false }));
        }
    }

    /// Serializes and writes one envelope. A register envelope is dropped if
    /// this connection has already registered. A write failure marks the
    /// connection unhealthy and schedules a reconnect if enabled.
    pub async fn send(self: &Arc<Self>, envelope: &Envelope) -> Result<(), TransportError> {
        let is_register = matches!(envelope, Envelope::Register { .. });
        if is_register && self.registered.load(Ordering::Acquire) {
            debug!(target: "Connection", "already registered on this connection; dropping duplicate register");
            return Ok(());
        }

        // The generation is captured with the transport handle: a failure on
        // this transport must tear down this connection, not a successor
        // established while the write was in flight.
        let (transport, generation) = {
            let guard = self.transport.lock().await;
            let transport = guard.clone().ok_or(TransportError::NotConnected)?;
            (transport, self.generation.load(Ordering::Acquire))
        };
        let frame = envelope
            .to_wire()
            .map_err(|e| TransportError::Send(anyhow::anyhow!(e)))?;

        match transport.send_frame(&frame).await {
            Ok(()) => {
                if is_register {
                    self.registered.store(true, Ordering::Release);
                }
                Ok(())
            }
            Err(e) => {
                warn!(target: "Connection", "write failed for {}: {e}", envelope.kind());
                self.connection_lost(generation).await;
                Err(TransportError::Send(e))
            }
        }
    }

    /// Dials the transport and starts the receive and heartbeat tasks.
    async fn establish(self: &Arc<Self>) -> Result<(), TransportError> {
        *self.last_attempt.lock().unwrap() = Some(Instant::now());

        let (transport, events) = match self
            .factory
            .create_transport(&self.config.endpoint)
            .await
        {
            Ok(pair) => pair,
            Err(e) => {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                return Err(TransportError::Connect(e));
            }
        };

        *self.transport.lock().await = Some(transport);
        self.attempts.store(0, Ordering::Release);
        self.registered.store(false, Ordering::Release);
        self.connected.store(true, Ordering::Release);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        tokio::spawn(self.clone().receive_loop(events, generation));
        tokio::spawn(self.clone().heartbeat_loop(generation));

        info!(target: "Connection", "connected to {}", self.config.endpoint);
        let _ = self.bus.connected.send(Arc::new(Connected));
        Ok(())
    }

    /// Consumes transport events for one connection generation. Parsed
    /// envelopes are forwarded in receipt order; parse failures are dropped
    /// without interrupting the loop.
    async fn receive_loop(
        self: Arc<Self>,
        mut events: mpsc::Receiver<TransportEvent>,
        generation: u64,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::FrameReceived(frame)) => {
                        match Envelope::parse(&frame) {
                            Ok(envelope) => {
                                if self.inbound_tx.send(envelope).await.is_err() {
                                    debug!(target: "Connection", "dispatch channel closed, exiting receive loop");
                                    return;
                                }
                            }
                            Err(ProtocolError::UnknownType(t)) => {
                                debug!(target: "Connection", "dropping envelope with unknown type {t:?}");
                            }
                            Err(e) => {
                                warn!(target: "Connection", "dropping malformed envelope: {e}");
                            }
                        }
                    }
                    Some(TransportEvent::Connected) => {
                        debug!(target: "Connection", "transport reports connected");
                    }
                    Some(TransportEvent::Disconnected) | None => {
                        self.connection_lost(generation).await;
                        return;
                    }
                },
                _ = self.shutdown.notified() => {
                    debug!(target: "Connection", "shutdown signaled, exiting receive loop");
                    return;
                }
            }
        }
    }

    /// Sends a transport-level ping on a fixed cadence. A ping failure is a
    /// connectivity loss and feeds the same reconnect policy.
    async fn heartbeat_loop(self: Arc<Self>, generation: u64) {
        loop {
            let interval = if self.background.load(Ordering::Acquire) {
                self.config.heartbeat_background
            } else {
                self.config.heartbeat_foreground
            };

            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if self.generation.load(Ordering::Acquire) != generation
                        || !self.is_connected()
                    {
                        debug!(target: "Connection/Heartbeat", "connection gone, exiting heartbeat loop");
                        return;
                    }
                    let transport = self.transport.lock().await.clone();
                    let Some(transport) = transport else { return };
                    debug!(target: "Connection/Heartbeat", "sending ping");
                    if let Err(e) = transport.ping().await {
                        let e = TransportError::Ping(e);
                        warn!(target: "Connection/Heartbeat", "{e}");
                        self.connection_lost(generation).await;
                        return;
                    }
                }
                _ = self.shutdown.notified() => {
                    debug!(target: "Connection/Heartbeat", "shutdown signaled, exiting heartbeat loop");
                    return;
                }
            }
        }
    }

    /// Marks the connection unhealthy and, unless the disconnect was
    /// deliberate, schedules a reconnect. Idempotent per generation.
    async fn connection_lost(self: &Arc<Self>, generation: u64) {
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        self.transport.lock().await.take();
        self.registered.store(false, Ordering::Release);

        let will_retry = !self.expected_disconnect.load(Ordering::Acquire)
            && self.should_reconnect.load(Ordering::Acquire);
        warn!(target: "Connection", "connection lost (will_retry: {will_retry})");
        let _ = self
            .bus
            .disconnected
            .send(Arc::new(Disconnected { will_retry }));
        if will_retry {
            self.schedule_reconnect();
        }
    }

    /// Arms the reconnect timer. Only one attempt may be in flight at a time;
    /// further requests while one is pending are ignored.
    fn schedule_reconnect(self: &Arc<Self>) {
        if !self.should_reconnect.load(Ordering::Acquire) {
            return;
        }
        if self.reconnect_pending.swap(true, Ordering::SeqCst) {
            debug!(target: "Connection", "reconnect already pending");
            return;
        }

        let this = self.clone();
        let handle = tokio::spawn(async move {
            let failures = this.attempts.load(Ordering::Acquire);
            let policy = &this.config.reconnect;
            if failures >= policy.max_attempts {
                warn!(
                    target: "Connection",
                    "giving up after {failures} consecutive failures; waiting for explicit connect"
                );
                this.should_reconnect.store(false, Ordering::Release);
                this.reconnect_pending.store(false, Ordering::Release);
                let _ = this
                    .bus
                    .disconnected
                    .send(Arc::new(Disconnected { will_retry: false }));
                return;
            }

            let mut delay = policy.delay_for(failures);
            if let Some(last) = *this.last_attempt.lock().unwrap() {
                let since = last.elapsed();
                if since + delay < policy.floor {
                    delay = policy.floor - since;
                }
            }
            info!(
                target: "Connection",
                "reconnect attempt {} in {:?}",
                failures + 1,
                delay
            );
            tokio::time::sleep(delay).await;
            this.reconnect_pending.store(false, Ordering::Release);

            match this.establish().await {
                Ok(()) => info!(target: "Connection", "reconnected"),
                Err(e) => {
                    warn!(target: "Connection", "reconnect failed: {e}");
                    this.schedule_reconnect();
                }
            }
        });
        *self.reconnect_timer.lock().unwrap() = Some(handle);
    }

    fn cancel_reconnect_timer(&self) {
        if let Some(handle) = self.reconnect_timer.lock().unwrap().take() {
            handle.abort();
        }
        self.reconnect_pending.store(false, Ordering::Release);
    }
}
