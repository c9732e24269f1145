//! Client composition root.
//!
//! Wires the connection, session store, call manager, and router together
//! and runs the single dispatch task that serializes every state mutation.
//! Public methods funnel through the same locks the dispatch task uses, so
//! inbound envelopes and local commands never interleave mid-mutation.

use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::calls::{CallLogRecord, CallManager, CallPhase, MediaEngineEvent, MediaEngineFactory};
use crate::connection::{Connection, ConnectionConfig, ConnectionState};
use crate::envelope::Envelope;
use crate::error::{ClientError, StoreError};
use crate::router::{Route, Router};
use crate::store::{FileRef, KeyValueStore, SessionStore};
use crate::transport::TransportFactory;
use crate::types::events::{Connected, EventBus};
use crate::types::message::now_ms;

const DISPATCH_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connection: ConnectionConfig,
    /// Identity announced in the register envelope; also the sender name on
    /// everything this client puts on the wire.
    pub client_id: String,
    /// Human-readable name shown to peers. Defaults to the client id.
    pub display_name: String,
    pub is_admin: bool,
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>, client_id: impl Into<String>) -> Self {
        let client_id = client_id.into();
        Self {
            connection: ConnectionConfig::new(endpoint),
            display_name: client_id.clone(),
            client_id,
            is_admin: false,
        }
    }
}

pub struct Client {
    config: ClientConfig,
    connection: Arc<Connection>,
    store: Arc<Mutex<SessionStore>>,
    calls: Arc<Mutex<CallManager>>,
    bus: Arc<EventBus>,
    dispatch: JoinHandle<()>,
}

impl Client {
    /// Builds the client and starts its dispatch task. The connection is not
    /// opened until [`Client::connect`].
    pub async fn new(
        config: ClientConfig,
        transport_factory: Arc<dyn TransportFactory>,
        engine_factory: Arc<dyn MediaEngineFactory>,
        kv: Arc<dyn KeyValueStore>,
    ) -> Result<Arc<Self>, StoreError> {
        let bus = Arc::new(EventBus::new());
        let (inbound_tx, inbound_rx) = mpsc::channel(DISPATCH_CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(DISPATCH_CHANNEL_CAPACITY);
        let (media_tx, media_rx) = mpsc::channel(DISPATCH_CHANNEL_CAPACITY);

        let connection = Arc::new(Connection::new(
            config.connection.clone(),
            transport_factory,
            inbound_tx,
            bus.clone(),
        ));
        let store = Arc::new(Mutex::new(
            SessionStore::new(config.client_id.clone(), kv, bus.clone()).await?,
        ));
        let calls = Arc::new(Mutex::new(CallManager::new(
            config.client_id.clone(),
            engine_factory,
            bus.clone(),
            outbound_tx,
            media_tx,
        )));

        // Subscribed before the dispatch task exists, so a connection that
        // completes before the task is first polled still registers.
        let connected_rx = bus.connected.subscribe();
        let dispatch = tokio::spawn(dispatch_loop(DispatchContext {
            connection: connection.clone(),
            store: store.clone(),
            calls: calls.clone(),
            register: Envelope::Register {
                client_id: config.client_id.clone(),
                is_admin: config.is_admin,
                name: config.display_name.clone(),
            },
            local_identity: config.client_id.clone(),
            inbound_rx,
            outbound_rx,
            media_rx,
            connected_rx,
        }));

        Ok(Arc::new(Self {
            config,
            connection,
            store,
            calls,
            bus,
            dispatch,
        }))
    }

    // ---- connection --------------------------------------------------------

    /// Opens the socket. Registration is sent automatically on every
    /// (re)connection by the dispatch task.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.connection.connect().await?;
        Ok(())
    }

    /// Deliberate shutdown: stops reconnecting and drops every unconfirmed
    /// optimistic message.
    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
        self.store.lock().await.fail_all_pending();
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Switches the heartbeat cadence between foreground and background.
    pub fn set_background(&self, background: bool) {
        self.connection.set_background(background);
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    /// Shared session state, for read access and UI snapshots.
    pub fn store(&self) -> Arc<Mutex<SessionStore>> {
        self.store.clone()
    }

    // ---- messaging ---------------------------------------------------------

    /// Sends a chat message optimistically. On a write failure the optimistic
    /// entry is rolled back before the error is returned.
    pub async fn send_chat(
        &self,
        session_id: &str,
        text: impl Into<String>,
    ) -> Result<(), ClientError> {
        let text = text.into();
        let envelope = self.store.lock().await.send_chat(session_id, text.clone());
        let timestamp = match &envelope {
            Envelope::Chat { timestamp, .. } => *timestamp,
            _ => unreachable!("send_chat builds a chat envelope"),
        };
        if let Err(e) = self.connection.send(&envelope).await {
            self.store
                .lock()
                .await
                .fail_pending(session_id, timestamp, &text);
            return Err(e.into());
        }
        Ok(())
    }

    /// Sends a file reference (the upload itself happens out of band).
    pub async fn send_file(&self, session_id: &str, file: FileRef) -> Result<(), ClientError> {
        let token = file.file_name.clone();
        let envelope = self.store.lock().await.send_file(session_id, file);
        let timestamp = match &envelope {
            Envelope::File { timestamp, .. } => *timestamp,
            _ => unreachable!("send_file builds a file envelope"),
        };
        if let Err(e) = self.connection.send(&envelope).await {
            self.store
                .lock()
                .await
                .fail_pending(session_id, timestamp, &token);
            return Err(e.into());
        }
        Ok(())
    }

    // ---- session lifecycle -------------------------------------------------

    pub async fn close_session(&self, session_id: &str) -> Result<(), ClientError> {
        let envelope = self.store.lock().await.close_session(session_id).await;
        self.connection.send(&envelope).await?;
        Ok(())
    }

    pub async fn archive_session(&self, session_id: &str) -> Result<(), ClientError> {
        let envelope = self.store.lock().await.archive_session(session_id).await;
        self.connection.send(&envelope).await?;
        Ok(())
    }

    pub async fn restore_session(&self, session_id: &str) -> Result<(), ClientError> {
        let envelope = self.store.lock().await.restore_session(session_id).await;
        self.connection.send(&envelope).await?;
        Ok(())
    }

    /// Bookmarks the newest message in the session as read.
    pub async fn mark_read(&self, session_id: &str) -> Result<(), ClientError> {
        self.store.lock().await.mark_read(session_id).await?;
        Ok(())
    }

    pub async fn set_focus(&self, session_id: Option<String>) {
        self.store.lock().await.set_focus(session_id);
    }

    /// Asks the relay for the presence of a session's remote participant.
    pub async fn request_presence(&self, session_id: &str) -> Result<(), ClientError> {
        let envelope = self.store.lock().await.presence_query(session_id);
        self.connection.send(&envelope).await?;
        Ok(())
    }

    // ---- calls -------------------------------------------------------------

    /// Places an outgoing call to the session's remote participant. Returns
    /// the allocated call id.
    pub async fn start_call(
        &self,
        session_id: &str,
        peer_name: &str,
        video: bool,
    ) -> Result<String, ClientError> {
        let call_id = self
            .calls
            .lock()
            .await
            .start_call(session_id, peer_name, video)
            .await?;
        Ok(call_id)
    }

    pub async fn accept_call(&self) -> Result<(), ClientError> {
        self.calls.lock().await.accept_call().await?;
        Ok(())
    }

    pub async fn decline_call(&self) -> Result<(), ClientError> {
        self.calls.lock().await.decline_call().await?;
        Ok(())
    }

    /// Hangs up. A call that had connected time produces a call-log entry in
    /// its session, both locally and on the relay.
    pub async fn end_call(&self) -> Result<(), ClientError> {
        let record = self.calls.lock().await.end_call().await?;
        if let Some(record) = record {
            commit_call_log(
                &self.connection,
                &self.store,
                &self.config.client_id,
                record,
            )
            .await;
        }
        Ok(())
    }

    pub async fn call_phase(&self) -> CallPhase {
        self.calls.lock().await.phase()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.dispatch.abort();
    }
}

struct DispatchContext {
    connection: Arc<Connection>,
    store: Arc<Mutex<SessionStore>>,
    calls: Arc<Mutex<CallManager>>,
    register: Envelope,
    local_identity: String,
    inbound_rx: mpsc::Receiver<Envelope>,
    outbound_rx: mpsc::Receiver<Envelope>,
    media_rx: mpsc::Receiver<(String, MediaEngineEvent)>,
    connected_rx: broadcast::Receiver<Arc<Connected>>,
}

/// The single writer over session and call state. Everything that mutates
/// state in response to an asynchronous source flows through here in arrival
/// order.
async fn dispatch_loop(mut ctx: DispatchContext) {
    let router = Router::new();

    loop {
        tokio::select! {
            envelope = ctx.inbound_rx.recv() => {
                let Some(envelope) = envelope else {
                    debug!(target: "Client", "inbound channel closed, exiting dispatch loop");
                    return;
                };
                match router.route(&envelope) {
                    Route::Session => {
                        ctx.store.lock().await.apply_inbound(&envelope).await;
                    }
                    Route::Call => {
                        let record = ctx.calls.lock().await.handle_signal(&envelope).await;
                        if let Some(record) = record {
                            commit_call_log(
                                &ctx.connection,
                                &ctx.store,
                                &ctx.local_identity,
                                record,
                            )
                            .await;
                        }
                    }
                    Route::Ignore => {
                        debug!(target: "Client", "ignoring inbound {}", envelope.kind());
                    }
                }
            }
            envelope = ctx.outbound_rx.recv() => {
                let Some(envelope) = envelope else { return };
                if let Err(e) = ctx.connection.send(&envelope).await {
                    warn!(target: "Client", "dropping outbound {}: {e}", envelope.kind());
                }
            }
            media = ctx.media_rx.recv() => {
                let Some((call_id, event)) = media else { return };
                let record = ctx
                    .calls
                    .lock()
                    .await
                    .handle_media_event(&call_id, event)
                    .await;
                if let Some(record) = record {
                    commit_call_log(&ctx.connection, &ctx.store, &ctx.local_identity, record)
                        .await;
                }
            }
            result = ctx.connected_rx.recv() => {
                // Registration is per connection; the connection itself
                // suppresses duplicates within one.
                if result.is_ok() {
                    if let Err(e) = ctx.connection.send(&ctx.register).await {
                        warn!(target: "Client", "failed to register: {e}");
                    }
                }
            }
        }
    }
}

/// Records a finished call in its session log and announces it to the relay.
async fn commit_call_log(
    connection: &Arc<Connection>,
    store: &Arc<Mutex<SessionStore>>,
    local_identity: &str,
    record: CallLogRecord,
) {
    store.lock().await.append_call_log(
        &record.session_id,
        record.duration_secs as i64,
        record.timestamp_ms,
    );
    let envelope = Envelope::CallLog {
        session_uuid: record.session_id,
        call_duration: record.duration_secs as i64,
        timestamp: now_ms(),
        from: Some(local_identity.to_string()),
    };
    if let Err(e) = connection.send(&envelope).await {
        warn!(target: "Client", "failed to announce call log: {e}");
    }
}
