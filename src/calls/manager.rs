//! Call manager: orchestrates the single call slot.
//!
//! The client's dispatch task owns the only reference, so methods take
//! `&mut self` and need no internal locking. Outbound envelopes go through
//! the shared outbound channel; media engine events are pumped back into the
//! dispatch task tagged with their call id so stale callbacks from a finished
//! call are ignored.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::error::SignalingError;
use super::media::{MediaConnectionState, MediaEngine, MediaEngineEvent, MediaEngineFactory};
use super::state::{CallInfo, CallPhase, CallTransition};
use crate::envelope::{Envelope, IceCandidateData};
use crate::types::call::new_call_id;
use crate::types::events::{CallEnded, CallStateChanged, EventBus, IncomingCall, SignalingFailure};
use crate::types::message::now_ms;

/// The record of a completed call, to be appended to the originating session
/// as a call-log message.
#[derive(Debug, Clone, PartialEq)]
pub struct CallLogRecord {
    pub call_id: String,
    pub session_id: String,
    pub duration_secs: u64,
    pub timestamp_ms: i64,
}

struct ActiveCall {
    info: CallInfo,
    engine: Arc<dyn MediaEngine>,
    /// True once any signaling reached (or came from) the peer; gates the
    /// outbound `call_end` so a purely local abort stays silent.
    peer_reached: bool,
    /// Remote candidates trickled in before the local accept; applied once
    /// the answer exists.
    pending_candidates: Vec<IceCandidateData>,
    duration_secs: Arc<AtomicU64>,
    ticker: Option<JoinHandle<()>>,
    event_pump: JoinHandle<()>,
}

pub struct CallManager {
    local_identity: String,
    engine_factory: Arc<dyn MediaEngineFactory>,
    bus: Arc<EventBus>,
    outbound: mpsc::Sender<Envelope>,
    /// Media events are routed back through the client's dispatch task,
    /// tagged with the call id they belong to.
    media_events: mpsc::Sender<(String, MediaEngineEvent)>,
    active: Option<ActiveCall>,
}

impl CallManager {
    pub fn new(
        local_identity: impl Into<String>,
        engine_factory: Arc<dyn MediaEngineFactory>,
        bus: Arc<EventBus>,
        outbound: mpsc::Sender<Envelope>,
        media_events: mpsc::Sender<(String, MediaEngineEvent)>,
    ) -> Self {
        Self {
            local_identity: local_identity.into(),
            engine_factory,
            bus,
            outbound,
            media_events,
            active: None,
        }
    }

    pub fn phase(&self) -> CallPhase {
        self.active
            .as_ref()
            .map(|c| c.info.phase)
            .unwrap_or(CallPhase::Idle)
    }

    pub fn active_call(&self) -> Option<&CallInfo> {
        self.active.as_ref().map(|c| &c.info)
    }

    /// Elapsed whole seconds of the current call, if connected.
    pub fn duration_secs(&self) -> u64 {
        self.active
            .as_ref()
            .map(|c| c.duration_secs.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    // ---- local control ----------------------------------------------------

    /// Places an outgoing call. Returns the allocated call id.
    pub async fn start_call(
        &mut self,
        session_id: &str,
        peer_name: &str,
        video: bool,
    ) -> Result<String, SignalingError> {
        if self.active.is_some() {
            return Err(SignalingError::Busy);
        }
        let call_id = new_call_id();
        let (engine, event_pump) = self.spawn_engine(&call_id).await?;

        let offer = match engine.create_offer(video).await {
            Ok(sdp) => sdp,
            Err(e) => {
                // Local-description failure: revert to idle and report.
                event_pump.abort();
                engine.close().await;
                self.report_failure(Some(&call_id), format!("offer failed: {e}"));
                return Err(SignalingError::Media(e));
            }
        };

        let mut info = CallInfo::new_outgoing(
            call_id.clone(),
            session_id.to_string(),
            peer_name.to_string(),
            video,
        );
        let offer_sent = self
            .send_envelope(Envelope::CallOffer {
                sdp: offer,
                call_id: call_id.clone(),
                session_uuid: session_id.to_string(),
                has_video: video,
                from: Some(self.local_identity.clone()),
            })
            .await;
        info.apply_transition(CallTransition::OfferSent)?;

        info!(target: "Calls", "outgoing call {call_id} to session {session_id} (video: {video})");
        let phase = info.phase;
        self.active = Some(ActiveCall {
            info,
            engine,
            peer_reached: offer_sent,
            pending_candidates: Vec::new(),
            duration_secs: Arc::new(AtomicU64::new(0)),
            ticker: None,
            event_pump,
        });
        self.notify_phase(&call_id, phase);
        Ok(call_id)
    }

    /// Accepts the ringing incoming call.
    pub async fn accept_call(&mut self) -> Result<(), SignalingError> {
        let (engine, call_id, video) = match self.active.as_ref() {
            None => return Err(SignalingError::NoActiveCall),
            Some(call) if call.info.phase != CallPhase::Incoming => {
                return Err(SignalingError::InvalidTransition(
                    super::state::InvalidTransition {
                        current_phase: format!("{:?}", call.info.phase),
                        attempted: "LocalAccepted".into(),
                    },
                ));
            }
            Some(call) => (
                call.engine.clone(),
                call.info.call_id.clone(),
                call.info.video,
            ),
        };

        let answer = match engine.create_answer(video).await {
            Ok(sdp) => sdp,
            Err(e) => {
                self.report_failure(Some(&call_id), format!("answer failed: {e}"));
                self.terminate(false).await;
                return Err(SignalingError::Media(e));
            }
        };

        let Some(call) = self.active.as_mut() else {
            return Err(SignalingError::NoActiveCall);
        };
        call.info.apply_transition(CallTransition::LocalAccepted)?;
        let envelope = Envelope::CallAnswer {
            sdp: answer,
            call_id: Some(call.info.call_id.clone()),
            session_uuid: call.info.session_id.clone(),
            has_video: video,
        };
        let phase = call.info.phase;
        self.send_envelope(envelope).await;
        self.flush_pending_candidates().await;
        self.notify_phase(&call_id, phase);
        Ok(())
    }

    /// Declines the ringing incoming call. No call log is produced: no
    /// connection was ever established.
    pub async fn decline_call(&mut self) -> Result<(), SignalingError> {
        let Some(call) = self.active.as_ref() else {
            return Err(SignalingError::NoActiveCall);
        };
        if call.info.phase != CallPhase::Incoming {
            return Err(SignalingError::InvalidTransition(
                super::state::InvalidTransition {
                    current_phase: format!("{:?}", call.info.phase),
                    attempted: "Decline".into(),
                },
            ));
        }
        let envelope = Envelope::CallReject {
            call_id: call.info.call_id.clone(),
            session_uuid: call.info.session_id.clone(),
        };
        self.send_envelope(envelope).await;
        self.terminate(false).await;
        Ok(())
    }

    /// Hangs up the active call. Returns the call-log record if the call had
    /// accumulated any connected time.
    pub async fn end_call(&mut self) -> Result<Option<CallLogRecord>, SignalingError> {
        if self.active.is_none() {
            return Err(SignalingError::NoActiveCall);
        }
        Ok(self.terminate(true).await)
    }

    // ---- inbound signaling -------------------------------------------------

    /// Routes one inbound call-signaling envelope. Returns a call-log record
    /// when the envelope ended a connected call.
    pub async fn handle_signal(&mut self, envelope: &Envelope) -> Option<CallLogRecord> {
        match envelope {
            Envelope::CallOffer {
                sdp,
                call_id,
                session_uuid,
                has_video,
                from,
            } => {
                self.handle_offer(sdp, call_id, session_uuid, *has_video, from.as_deref())
                    .await;
                None
            }
            Envelope::CallAnswer {
                sdp,
                call_id,
                session_uuid,
                ..
            } => {
                self.handle_answer(sdp, call_id.as_deref(), session_uuid)
                    .await
            }
            Envelope::IceCandidate {
                candidate, call_id, ..
            } => {
                self.handle_remote_candidate(candidate, call_id).await;
                None
            }
            Envelope::CallEnd {
                session_uuid,
                call_id,
            } => {
                self.handle_remote_end(session_uuid, call_id.as_deref())
                    .await
            }
            // The relay may forward the callee's reject to the caller; it
            // ends the call without a log entry.
            Envelope::CallReject { call_id, .. } => {
                if self.is_active_call(Some(call_id)) {
                    info!(target: "Calls", "call {call_id} rejected by peer");
                    self.terminate(false).await;
                }
                None
            }
            other => {
                debug!(target: "Calls", "ignoring envelope of type {}", other.kind());
                None
            }
        }
    }

    async fn handle_offer(
        &mut self,
        sdp: &str,
        call_id: &str,
        session_id: &str,
        video: bool,
        from: Option<&str>,
    ) {
        if self.active.is_some() {
            // Busy-signal semantics: no call queuing.
            info!(target: "Calls", "rejecting offer {call_id}: a call is already active");
            self.send_envelope(Envelope::CallReject {
                call_id: call_id.to_string(),
                session_uuid: session_id.to_string(),
            })
            .await;
            return;
        }

        let (engine, event_pump) = match self.spawn_engine(call_id).await {
            Ok(pair) => pair,
            Err(e) => {
                self.report_failure(Some(call_id), format!("engine unavailable: {e}"));
                return;
            }
        };
        if let Err(e) = engine.set_remote_description(sdp).await {
            event_pump.abort();
            engine.close().await;
            self.report_failure(Some(call_id), format!("remote offer rejected: {e}"));
            return;
        }

        let peer_name = from.unwrap_or_default().to_string();
        let info = CallInfo::new_incoming(
            call_id.to_string(),
            session_id.to_string(),
            peer_name.clone(),
            video,
        );
        info!(target: "Calls", "incoming call {call_id} from {peer_name:?} (video: {video})");
        self.active = Some(ActiveCall {
            info,
            engine,
            peer_reached: true,
            pending_candidates: Vec::new(),
            duration_secs: Arc::new(AtomicU64::new(0)),
            ticker: None,
            event_pump,
        });
        let _ = self.bus.incoming_call.send(Arc::new(IncomingCall {
            call_id: call_id.to_string(),
            session_id: session_id.to_string(),
            peer_name,
            video,
        }));
        self.notify_phase(call_id, CallPhase::Incoming);
    }

    async fn handle_answer(
        &mut self,
        sdp: &str,
        call_id: Option<&str>,
        session_id: &str,
    ) -> Option<CallLogRecord> {
        if !self.is_active_call(call_id) {
            debug!(target: "Calls", "ignoring stale answer for call {call_id:?}");
            return None;
        }
        let (engine, id) = {
            let call = self.active.as_ref()?;
            if call.info.session_id != session_id {
                debug!(target: "Calls", "ignoring answer for foreign session {session_id}");
                return None;
            }
            (call.engine.clone(), call.info.call_id.clone())
        };
        if let Err(e) = engine.set_remote_description(sdp).await {
            self.report_failure(Some(&id), format!("remote answer rejected: {e}"));
            return self.terminate(true).await;
        }
        self.to_connected(CallTransition::AnswerReceived);
        None
    }

    async fn handle_remote_candidate(&mut self, candidate: &IceCandidateData, call_id: &str) {
        if !self.is_active_call(Some(call_id)) {
            debug!(target: "Calls", "ignoring ICE candidate for stale call {call_id}");
            return;
        }
        let Some(call) = self.active.as_mut() else {
            return;
        };
        match call.info.phase {
            // A trickling caller sends candidates right after the offer; the
            // engine cannot take them before the answer exists.
            CallPhase::Incoming => {
                call.pending_candidates.push(candidate.clone());
            }
            CallPhase::Connecting | CallPhase::Connected => {
                let engine = call.engine.clone();
                if let Err(e) = engine.add_ice_candidate(candidate).await {
                    warn!(target: "Calls", "media engine refused candidate: {e}");
                }
            }
            phase => {
                debug!(target: "Calls", "ignoring ICE candidate in phase {phase:?}");
            }
        }
    }

    async fn handle_remote_end(
        &mut self,
        session_id: &str,
        call_id: Option<&str>,
    ) -> Option<CallLogRecord> {
        let matches_call = match (call_id, self.active.as_ref()) {
            (Some(id), Some(call)) => call.info.call_id == id,
            (None, Some(call)) => call.info.session_id == session_id,
            (_, None) => false,
        };
        if !matches_call {
            debug!(target: "Calls", "ignoring call_end for stale call {call_id:?}");
            return None;
        }
        info!(target: "Calls", "call ended by peer");
        self.terminate(false).await
    }

    /// Feeds one media engine event back into the state machine. Events
    /// carrying a call id other than the active one are stale callbacks from
    /// a finished call and are dropped.
    pub async fn handle_media_event(
        &mut self,
        call_id: &str,
        event: MediaEngineEvent,
    ) -> Option<CallLogRecord> {
        if !self.is_active_call(Some(call_id)) {
            debug!(target: "Calls", "dropping media event for stale call {call_id}");
            return None;
        }
        match event {
            MediaEngineEvent::LocalCandidate(candidate) => {
                let Some(call) = self.active.as_ref() else {
                    return None;
                };
                if !matches!(
                    call.info.phase,
                    CallPhase::Connecting | CallPhase::Connected
                ) {
                    debug!(target: "Calls", "dropping local candidate in phase {:?}", call.info.phase);
                    return None;
                }
                let envelope = Envelope::IceCandidate {
                    candidate,
                    session_uuid: call.info.session_id.clone(),
                    call_id: call.info.call_id.clone(),
                };
                self.send_envelope(envelope).await;
                None
            }
            MediaEngineEvent::ConnectionState(MediaConnectionState::Connected) => {
                self.to_connected(CallTransition::MediaConnected);
                None
            }
            MediaEngineEvent::ConnectionState(state) => {
                info!(target: "Calls", "media transport reported {state:?}, ending call");
                self.terminate(true).await
            }
        }
    }

    // ---- internals ---------------------------------------------------------

    fn is_active_call(&self, call_id: Option<&str>) -> bool {
        match (&self.active, call_id) {
            (Some(call), Some(id)) => call.info.call_id == id,
            // An answer without a call id is matched by session elsewhere.
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    async fn spawn_engine(
        &self,
        call_id: &str,
    ) -> Result<(Arc<dyn MediaEngine>, JoinHandle<()>), SignalingError> {
        let (engine, mut events) = self
            .engine_factory
            .create_engine()
            .await
            .map_err(SignalingError::Media)?;
        let forward = self.media_events.clone();
        let call_id = call_id.to_string();
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if forward.send((call_id.clone(), event)).await.is_err() {
                    return;
                }
            }
        });
        Ok((engine, pump))
    }

    /// Moves the call to Connected and starts the 1 Hz duration counter.
    /// Idempotent: a duplicate connected event neither fails nor restarts a
    /// running counter.
    fn to_connected(&mut self, transition: CallTransition) {
        let Some(call) = self.active.as_mut() else {
            return;
        };
        if call.info.phase == CallPhase::Connected {
            debug!(target: "Calls", "duplicate connected event; counter untouched");
            return;
        }
        if let Err(e) = call.info.apply_transition(transition) {
            warn!(target: "Calls", "{e}");
            return;
        }
        if call.ticker.is_none() {
            let counter = call.duration_secs.clone();
            call.ticker = Some(tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    counter.fetch_add(1, Ordering::AcqRel);
                }
            }));
        }
        let (call_id, phase) = (call.info.call_id.clone(), call.info.phase);
        info!(target: "Calls", "call {call_id} connected");
        self.notify_phase(&call_id, phase);
    }

    /// Releases all call-scoped state. Sends `call_end` only if a peer had
    /// been reached and `signal_peer` is set; returns a call-log record iff
    /// connected time was accumulated.
    async fn terminate(&mut self, signal_peer: bool) -> Option<CallLogRecord> {
        let mut call = self.active.take()?;
        if let Some(ticker) = call.ticker.take() {
            ticker.abort();
        }
        call.event_pump.abort();

        let duration = call.duration_secs.load(Ordering::Acquire);
        if signal_peer && call.peer_reached {
            self.send_envelope(Envelope::CallEnd {
                session_uuid: call.info.session_id.clone(),
                call_id: Some(call.info.call_id.clone()),
            })
            .await;
        }
        call.engine.close().await;

        info!(
            target: "Calls",
            "call {} finished after {duration}s",
            call.info.call_id
        );
        let _ = self.bus.call_ended.send(Arc::new(CallEnded {
            call_id: call.info.call_id.clone(),
            session_id: call.info.session_id.clone(),
            duration_secs: duration,
        }));
        self.notify_phase(&call.info.call_id, CallPhase::Idle);

        (duration > 0).then(|| CallLogRecord {
            call_id: call.info.call_id,
            session_id: call.info.session_id,
            duration_secs: duration,
            timestamp_ms: now_ms(),
        })
    }

    /// Feeds buffered remote candidates to the engine once a local answer
    /// exists.
    async fn flush_pending_candidates(&mut self) {
        let Some(call) = self.active.as_mut() else {
            return;
        };
        if call.pending_candidates.is_empty() {
            return;
        }
        let engine = call.engine.clone();
        let buffered = std::mem::take(&mut call.pending_candidates);
        debug!(target: "Calls", "applying {} buffered candidates", buffered.len());
        for candidate in buffered {
            if let Err(e) = engine.add_ice_candidate(&candidate).await {
                warn!(target: "Calls", "media engine refused buffered candidate: {e}");
            }
        }
    }

    /// Queues one outbound envelope. Returns whether it was accepted.
    async fn send_envelope(&self, envelope: Envelope) -> bool {
        // try_send: the dispatch task drains this channel and may be the
        // caller here, so blocking on capacity could deadlock it.
        match self.outbound.try_send(envelope) {
            Ok(()) => true,
            Err(e) => {
                warn!(target: "Calls", "dropping outbound envelope: {e}");
                false
            }
        }
    }

    fn report_failure(&self, call_id: Option<&str>, reason: String) {
        warn!(target: "Calls", "{reason}");
        let _ = self.bus.signaling_failure.send(Arc::new(SignalingFailure {
            call_id: call_id.map(str::to_string),
            reason,
        }));
    }

    fn notify_phase(&self, call_id: &str, phase: CallPhase) {
        let _ = self
            .bus
            .call_state_changed
            .send(Arc::new(CallStateChanged {
                call_id: call_id.to_string(),
                phase,
            }));
    }
}
