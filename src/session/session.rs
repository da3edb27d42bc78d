use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::capture::{CaptureHandle, CapturePipeline};
use super::config::SessionConfig;
use super::gate::ReadinessGate;
use super::state::{SessionState, SessionStatus};
use super::stats::{AgentUtterance, SessionStats, Speaker, StatsRecorder};
use crate::audio::{
    BackendFactory, EncodedFrame, FrameEncoder, PlaybackOutput, PlaybackPipeline, PlaybackQueue,
};
use crate::credential::{CredentialFetcher, SessionCredential};
use crate::error::SessionError;
use crate::protocol::{next_event, Connection, InboundEnvelope, InboundStream, TransportEvent};

/// Everything that can move the state machine, in arrival order
pub(crate) enum SessionEvent {
    Start {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Stop,
    Shutdown,
    CredentialFetched {
        attempt: Uuid,
        result: Result<SessionCredential, SessionError>,
    },
    Opened {
        attempt: Uuid,
        result: Result<(Connection, InboundStream), SessionError>,
    },
    Transport {
        attempt: Uuid,
        event: TransportEvent,
    },
    CaptureFrame {
        attempt: Uuid,
        frame: EncodedFrame,
    },
    MicrophoneUnavailable {
        attempt: Uuid,
        reason: String,
    },
}

/// Resources claimed by one conversation attempt; never reused
struct Attempt {
    id: Uuid,
    connection: Option<Connection>,
    playback: PlaybackQueue,
    capture: Option<CaptureHandle>,
    tasks: Vec<JoinHandle<()>>,
}

/// The conversation state machine
///
/// Owned by a single driver task; all socket, capture and control activity
/// reaches it as [`SessionEvent`]s. Use [`ConversationSession::spawn`] to run
/// it and talk to it through the returned [`ConversationHandle`].
pub struct ConversationSession {
    config: SessionConfig,
    fetcher: Arc<dyn CredentialFetcher>,
    capture: BackendFactory,
    playback: PlaybackOutput,
    gate: ReadinessGate,
    stats: StatsRecorder,
    state: SessionState,
    status_tx: watch::Sender<SessionStatus>,
    events_tx: mpsc::WeakSender<SessionEvent>,
    attempt: Option<Attempt>,
}

impl ConversationSession {
    /// Start the driver task
    pub fn spawn(
        config: SessionConfig,
        fetcher: Arc<dyn CredentialFetcher>,
        capture: BackendFactory,
        playback: PlaybackOutput,
    ) -> ConversationHandle {
        let (events_tx, events_rx) = mpsc::channel(64);
        let (status_tx, status_rx) = watch::channel(SessionStatus::idle());
        let stats = StatsRecorder::default();
        let gate = ReadinessGate::new();

        info!(
            "Creating conversation session for agent {} ({}Hz, {:?})",
            config.agent_id, config.sample_rate, config.encoding
        );

        let session = Self {
            config,
            fetcher,
            capture,
            playback,
            gate: gate.clone(),
            stats: stats.clone(),
            state: SessionState::Idle,
            status_tx,
            events_tx: events_tx.downgrade(),
            attempt: None,
        };

        tokio::spawn(session.run(events_rx));

        ConversationHandle {
            events: events_tx,
            status: status_rx,
            stats,
            gate,
        }
    }

    async fn run(mut self, mut events: mpsc::Receiver<SessionEvent>) {
        debug!("Session driver started");

        while let Some(event) = events.recv().await {
            if let SessionEvent::Shutdown = event {
                self.teardown().await;
                break;
            }
            self.dispatch(event).await;
        }

        self.teardown().await;
        debug!("Session driver stopped");
    }

    async fn dispatch(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Start { reply } => {
                let _ = reply.send(self.begin_attempt());
            }
            SessionEvent::Stop => self.stop().await,
            SessionEvent::Shutdown => {}
            SessionEvent::CredentialFetched { attempt, result } => {
                if self.is_current(attempt) {
                    self.on_credential(result);
                } else {
                    debug!("Ignoring credential for stale attempt {}", attempt);
                }
            }
            SessionEvent::Opened { attempt, result } => {
                if self.is_current(attempt) {
                    self.on_opened(result).await;
                } else if let Ok((mut connection, _)) = result {
                    debug!("Closing connection opened for stale attempt {}", attempt);
                    connection.close().await;
                }
            }
            SessionEvent::Transport { attempt, event } => {
                if self.is_current(attempt) {
                    self.on_transport(event).await;
                }
            }
            SessionEvent::CaptureFrame { attempt, frame } => {
                if self.is_current(attempt) {
                    self.send_frame(frame).await;
                } else {
                    self.stats.frame_dropped();
                }
            }
            SessionEvent::MicrophoneUnavailable { attempt, reason } => {
                if self.is_current(attempt) {
                    self.on_microphone_unavailable(reason).await;
                }
            }
        }
    }

    fn is_current(&self, attempt: Uuid) -> bool {
        self.attempt.as_ref().is_some_and(|a| a.id == attempt)
    }

    /// Idle/Closed/Failed -> Requesting
    fn begin_attempt(&mut self) -> Result<(), SessionError> {
        if !self.state.can_start() {
            warn!("Start ignored: attempt already in progress ({})", self.state);
            return Err(SessionError::AttemptInProgress);
        }
        let Some(events) = self.events_tx.upgrade() else {
            return Err(SessionError::SessionEnded);
        };

        self.gate.close();

        let id = Uuid::new_v4();
        self.stats.begin_attempt(id.to_string());
        let stats = self.stats.clone();
        let playback = PlaybackPipeline::new(
            self.playback.clone(),
            self.config.encoding,
            self.config.sample_rate,
        )
        .spawn(move |_| stats.playback_error());
        let mut attempt = Attempt {
            id,
            connection: None,
            playback,
            capture: None,
            tasks: Vec::new(),
        };

        info!("Starting conversation attempt {}", id);
        self.transition(SessionState::Requesting, "Status: Getting ready...");

        let fetcher = Arc::clone(&self.fetcher);
        attempt.tasks.push(tokio::spawn(async move {
            let result = fetcher.fetch().await;
            let _ = events
                .send(SessionEvent::CredentialFetched { attempt: id, result })
                .await;
        }));

        self.attempt = Some(attempt);
        Ok(())
    }

    /// Requesting -> Connecting, or Failed
    fn on_credential(&mut self, result: Result<SessionCredential, SessionError>) {
        if self.state != SessionState::Requesting {
            return;
        }

        let credential = match result {
            Ok(credential) => credential,
            Err(e) => {
                // Nothing to tear down beyond the finished fetch task
                self.fail_sync(e);
                return;
            }
        };

        let (Some(events), Some(attempt)) = (self.events_tx.upgrade(), self.attempt.as_mut()) else {
            return;
        };

        let id = attempt.id;
        attempt.tasks.push(tokio::spawn(async move {
            let result = Connection::open(credential.url()).await;
            let _ = events.send(SessionEvent::Opened { attempt: id, result }).await;
        }));

        self.transition(SessionState::Connecting, "Status: Connecting to agent...");
    }

    /// Connecting -> AwaitingReady -> Active
    async fn on_opened(&mut self, result: Result<(Connection, InboundStream), SessionError>) {
        let (connection, inbound) = match result {
            Ok(opened) => opened,
            Err(e) => {
                self.fail(e).await;
                return;
            }
        };
        if self.state != SessionState::Connecting {
            let mut connection = connection;
            connection.close().await;
            return;
        }

        let (Some(events), Some(attempt)) = (self.events_tx.upgrade(), self.attempt.as_mut()) else {
            return;
        };

        let id = attempt.id;
        attempt.connection = Some(connection);
        attempt.tasks.push(tokio::spawn(pump_inbound(id, inbound, events.clone())));
        self.transition(SessionState::AwaitingReady, "Status: Connection open, configuring...");

        // The start message goes out before the gate opens and before capture exists
        let start = self.config.start_message();
        let sent = match self.attempt.as_mut().and_then(|a| a.connection.as_mut()) {
            Some(connection) => connection.send_start(&start).await,
            None => Err(SessionError::TransportRuntimeError("connection missing".into())),
        };
        if let Err(e) = sent {
            self.fail(e).await;
            return;
        }

        self.gate.open();
        self.transition(SessionState::Active, "Status: Connected! You can start talking.");

        let pipeline = CapturePipeline {
            attempt: id,
            factory: Arc::clone(&self.capture),
            encoder: FrameEncoder::new(
                self.config.encoding,
                self.config.sample_rate,
                self.config.silence_threshold,
            ),
            gate: self.gate.clone(),
            events,
            stats: self.stats.clone(),
        };
        if let Some(attempt) = self.attempt.as_mut() {
            attempt.capture = Some(pipeline.spawn());
        }
    }

    async fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Text(text) => {
                if self.state == SessionState::Active {
                    self.on_envelope(InboundEnvelope::parse(&text));
                } else {
                    debug!("Ignoring message received in state {}", self.state);
                }
            }
            TransportEvent::Binary(len) => {
                debug!("Ignoring {} byte binary message from agent", len);
            }
            TransportEvent::Closed { code, reason } => {
                info!(
                    "Agent connection closed. Code: {:?}, Reason: {}",
                    code, reason
                );
                if let Some(connection) = self.attempt.as_mut().and_then(|a| a.connection.as_mut()) {
                    connection.mark_closed();
                }
                let message = match code {
                    Some(code) => format!("Status: Connection closed. Code: {}.", code),
                    None => "Status: Connection closed.".to_string(),
                };
                self.close(message).await;
            }
            TransportEvent::Error(e) => {
                self.fail(SessionError::TransportRuntimeError(e)).await;
            }
        }
    }

    fn on_envelope(&mut self, envelope: InboundEnvelope) {
        match envelope {
            InboundEnvelope::Audio(bytes) => {
                self.stats.audio_received();
                let Some(attempt) = self.attempt.as_mut() else {
                    return;
                };
                // Played on the attempt's own task; a stalled sink never holds up the driver
                if !attempt.playback.enqueue(bytes) {
                    self.stats.playback_error();
                }
            }
            InboundEnvelope::InvalidAudio(reason) => {
                self.stats.audio_received();
                self.stats.playback_error();
                warn!(
                    "Error decoding or playing audio: {}",
                    SessionError::PlaybackDecodeError(reason)
                );
            }
            InboundEnvelope::AgentText(text) => {
                info!("Agent says (text): {}", text);
                self.stats.utterance(Speaker::Agent, text);
            }
            InboundEnvelope::UserTranscript(text) => {
                info!("User said: {}", text);
                self.stats.utterance(Speaker::User, text);
            }
            InboundEnvelope::Ignored => {}
        }
    }

    /// Send one captured frame if, right now, sending is allowed
    async fn send_frame(&mut self, frame: EncodedFrame) {
        let allowed = self.state == SessionState::Active && self.gate.is_open() && !frame.is_empty();
        let connection = match self.attempt.as_mut().and_then(|a| a.connection.as_mut()) {
            Some(connection) if allowed && connection.is_open() => connection,
            _ => {
                self.stats.frame_dropped();
                return;
            }
        };

        match connection.send_audio(frame.bytes).await {
            Ok(()) => self.stats.frame_sent(),
            Err(e) => self.fail(e).await,
        }
    }

    async fn on_microphone_unavailable(&mut self, reason: String) {
        let error = SessionError::MicrophoneUnavailable(reason);
        error!("{}", error);
        if self.state == SessionState::Active {
            self.close("Status: Please allow microphone access to talk.".to_string())
                .await;
        }
    }

    async fn stop(&mut self) {
        if self.state.can_start() || self.state == SessionState::Closing {
            debug!("Stop ignored in state {}", self.state);
            return;
        }
        info!("Stopping conversation");
        self.close("Status: Connection closed.".to_string()).await;
    }

    /// -> Closing -> Closed
    async fn close(&mut self, message: String) {
        if self.state.is_terminal() {
            return;
        }
        self.transition(SessionState::Closing, "Status: Closing...");
        self.teardown().await;
        self.transition(SessionState::Closed, message);
    }

    /// Any non-terminal state -> Failed
    async fn fail(&mut self, error: SessionError) {
        error!("Conversation attempt failed: {}", error);
        self.teardown().await;
        self.transition(SessionState::Failed, format!("Status: Error - {}", error));
    }

    /// Like [`fail`](Self::fail) for states where no connection or capture exists yet
    fn fail_sync(&mut self, error: SessionError) {
        error!("Conversation attempt failed: {}", error);
        self.gate.close();
        if let Some(attempt) = self.attempt.take() {
            for task in attempt.tasks {
                task.abort();
            }
        }
        self.transition(SessionState::Failed, format!("Status: Error - {}", error));
    }

    /// Release everything the current attempt holds
    ///
    /// Dropping the playback queue lets audio already queued finish; nothing
    /// new reaches it.
    async fn teardown(&mut self) {
        self.gate.close();

        let Some(mut attempt) = self.attempt.take() else {
            return;
        };

        if let Some(capture) = attempt.capture.take() {
            capture.stop().await;
        }
        if let Some(mut connection) = attempt.connection.take() {
            connection.close().await;
        }
        for task in attempt.tasks.drain(..) {
            task.abort();
        }

        debug!(
            "Attempt {} released ({} agent frames queued for playback)",
            attempt.id,
            attempt.playback.queued()
        );
    }

    fn transition(&mut self, next: SessionState, message: impl Into<String>) {
        if !self.state.can_transition_to(next) {
            warn!("Illegal transition {} -> {} ignored", self.state, next);
            return;
        }

        let message = message.into();
        info!("{} -> {}: {}", self.state, next, message);
        self.state = next;
        self.status_tx.send_replace(SessionStatus::new(next, message));
    }
}

/// Forward everything the agent sends to the driver until the socket ends
async fn pump_inbound(attempt: Uuid, mut inbound: InboundStream, events: mpsc::Sender<SessionEvent>) {
    loop {
        let event = next_event(&mut inbound).await.unwrap_or(TransportEvent::Closed {
            code: None,
            reason: String::new(),
        });
        let finished = matches!(event, TransportEvent::Closed { .. } | TransportEvent::Error(_));

        if events.send(SessionEvent::Transport { attempt, event }).await.is_err() || finished {
            break;
        }
    }
}

/// Control handle for a running [`ConversationSession`]
///
/// Cheap to clone; the driver keeps running while any handle or any of its
/// own tasks is alive.
#[derive(Clone)]
pub struct ConversationHandle {
    events: mpsc::Sender<SessionEvent>,
    status: watch::Receiver<SessionStatus>,
    stats: StatsRecorder,
    gate: ReadinessGate,
}

impl ConversationHandle {
    /// Start a new attempt. Rejected while an attempt is in flight.
    pub async fn start(&self) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.events
            .send(SessionEvent::Start { reply })
            .await
            .map_err(|_| SessionError::SessionEnded)?;
        response.await.map_err(|_| SessionError::SessionEnded)?
    }

    /// Close the current attempt, if any
    pub async fn stop(&self) -> Result<(), SessionError> {
        self.events
            .send(SessionEvent::Stop)
            .await
            .map_err(|_| SessionError::SessionEnded)
    }

    /// Tear down and stop the driver task
    pub async fn shutdown(&self) {
        let _ = self.events.send(SessionEvent::Shutdown).await;
    }

    /// Current state and status line
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Whether captured audio may currently be sent
    pub fn ready(&self) -> bool {
        self.gate.is_open()
    }

    /// Watch status changes
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Wait until the state satisfies `predicate`
    pub async fn wait_for<F>(&self, mut predicate: F) -> Result<SessionStatus, SessionError>
    where
        F: FnMut(SessionState) -> bool,
    {
        let mut rx = self.status.clone();
        let status = rx
            .wait_for(|status| predicate(status.state))
            .await
            .map_err(|_| SessionError::SessionEnded)?;
        Ok(status.clone())
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.snapshot()
    }

    pub fn utterances(&self) -> Vec<AgentUtterance> {
        self.stats.utterances()
    }
}
