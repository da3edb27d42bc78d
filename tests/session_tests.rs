// End-to-end tests for the conversation state machine
//
// A wiremock server plays the credential webhook and a local WebSocket
// server plays the agent, so the whole attempt lifecycle runs for real.

mod common;

use base64::Engine;
use common::{
    channel_capture, denied_capture, eventually, latest_sender, tone_frame, AgentScript,
    MockAgent, Recorded,
};
use convai_duplex::audio::BackendFactory;
use convai_duplex::{
    ConversationHandle, ConversationSession, HttpCredentialFetcher, PlaybackOutput,
    SessionConfig, SessionError, SessionState, StaticCredential,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WAIT: Duration = Duration::from_secs(5);

fn session_config() -> SessionConfig {
    SessionConfig {
        agent_id: "agent-42".to_string(),
        language: "en".to_string(),
        sample_rate: 16000,
        ..SessionConfig::default()
    }
}

async fn credential_server(body: Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;
    server
}

fn spawn_session(
    credential_url: String,
    capture: BackendFactory,
    playback: PlaybackOutput,
) -> ConversationHandle {
    ConversationSession::spawn(
        session_config(),
        Arc::new(HttpCredentialFetcher::new(credential_url)),
        capture,
        playback,
    )
}

async fn wait_for_state(handle: &ConversationHandle, state: SessionState) {
    tokio::time::timeout(WAIT, handle.wait_for(|s| s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", state))
        .unwrap();
}

async fn wait_terminal(handle: &ConversationHandle) -> convai_duplex::SessionStatus {
    tokio::time::timeout(WAIT, handle.wait_for(|s| s.is_terminal()))
        .await
        .expect("timed out waiting for a terminal state")
        .unwrap()
}

fn parse_start(message: &Recorded) -> Value {
    match message {
        Recorded::Text(text) => serde_json::from_str(text).unwrap(),
        other => panic!("expected start message, got {:?}", other),
    }
}

#[tokio::test]
async fn test_signed_url_reaches_active_and_sends_start_once() {
    let agent = MockAgent::start(AgentScript::default()).await;
    let webhook = credential_server(json!({ "signed_url": agent.url })).await;
    let (capture, senders) = channel_capture();

    let handle = spawn_session(format!("{}/session", webhook.uri()), capture, PlaybackOutput::Discard);
    assert_eq!(handle.status().state, SessionState::Idle);

    handle.start().await.unwrap();
    wait_for_state(&handle, SessionState::Active).await;
    assert!(eventually(|| !senders.lock().unwrap().is_empty()).await);

    let mic = latest_sender(&senders);
    for i in 0..3 {
        mic.send(tone_frame(0.3, i * 250)).await.unwrap();
    }
    assert!(eventually(|| agent.binary_frames(0) == 3).await);

    let messages = agent.connection(0);
    let start = parse_start(&messages[0]);
    assert_eq!(start["type"], "start");
    assert_eq!(start["agent_id"], "agent-42");
    assert_eq!(start["sample_rate"], 16000);
    assert_eq!(start["language"], "en");

    let texts = messages.iter().filter(|m| matches!(m, Recorded::Text(_))).count();
    assert_eq!(texts, 1, "start message must be sent exactly once");

    // 250ms at 16kHz, 16-bit mono
    match &messages[1] {
        Recorded::Binary(bytes) => assert_eq!(bytes.len(), 8000),
        other => panic!("expected audio frame, got {:?}", other),
    }

    assert_eq!(handle.stats().frames_sent, 3);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_no_audio_precedes_start_message() {
    let agent = MockAgent::start(AgentScript::default()).await;
    let webhook = credential_server(json!({ "signed_url": agent.url })).await;
    let (capture, senders) = channel_capture();

    let handle = spawn_session(format!("{}/session", webhook.uri()), capture, PlaybackOutput::Discard);
    handle.start().await.unwrap();
    assert!(eventually(|| !senders.lock().unwrap().is_empty()).await);

    // Fire audio as early as the device exists
    let mic = latest_sender(&senders);
    for i in 0..5 {
        mic.send(tone_frame(0.5, i * 250)).await.unwrap();
    }
    assert!(eventually(|| agent.binary_frames(0) == 5).await);

    let messages = agent.connection(0);
    assert!(matches!(messages[0], Recorded::Text(_)));
    assert!(messages[1..]
        .iter()
        .all(|m| matches!(m, Recorded::Binary(_) | Recorded::Close)));

    handle.shutdown().await;
}

#[tokio::test]
async fn test_microphone_denied_closes_connection() {
    let agent = MockAgent::start(AgentScript::default()).await;
    let webhook = credential_server(json!({ "signed_url": agent.url })).await;

    let handle = spawn_session(
        format!("{}/session", webhook.uri()),
        denied_capture(),
        PlaybackOutput::Discard,
    );
    handle.start().await.unwrap();

    let status = wait_terminal(&handle).await;
    assert_eq!(status.state, SessionState::Closed);
    assert!(status.message.contains("allow microphone access"));

    assert!(eventually(|| agent.connection(0).contains(&Recorded::Close)).await);
    assert_eq!(agent.binary_frames(0), 0);
    assert!(matches!(agent.connection(0)[0], Recorded::Text(_)));
}

#[tokio::test]
async fn test_missing_field_fails_without_connecting() {
    let agent = MockAgent::start(AgentScript::default()).await;
    let webhook = credential_server(json!({ "url_for_something_else": agent.url })).await;
    let (capture, senders) = channel_capture();

    let handle = spawn_session(format!("{}/session", webhook.uri()), capture, PlaybackOutput::Discard);
    handle.start().await.unwrap();

    let status = wait_terminal(&handle).await;
    assert_eq!(status.state, SessionState::Failed);
    assert!(status.message.starts_with("Status: Error - credential unavailable"));
    assert!(status.start_enabled());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(agent.connections_opened(), 0);
    assert!(senders.lock().unwrap().is_empty(), "capture must not start");
}

#[tokio::test]
async fn test_webhook_error_status_fails_attempt() {
    let webhook = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&webhook)
        .await;
    let (capture, _senders) = channel_capture();

    let handle = spawn_session(format!("{}/session", webhook.uri()), capture, PlaybackOutput::Discard);
    handle.start().await.unwrap();

    let status = wait_terminal(&handle).await;
    assert_eq!(status.state, SessionState::Failed);
    assert!(status.message.contains("503"));
    assert!(status.message.contains("maintenance"));
}

#[tokio::test]
async fn test_unreachable_agent_is_transport_open_failure() {
    // Grab a free port and release it so nothing is listening there
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let (capture, _senders) = channel_capture();

    let handle = ConversationSession::spawn(
        session_config(),
        Arc::new(StaticCredential(format!("ws://127.0.0.1:{}/convai", port))),
        capture,
        PlaybackOutput::Discard,
    );
    handle.start().await.unwrap();

    let status = wait_terminal(&handle).await;
    assert_eq!(status.state, SessionState::Failed);
    assert!(status.message.contains("failed to open connection"));
}

#[tokio::test]
async fn test_inbound_audio_is_played_and_text_observed() {
    let pcm: Vec<u8> = [16384i16, -16384, 0, 8192]
        .iter()
        .flat_map(|s| s.to_le_bytes())
        .collect();
    let audio_b64 = base64::engine::general_purpose::STANDARD.encode(&pcm);

    let script = AgentScript {
        replies_after_start: vec![
            json!({ "type": "conversation_initiation_metadata" }).to_string(),
            json!({ "audio": audio_b64 }).to_string(),
            "definitely not json".to_string(),
            json!({ "type": "response", "text": "Hello, how can I help?" }).to_string(),
            json!({ "type": "audio", "audio_event": { "audio_base_64": audio_b64, "event_id": 2 } })
                .to_string(),
        ],
        ..AgentScript::default()
    };
    let agent = MockAgent::start(script).await;
    let webhook = credential_server(json!({ "signed_url": agent.url })).await;
    let (capture, _senders) = channel_capture();
    let (playback_tx, mut playback_rx) = mpsc::channel(8);

    let handle = spawn_session(
        format!("{}/session", webhook.uri()),
        capture,
        PlaybackOutput::Channel(playback_tx),
    );
    handle.start().await.unwrap();

    for _ in 0..2 {
        let waveform = tokio::time::timeout(WAIT, playback_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(waveform.sample_rate, 16000);
        assert_eq!(waveform.channels, 1);
        assert_eq!(waveform.samples.len(), pcm.len() / 2);
        assert_eq!(waveform.samples, vec![0.5, -0.5, 0.0, 0.25]);
    }

    assert!(eventually(|| handle.utterances().len() == 1).await);
    assert_eq!(handle.utterances()[0].text, "Hello, how can I help?");
    assert_eq!(handle.status().state, SessionState::Active);

    let stats = handle.stats();
    assert_eq!(stats.audio_frames_received, 2);
    assert_eq!(stats.playback_errors, 0);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_undecodable_audio_does_not_end_session() {
    let good = base64::engine::general_purpose::STANDARD.encode([0x00u8, 0x40]);
    let script = AgentScript {
        replies_after_start: vec![
            json!({ "audio": "%%% not base64 %%%" }).to_string(),
            json!({ "audio": good }).to_string(),
        ],
        ..AgentScript::default()
    };
    let agent = MockAgent::start(script).await;
    let (capture, _senders) = channel_capture();
    let (playback_tx, mut playback_rx) = mpsc::channel(8);

    let handle = ConversationSession::spawn(
        session_config(),
        Arc::new(StaticCredential(agent.url.clone())),
        capture,
        PlaybackOutput::Channel(playback_tx),
    );
    handle.start().await.unwrap();

    let waveform = tokio::time::timeout(WAIT, playback_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(waveform.samples, vec![0.5]);
    assert_eq!(handle.stats().playback_errors, 1);
    assert_eq!(handle.status().state, SessionState::Active);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_silent_frames_are_not_transmitted() {
    let agent = MockAgent::start(AgentScript::default()).await;
    let (capture, senders) = channel_capture();

    let handle = ConversationSession::spawn(
        session_config(),
        Arc::new(StaticCredential(agent.url.clone())),
        capture,
        PlaybackOutput::Discard,
    );
    handle.start().await.unwrap();
    wait_for_state(&handle, SessionState::Active).await;
    assert!(eventually(|| !senders.lock().unwrap().is_empty()).await);

    let mic = latest_sender(&senders);
    mic.send(tone_frame(0.0, 0)).await.unwrap();
    mic.send(tone_frame(0.004, 250)).await.unwrap();
    let mut loud = tone_frame(0.0, 500);
    loud.samples[1234] = 0.2;
    mic.send(loud).await.unwrap();

    assert!(eventually(|| agent.binary_frames(0) == 1).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(agent.binary_frames(0), 1);

    let stats = handle.stats();
    assert_eq!(stats.frames_sent, 1);
    assert_eq!(stats.frames_dropped, 2);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_remote_close_ends_attempt_with_code() {
    let agent = MockAgent::start(AgentScript {
        close_after_frames: Some(1),
        ..AgentScript::default()
    })
    .await;
    let (capture, senders) = channel_capture();

    let handle = ConversationSession::spawn(
        session_config(),
        Arc::new(StaticCredential(agent.url.clone())),
        capture,
        PlaybackOutput::Discard,
    );
    handle.start().await.unwrap();
    wait_for_state(&handle, SessionState::Active).await;
    assert!(eventually(|| !senders.lock().unwrap().is_empty()).await);

    latest_sender(&senders).send(tone_frame(0.4, 0)).await.unwrap();

    let status = wait_terminal(&handle).await;
    assert_eq!(status.state, SessionState::Closed);
    assert_eq!(status.message, "Status: Connection closed. Code: 1000.");
    assert!(status.start_enabled());
}

#[tokio::test]
async fn test_start_rejected_while_attempt_in_flight() {
    let agent = MockAgent::start(AgentScript::default()).await;
    let (capture, _senders) = channel_capture();

    let handle = ConversationSession::spawn(
        session_config(),
        Arc::new(StaticCredential(agent.url.clone())),
        capture,
        PlaybackOutput::Discard,
    );
    handle.start().await.unwrap();
    wait_for_state(&handle, SessionState::Active).await;

    assert_eq!(handle.start().await, Err(SessionError::AttemptInProgress));
    assert_eq!(agent.connections_opened(), 1);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_restart_uses_fresh_connection_and_device() {
    let agent = MockAgent::start(AgentScript::default()).await;
    let webhook = credential_server(json!({ "signed_url": agent.url })).await;
    let (capture, senders) = channel_capture();

    let handle = spawn_session(format!("{}/session", webhook.uri()), capture, PlaybackOutput::Discard);

    handle.start().await.unwrap();
    wait_for_state(&handle, SessionState::Active).await;
    let first_attempt = handle.stats().attempt_id.unwrap();

    handle.stop().await.unwrap();
    let status = wait_terminal(&handle).await;
    assert_eq!(status.state, SessionState::Closed);
    assert!(eventually(|| agent.connection(0).contains(&Recorded::Close)).await);

    // A frame from the old device after teardown must go nowhere
    let old_mic = latest_sender(&senders);
    let _ = old_mic.send(tone_frame(0.5, 0)).await;

    handle.start().await.unwrap();
    wait_for_state(&handle, SessionState::Active).await;
    assert!(eventually(|| senders.lock().unwrap().len() == 2).await);

    let second_attempt = handle.stats().attempt_id.unwrap();
    assert_ne!(first_attempt, second_attempt);
    assert_eq!(agent.connections_opened(), 2);
    assert_eq!(agent.binary_frames(0), 0);

    latest_sender(&senders).send(tone_frame(0.5, 0)).await.unwrap();
    assert!(eventually(|| agent.binary_frames(1) == 1).await);

    let second = agent.connection(1);
    assert_eq!(parse_start(&second[0])["agent_id"], "agent-42");
    assert!(matches!(second[1], Recorded::Binary(_)));

    handle.shutdown().await;
}

#[tokio::test]
async fn test_stop_while_requesting_closes_without_connecting() {
    struct NeverAnswers;

    #[async_trait::async_trait]
    impl convai_duplex::CredentialFetcher for NeverAnswers {
        async fn fetch(&self) -> Result<convai_duplex::SessionCredential, SessionError> {
            std::future::pending().await
        }
    }

    let (capture, senders) = channel_capture();
    let handle = ConversationSession::spawn(
        session_config(),
        Arc::new(NeverAnswers),
        capture,
        PlaybackOutput::Discard,
    );

    handle.start().await.unwrap();
    assert_eq!(handle.status().state, SessionState::Requesting);

    handle.stop().await.unwrap();
    let status = wait_terminal(&handle).await;
    assert_eq!(status.state, SessionState::Closed);
    assert!(senders.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_stalled_playback_consumer_does_not_block_stop() {
    let audio = base64::engine::general_purpose::STANDARD.encode([0x00u8, 0x40, 0x00, 0xC0]);
    let script = AgentScript {
        replies_after_start: (0..4)
            .map(|_| json!({ "audio": audio }).to_string())
            .collect(),
        ..AgentScript::default()
    };
    let agent = MockAgent::start(script).await;
    let (capture, _senders) = channel_capture();
    // Room for one waveform and nobody reading
    let (playback_tx, _playback_rx) = mpsc::channel(1);

    let handle = ConversationSession::spawn(
        session_config(),
        Arc::new(StaticCredential(agent.url.clone())),
        capture,
        PlaybackOutput::Channel(playback_tx),
    );
    handle.start().await.unwrap();
    wait_for_state(&handle, SessionState::Active).await;
    assert!(eventually(|| handle.stats().audio_frames_received == 4).await);

    handle.stop().await.unwrap();
    let status = wait_terminal(&handle).await;
    assert_eq!(status.state, SessionState::Closed);
    assert!(eventually(|| agent.connection(0).contains(&Recorded::Close)).await);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_abrupt_disconnect_fails_and_releases_attempt() {
    let agent = MockAgent::start(AgentScript {
        drop_after_frames: Some(1),
        ..AgentScript::default()
    })
    .await;
    let (capture, senders) = channel_capture();

    let handle = ConversationSession::spawn(
        session_config(),
        Arc::new(StaticCredential(agent.url.clone())),
        capture,
        PlaybackOutput::Discard,
    );
    handle.start().await.unwrap();
    wait_for_state(&handle, SessionState::Active).await;
    assert!(eventually(|| !senders.lock().unwrap().is_empty()).await);
    assert!(handle.ready());

    let mic = latest_sender(&senders);
    mic.send(tone_frame(0.4, 0)).await.unwrap();

    let status = wait_terminal(&handle).await;
    assert_eq!(status.state, SessionState::Failed);
    assert!(
        status.message.starts_with("Status: Error - connection error"),
        "unexpected status: {}",
        status.message
    );
    assert!(status.start_enabled());
    assert!(!handle.ready());

    // Capture device released along with the socket
    assert!(eventually(|| mic.is_closed()).await);
    assert!(mic.send(tone_frame(0.4, 250)).await.is_err());
    assert_eq!(agent.binary_frames(0), 1);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_restart_after_failed_attempt() {
    let agent = MockAgent::start(AgentScript::default()).await;
    let webhook = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(500).set_body_string("cold start"))
        .up_to_n_times(1)
        .mount(&webhook)
        .await;
    Mock::given(method("GET"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "signed_url": agent.url })))
        .mount(&webhook)
        .await;
    let (capture, senders) = channel_capture();

    let handle = spawn_session(format!("{}/session", webhook.uri()), capture, PlaybackOutput::Discard);

    handle.start().await.unwrap();
    let status = wait_terminal(&handle).await;
    assert_eq!(status.state, SessionState::Failed);
    assert!(status.message.contains("cold start"));
    assert_eq!(agent.connections_opened(), 0);

    handle.start().await.unwrap();
    wait_for_state(&handle, SessionState::Active).await;
    assert!(handle.ready());
    assert!(eventually(|| senders.lock().unwrap().len() == 1).await);

    latest_sender(&senders).send(tone_frame(0.5, 0)).await.unwrap();
    assert!(eventually(|| agent.binary_frames(0) == 1).await);

    let messages = agent.connection(0);
    assert_eq!(parse_start(&messages[0])["type"], "start");
    assert_eq!(agent.connections_opened(), 1);

    handle.shutdown().await;
}
