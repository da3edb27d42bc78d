// Test helpers: a scripted stand-in for the remote agent and capture/playback fixtures

#![allow(dead_code)]

use convai_duplex::audio::{AudioBackend, BackendFactory, ChannelBackend};
use convai_duplex::AudioFrame;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// What the agent saw on one connection, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

/// How the mock agent behaves on each connection
#[derive(Debug, Clone, Default)]
pub struct AgentScript {
    /// Text messages sent right after the start message arrives
    pub replies_after_start: Vec<String>,
    /// Close the connection (code 1000) after this many binary frames
    pub close_after_frames: Option<usize>,
    /// Drop the TCP connection, without a close frame, after this many binary frames
    pub drop_after_frames: Option<usize>,
}

pub struct MockAgent {
    pub url: String,
    pub connections: Arc<Mutex<Vec<Vec<Recorded>>>>,
    pub connection_count: Arc<AtomicUsize>,
}

impl MockAgent {
    pub async fn start(script: AgentScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/convai", listener.local_addr().unwrap());
        let connections = Arc::new(Mutex::new(Vec::new()));
        let connection_count = Arc::new(AtomicUsize::new(0));

        let conns = Arc::clone(&connections);
        let count = Arc::clone(&connection_count);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let index = {
                    let mut all = conns.lock().unwrap();
                    all.push(Vec::new());
                    all.len() - 1
                };
                count.fetch_add(1, Ordering::SeqCst);

                let conns = Arc::clone(&conns);
                let script = script.clone();
                tokio::spawn(async move {
                    let Ok(ws) = accept_async(stream).await else {
                        return;
                    };
                    let (mut write, mut read) = ws.split();
                    let mut frames = 0usize;
                    let record = |entry: Recorded| conns.lock().unwrap()[index].push(entry);

                    while let Some(Ok(msg)) = read.next().await {
                        match msg {
                            Message::Text(text) => {
                                let is_start = text.contains("\"type\":\"start\"");
                                record(Recorded::Text(text));
                                if is_start {
                                    for reply in &script.replies_after_start {
                                        if write.send(Message::Text(reply.clone())).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                            }
                            Message::Binary(bytes) => {
                                record(Recorded::Binary(bytes));
                                frames += 1;
                                if script.close_after_frames == Some(frames) {
                                    let frame = CloseFrame {
                                        code: CloseCode::Normal,
                                        reason: "conversation over".into(),
                                    };
                                    let _ = write.send(Message::Close(Some(frame))).await;
                                }
                                if script.drop_after_frames == Some(frames) {
                                    // Both halves drop here, taking the socket with them
                                    return;
                                }
                            }
                            Message::Close(_) => {
                                record(Recorded::Close);
                                break;
                            }
                            _ => {}
                        }
                    }
                });
            }
        });

        Self {
            url,
            connections,
            connection_count,
        }
    }

    pub fn connection(&self, index: usize) -> Vec<Recorded> {
        self.connections
            .lock()
            .unwrap()
            .get(index)
            .cloned()
            .unwrap_or_default()
    }

    pub fn connections_opened(&self) -> usize {
        self.connection_count.load(Ordering::SeqCst)
    }

    pub fn binary_frames(&self, index: usize) -> usize {
        self.connection(index)
            .iter()
            .filter(|m| matches!(m, Recorded::Binary(_)))
            .count()
    }
}

/// Capture factory that hands out a fresh channel backend per attempt.
/// The returned list collects the sender of every backend created so far.
pub fn channel_capture() -> (BackendFactory, Arc<Mutex<Vec<mpsc::Sender<AudioFrame>>>>) {
    let senders = Arc::new(Mutex::new(Vec::new()));
    let slot = Arc::clone(&senders);
    let factory: BackendFactory = Arc::new(move || -> anyhow::Result<Box<dyn AudioBackend>> {
        let (backend, tx) = ChannelBackend::new(16);
        slot.lock().unwrap().push(tx);
        Ok(Box::new(backend))
    });
    (factory, senders)
}

/// Capture factory simulating a denied microphone
pub fn denied_capture() -> BackendFactory {
    Arc::new(|| -> anyhow::Result<Box<dyn AudioBackend>> {
        anyhow::bail!("Permission denied by user")
    })
}

pub fn latest_sender(senders: &Arc<Mutex<Vec<mpsc::Sender<AudioFrame>>>>) -> mpsc::Sender<AudioFrame> {
    senders.lock().unwrap().last().cloned().expect("no capture backend claimed yet")
}

/// 250ms of mono 16kHz audio at a constant level
pub fn tone_frame(level: f32, timestamp_ms: u64) -> AudioFrame {
    AudioFrame {
        samples: vec![level; 4000],
        sample_rate: 16000,
        channels: 1,
        timestamp_ms,
    }
}

/// Poll until `check` holds or the timeout expires
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}
