use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use super::messages::StartMessage;
use crate::error::SessionError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Read half of the agent socket, pumped by the session
pub type InboundStream = SplitStream<WsStream>;

/// Something the agent socket reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    /// Binary frames are not part of the inbound protocol; only the size is kept
    Binary(usize),
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

impl TransportEvent {
    /// Map a raw socket read onto a transport event (`None` for control frames)
    pub fn from_read(read: Result<Message, WsError>) -> Option<Self> {
        match read {
            Ok(Message::Text(text)) => Some(TransportEvent::Text(text)),
            Ok(Message::Binary(bytes)) => Some(TransportEvent::Binary(bytes.len())),
            Ok(Message::Close(frame)) => Some(match frame {
                Some(frame) => TransportEvent::Closed {
                    code: Some(u16::from(frame.code)),
                    reason: frame.reason.into_owned(),
                },
                None => TransportEvent::Closed {
                    code: None,
                    reason: String::new(),
                },
            }),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => None,
            Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {
                Some(TransportEvent::Closed {
                    code: None,
                    reason: String::new(),
                })
            }
            Err(e) => Some(TransportEvent::Error(e.to_string())),
        }
    }
}

/// Write half of the single agent socket for one attempt
///
/// Audio can only be written after the start message went out.
pub struct Connection {
    sink: SplitSink<WsStream, Message>,
    start_sent: bool,
    open: bool,
    frames_sent: usize,
}

impl Connection {
    /// Open the socket; returns the write half and the stream of inbound frames
    pub async fn open(url: &str) -> Result<(Self, InboundStream), SessionError> {
        info!("Opening agent connection");

        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| SessionError::TransportOpenFailure(e.to_string()))?;

        info!("Agent connection opened");

        let (sink, stream) = ws.split();
        Ok((
            Self {
                sink,
                start_sent: false,
                open: true,
                frames_sent: 0,
            },
            stream,
        ))
    }

    /// Send the session configuration; must be the first message
    pub async fn send_start(&mut self, message: &StartMessage) -> Result<(), SessionError> {
        if self.start_sent {
            return Err(SessionError::TransportRuntimeError(
                "start message already sent on this connection".into(),
            ));
        }

        let json = message
            .to_json()
            .map_err(|e| SessionError::TransportRuntimeError(e.to_string()))?;
        debug!("Sending start message: {}", json);

        self.send(Message::Text(json)).await?;
        self.start_sent = true;
        Ok(())
    }

    /// Send one encoded audio frame as a binary message
    pub async fn send_audio(&mut self, bytes: Vec<u8>) -> Result<(), SessionError> {
        if !self.start_sent {
            return Err(SessionError::TransportRuntimeError(
                "audio before start message".into(),
            ));
        }
        if bytes.is_empty() {
            return Ok(());
        }

        self.send(Message::Binary(bytes)).await?;
        self.frames_sent += 1;
        Ok(())
    }

    /// Close the socket with a normal close frame; errors are irrelevant here
    pub async fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "client closed".into(),
        };
        if let Err(e) = self.sink.send(Message::Close(Some(frame))).await {
            debug!("Close frame not delivered: {}", e);
        }
        let _ = self.sink.close().await;
        info!("Agent connection closed ({} audio frames sent)", self.frames_sent);
    }

    /// The remote side closed; nothing more may be written
    pub fn mark_closed(&mut self) {
        self.open = false;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn start_sent(&self) -> bool {
        self.start_sent
    }

    pub fn frames_sent(&self) -> usize {
        self.frames_sent
    }

    async fn send(&mut self, message: Message) -> Result<(), SessionError> {
        if !self.open {
            return Err(SessionError::TransportRuntimeError("connection is closed".into()));
        }
        self.sink
            .send(message)
            .await
            .map_err(|e| SessionError::TransportRuntimeError(e.to_string()))
    }
}

/// Next event from the read half (`None` once the socket is finished)
pub async fn next_event(stream: &mut InboundStream) -> Option<TransportEvent> {
    loop {
        let read = stream.next().await?;
        if let Some(event) = TransportEvent::from_read(read) {
            return Some(event);
        }
    }
}
