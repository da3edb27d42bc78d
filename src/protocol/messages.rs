use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// First message on every connection; configures the agent session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub agent_id: String,
    pub language: String,
    pub sample_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
}

impl StartMessage {
    pub fn new(agent_id: impl Into<String>, language: impl Into<String>, sample_rate: u32) -> Self {
        Self {
            kind: "start".to_string(),
            agent_id: agent_id.into(),
            language: language.into(),
            sample_rate,
            voice_id: None,
            model_id: None,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// What an inbound text message turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEnvelope {
    /// Decoded audio payload for playback
    Audio(Vec<u8>),
    /// Audio field present but not valid base64
    InvalidAudio(String),
    /// The agent's textual reply
    AgentText(String),
    /// What the agent heard the user say
    UserTranscript(String),
    /// Anything else (metadata, pings, unknown events)
    Ignored,
}

impl InboundEnvelope {
    /// Classify a raw text frame. Unparseable input is ignored, not an error.
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Self::from_value(&value),
            Err(_) => InboundEnvelope::Ignored,
        }
    }

    pub fn from_value(value: &Value) -> Self {
        let audio = value.get("audio").and_then(Value::as_str).or_else(|| {
            value
                .get("audio_event")
                .and_then(|event| event.get("audio_base_64"))
                .and_then(Value::as_str)
        });
        if let Some(encoded) = audio {
            return match base64::engine::general_purpose::STANDARD.decode(encoded) {
                Ok(bytes) => InboundEnvelope::Audio(bytes),
                Err(e) => InboundEnvelope::InvalidAudio(e.to_string()),
            };
        }

        if value.get("type").and_then(Value::as_str) == Some("response") {
            if let Some(text) = value.get("text").and_then(Value::as_str) {
                return InboundEnvelope::AgentText(text.to_string());
            }
        }

        if let Some(text) = value
            .get("agent_response_event")
            .and_then(|event| event.get("agent_response"))
            .and_then(Value::as_str)
        {
            return InboundEnvelope::AgentText(text.to_string());
        }

        if let Some(text) = value
            .get("user_transcription_event")
            .and_then(|event| event.get("user_transcript"))
            .and_then(Value::as_str)
        {
            return InboundEnvelope::UserTranscript(text.to_string());
        }

        InboundEnvelope::Ignored
    }
}
