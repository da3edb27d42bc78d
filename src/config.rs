use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;

use crate::audio::AudioEncoding;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub credential: CredentialConfig,
    pub agent: AgentConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialConfig {
    /// Webhook that hands out signed session URLs
    pub url: String,
    /// HTTP method used for the webhook call ("GET" or "POST")
    #[serde(default = "default_method")]
    pub method: String,
    /// Response fields checked, in order, for the session URL
    #[serde(default = "default_url_fields")]
    pub url_fields: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub agent_id: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    pub voice_id: Option<String>,
    pub model_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// Wire encoding used in both directions
    #[serde(default)]
    pub encoding: AudioEncoding,
    /// Duration of one outbound frame
    #[serde(default = "default_frame_duration_ms")]
    pub frame_duration_ms: u64,
    /// Frames whose peak magnitude does not exceed this are not sent (0 disables)
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold: f32,
    /// WAV file streamed as the capture source (default input device when unset)
    pub input_path: Option<PathBuf>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            encoding: AudioEncoding::default(),
            frame_duration_ms: default_frame_duration_ms(),
            silence_threshold: default_silence_threshold(),
            input_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaybackConfig {
    /// WAV file the agent's audio is written to (default output device when unset)
    pub output_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_url_fields() -> Vec<String> {
    vec!["signed_url".to_string(), "token".to_string()]
}

fn default_language() -> String {
    "en".to_string()
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_frame_duration_ms() -> u64 {
    250
}

fn default_silence_threshold() -> f32 {
    0.01
}

impl Config {
    /// Load from a config file, with `CONVAI_`-prefixed environment overrides
    /// (e.g. `CONVAI_AGENT__AGENT_ID`).
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("CONVAI")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
