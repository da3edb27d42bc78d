use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Statistics about the current (or last) conversation attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Attempt identifier, if an attempt was ever started
    pub attempt_id: Option<String>,

    /// When the attempt started
    pub started_at: Option<DateTime<Utc>>,

    /// Time since the attempt started
    pub duration_secs: f64,

    /// Audio frames written to the socket
    pub frames_sent: usize,

    /// Captured frames discarded (silence, gate closed, channel full)
    pub frames_dropped: usize,

    /// Audio frames received from the agent
    pub audio_frames_received: usize,

    /// Inbound frames that failed to decode or play
    pub playback_errors: usize,

    /// Text observations received
    pub utterances_count: usize,
}

/// Who said it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Agent,
    User,
}

/// A single text observation from the agent stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentUtterance {
    pub speaker: Speaker,

    pub text: String,

    /// When this utterance was received
    pub timestamp: DateTime<Utc>,
}

/// Counters shared between the session driver and its handles
#[derive(Debug, Clone, Default)]
pub(crate) struct StatsRecorder {
    inner: Arc<StatsInner>,
}

#[derive(Debug, Default)]
struct StatsInner {
    attempt: Mutex<Option<(String, DateTime<Utc>)>>,
    frames_sent: AtomicUsize,
    frames_dropped: AtomicUsize,
    audio_frames_received: AtomicUsize,
    playback_errors: AtomicUsize,
    utterances: Mutex<Vec<AgentUtterance>>,
}

impl StatsRecorder {
    /// Reset everything for a new attempt
    pub fn begin_attempt(&self, attempt_id: String) {
        if let Ok(mut attempt) = self.inner.attempt.lock() {
            *attempt = Some((attempt_id, Utc::now()));
        }
        self.inner.frames_sent.store(0, Ordering::SeqCst);
        self.inner.frames_dropped.store(0, Ordering::SeqCst);
        self.inner.audio_frames_received.store(0, Ordering::SeqCst);
        self.inner.playback_errors.store(0, Ordering::SeqCst);
        if let Ok(mut utterances) = self.inner.utterances.lock() {
            utterances.clear();
        }
    }

    pub fn frame_sent(&self) {
        self.inner.frames_sent.fetch_add(1, Ordering::SeqCst);
    }

    pub fn frame_dropped(&self) {
        self.inner.frames_dropped.fetch_add(1, Ordering::SeqCst);
    }

    pub fn audio_received(&self) {
        self.inner.audio_frames_received.fetch_add(1, Ordering::SeqCst);
    }

    pub fn playback_error(&self) {
        self.inner.playback_errors.fetch_add(1, Ordering::SeqCst);
    }

    pub fn utterance(&self, speaker: Speaker, text: String) {
        if let Ok(mut utterances) = self.inner.utterances.lock() {
            utterances.push(AgentUtterance {
                speaker,
                text,
                timestamp: Utc::now(),
            });
        }
    }

    pub fn utterances(&self) -> Vec<AgentUtterance> {
        self.inner
            .utterances
            .lock()
            .map(|u| u.clone())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> SessionStats {
        let attempt = self.inner.attempt.lock().ok().and_then(|a| a.clone());
        let (attempt_id, started_at) = match attempt {
            Some((id, at)) => (Some(id), Some(at)),
            None => (None, None),
        };
        let duration_secs = started_at
            .map(|at| Utc::now().signed_duration_since(at).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        SessionStats {
            attempt_id,
            started_at,
            duration_secs,
            frames_sent: self.inner.frames_sent.load(Ordering::SeqCst),
            frames_dropped: self.inner.frames_dropped.load(Ordering::SeqCst),
            audio_frames_received: self.inner.audio_frames_received.load(Ordering::SeqCst),
            playback_errors: self.inner.playback_errors.load(Ordering::SeqCst),
            utterances_count: self.utterances().len(),
        }
    }
}
