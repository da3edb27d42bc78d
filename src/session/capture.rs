use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::gate::ReadinessGate;
use super::session::SessionEvent;
use super::stats::StatsRecorder;
use crate::audio::{BackendFactory, FrameEncoder};

/// Running capture pipeline for one attempt
pub(crate) struct CaptureHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl CaptureHandle {
    /// Stop capturing and wait until the device has been released
    pub async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Err(e) = self.task.await {
            error!("Capture task panicked: {}", e);
        }
    }
}

/// Everything the capture task needs, moved into it on spawn
pub(crate) struct CapturePipeline {
    pub attempt: Uuid,
    pub factory: BackendFactory,
    pub encoder: FrameEncoder,
    pub gate: ReadinessGate,
    pub events: mpsc::Sender<SessionEvent>,
    pub stats: StatsRecorder,
}

impl CapturePipeline {
    pub fn spawn(self) -> CaptureHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(stop_rx));
        CaptureHandle {
            stop_tx: Some(stop_tx),
            task,
        }
    }

    async fn run(self, mut stop_rx: oneshot::Receiver<()>) {
        let attempt = self.attempt;

        let mut backend = match (self.factory)() {
            Ok(backend) => backend,
            Err(e) => {
                self.report_unavailable(format!("{:#}", e), &mut stop_rx).await;
                return;
            }
        };

        let mut audio_rx = match backend.start().await {
            Ok(rx) => rx,
            Err(e) => {
                self.report_unavailable(format!("{:#}", e), &mut stop_rx).await;
                return;
            }
        };

        info!("Microphone stream started ({})", backend.name());

        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                frame = audio_rx.recv() => {
                    let Some(frame) = frame else {
                        info!("Capture stream ended");
                        break;
                    };

                    // Gate closed means nothing may go out; drop, never queue
                    if !self.gate.is_open() {
                        self.stats.frame_dropped();
                        continue;
                    }

                    let encoded = match self.encoder.encode(&frame) {
                        Ok(Some(encoded)) => encoded,
                        Ok(None) => {
                            self.stats.frame_dropped();
                            continue;
                        }
                        Err(e) => {
                            warn!("Failed to encode captured frame: {:#}", e);
                            self.stats.frame_dropped();
                            continue;
                        }
                    };

                    match self.events.try_send(SessionEvent::CaptureFrame { attempt, frame: encoded }) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            debug!("Session busy, dropping captured frame");
                            self.stats.frame_dropped();
                        }
                        Err(TrySendError::Closed(_)) => break,
                    }
                }
            }
        }

        if let Err(e) = backend.stop().await {
            error!("Failed to stop capture backend: {}", e);
        }
        info!("Microphone stream stopped");
    }

    async fn report_unavailable(&self, reason: String, stop_rx: &mut oneshot::Receiver<()>) {
        error!("Microphone access denied or failed: {}", reason);
        let event = SessionEvent::MicrophoneUnavailable {
            attempt: self.attempt,
            reason,
        };
        tokio::select! {
            _ = self.events.send(event) => {}
            _ = stop_rx => {}
        }
    }
}
