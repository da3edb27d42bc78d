use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared "may send audio" flag
///
/// Closed by default and at the start of every attempt; opened only after the
/// start message has been handed to the transport. Check it at the moment of
/// sending, never cache it.
#[derive(Debug, Clone, Default)]
pub struct ReadinessGate {
    open: Arc<AtomicBool>,
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
