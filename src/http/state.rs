use crate::session::ConversationHandle;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The conversation this server controls
    pub conversation: ConversationHandle,
}

impl AppState {
    pub fn new(conversation: ConversationHandle) -> Self {
        Self { conversation }
    }
}
