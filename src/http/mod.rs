//! HTTP control API for a conversation
//!
//! This module exposes the start control and the status readout:
//! - POST /conversation/start - Start a new attempt (409 while one is running)
//! - POST /conversation/stop - Close the current attempt
//! - GET /conversation/status - State, status line and statistics
//! - GET /conversation/utterances - Text received so far
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
