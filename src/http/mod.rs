//! HTTP API for controlling and observing the voice session
//!
//! - POST /session/start - Start a conversation
//! - POST /session/stop - Close the channel and return to idle
//! - POST /session/retry - Retry after an error
//! - POST /session/reauth - Report a new credential after an auth failure
//! - GET /session/status - Current state, error and last image
//! - GET /session/transcript - Rolling history, newest first
//! - GET /session/actions - Dispatched actions, newest first
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::{ControlResponse, ErrorResponse, StatusResponse};
pub use routes::create_router;
pub use state::AppState;
