//! HTTP binding of the clearance gate
//!
//! Reads device identity from `X-Device-ID`, `X-Layer`, `X-Clearance` and
//! `X-Token-ID`, runs it through the gate and answers rejected requests with
//! `{error, reason}` and 401 or 403.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;
pub mod telemetry;

pub use config::{GateServerConfig, Profile};
pub use error::{ApiError, Result};
pub use routes::create_router;
pub use server::{Server, ServerConfig};
pub use state::AppState;
