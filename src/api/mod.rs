//! HTTP surface.
//!
//! `api_router()` returns a composable `Router` with the HTML UI, health
//! check and the three pipeline endpoints. Every request passes through
//! the access logger; uploads are bounded by the configured body limit.

pub mod endpoints;
pub mod error;
pub mod middleware;
pub mod router;
pub mod server;
pub mod types;

pub use error::ApiError;
pub use router::api_router;
pub use server::{start_server_on, GemhosServer, ServerSession};
pub use types::ApiContext;
