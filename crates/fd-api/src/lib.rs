//! # fd-api
//!
//! HTTP layer for Fleetdesk: the JSON API under `/api/v1`, the signed agent
//! channel, the employee portal and the server-rendered admin dashboard.

pub mod agent_signature;
pub mod auth;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod response;
pub mod routes;
pub mod server;
pub mod state;
pub mod web;

#[cfg(test)]
pub mod test_helpers;

pub use error::ApiError;
pub use server::{session_key, ApiServer, ApiServerConfig};
pub use state::AppState;
