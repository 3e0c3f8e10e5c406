//! API server for pushq.
//!
//! Accepts submit and test jobs over HTTP and exposes their audit trail.

pub mod error;
pub mod routes;
pub mod state;

pub use state::AppState;
