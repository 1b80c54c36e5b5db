//! HTTP surface for the stockade reservation core

pub mod middleware;
pub mod response;
pub mod routes;
pub mod server;
pub mod state;

pub use response::{ApiError, ApiResponse, Meta};
pub use server::{create_app_state, run};
pub use state::AppState;
