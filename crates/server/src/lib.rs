//! Lightning credential vault HTTP server.

pub mod auth;
pub mod boot;
pub mod error;
pub mod handlers;
pub mod index;
pub mod metrics;
pub mod presign;
pub mod probe;
pub mod routes;
pub mod state;
pub mod verify;

pub use routes::create_router;
pub use state::AppState;
