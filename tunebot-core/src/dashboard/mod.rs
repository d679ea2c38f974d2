//! Read-only status API and control endpoint over HTTP, plus a server-sent
//! event stream of session changes.

pub mod routes;
pub mod server;

pub use routes::{router, ControlRequest, DashboardState};
pub use server::spawn_dashboard;
