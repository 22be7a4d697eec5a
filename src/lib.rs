pub mod serial;
pub mod firmware;
pub mod session;
pub mod config;
pub mod commands;

pub use config::SessionConfig;
pub use session::{ConnectionState, SessionManager};
