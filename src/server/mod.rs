//! HTTP and WebSocket server

pub mod http;
pub mod response;

pub use http::{run, AppState};
