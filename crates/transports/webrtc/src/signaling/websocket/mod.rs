//! WebSocket transport for signaling messages

mod handler;
mod server;

pub use handler::handle_connection;
pub use server::{WebSocketServerHandle, WebSocketSignalingServer};
