//! Signaling: message types, dispatch and the WebSocket transport

pub mod dispatcher;
pub mod outbox;
pub mod protocol;
pub mod websocket;

pub use dispatcher::SignalingDispatcher;
pub use outbox::Outbox;
pub use protocol::{ClientMessage, LeaveRequest, ServerMessage, SessionDescription, SessionRequest};
pub use websocket::{WebSocketServerHandle, WebSocketSignalingServer};
