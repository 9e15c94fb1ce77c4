//! Real-time chat layer: a `/api/realtime` websocket per client, fanned out
//! through in-memory rooms keyed by conversation.

pub mod events;
pub mod hub;
pub mod session;
pub mod store;
pub mod websocket;

pub use events::{Broadcast, ClientEvent, ErrorCode, ServerEvent};
pub use hub::{ChatHub, Connection, RoomSnapshot};
pub use session::{validate_body, Outcome, Session};
pub use store::{ChatError, ChatStore, PgChatStore};
