//! Realtime core
//!
//! The membership-aware fanout engine and its transport:
//! - `event`: inbound/outbound tagged unions (the gateway vocabulary)
//! - `registry`: live connections, presence edges, room-subscriber arena
//! - `router`: authorize → mutate → fan out, serialized per room
//! - `socket`: WebSocket endpoint, handshake, read/write pumps

mod event;
mod registry;
mod router;
mod socket;

pub use event::{ClientEvent, ServerEvent};
pub use registry::{ConnectionId, SessionRegistry};
pub use router::EventRouter;
pub use socket::ws_handler;
