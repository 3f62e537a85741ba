//! Service layer
//!
//! Contains business logic separated from transport handlers.
//! Services orchestrate storage and the membership mirror; the realtime
//! router composes them under its per-room serialization.

mod join_request;
mod membership;
mod message;
mod reads;

pub use join_request::JoinRequests;
pub use membership::MembershipIndex;
pub use message::MessageLog;
pub use reads::ReadTracker;
