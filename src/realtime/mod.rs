//! Realtime progress stream over websockets

pub mod backoff;
pub mod channel;

pub use backoff::ReconnectBackoff;
pub use channel::{ChannelError, ChannelEvent, ChannelState, CloseReason, RealtimeChannel};
