//! Push-event transport to the detection service.
//!
//! `ReconnectingChannel` owns the connection lifecycle and the typed event
//! registry; `WsTransport` is the WebSocket implementation of the
//! `StreamTransport` seam.

mod channel;
mod events;
mod ws;

pub use channel::{
    ChannelState, ReconnectPolicy, ReconnectingChannel, Recv, StreamConnection, StreamTransport,
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY,
};
pub use events::{
    ChannelEvent, DetectionsEvent, EventKind, EventRegistry, Listener, ListenerId, PersonDetected,
    StatusEvent, StreamEvent,
};
pub use ws::{WsConnection, WsTransport};
