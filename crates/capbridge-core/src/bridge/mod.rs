//! Client side of the capability bridge
//!
//! This module implements everything the restricted client context links
//! against: the capability surface, the connection that carries it to the
//! host over newline-delimited JSON-RPC, and the update listener registry.
//!
//! # Architecture
//!
//! - `HostChannel` - seam between the surface and the wire
//! - `HostConnection` - `HostChannel` over a `Transport`
//! - `CapabilityBridge` - the three operations a client may call
//! - `ClientContext` - the restricted side, constructed with its capabilities

mod channel;
mod connection;
mod context;
mod listeners;
mod protocol;
mod surface;
mod transport;

pub use channel::{HostChannel, PendingReply};
pub use connection::HostConnection;
pub use context::ClientContext;
pub use listeners::{ListenerRegistry, SubscriptionId, UpdateReceiver};
pub use protocol::{BridgeMessage, ProtocolHandler};
pub use surface::{CapabilityBridge, Subscription};
pub use transport::{Transport, TransportSender, DEFAULT_MAX_LINE_BYTES};
