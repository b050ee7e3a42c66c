//! capbridge Core Library
//!
//! A privilege-boundary bridge: a trusted host process exposes a fixed
//! capability surface to an untrusted client context. The client may
//! - open a file dialog on the host and wait for the selection
//! - ask the host to watch a target, without waiting for an answer
//! - register listeners for update events the host pushes back
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐   newline-delimited   ┌──────────────────────────┐
//! │ Client context           │       JSON-RPC        │ Host process             │
//! │                          │                       │                          │
//! │ ClientContext            │  api/openFileDialog → │ HostServer               │
//! │  └─ CapabilityBridge     │  api/watch          → │  ├─ FileDialog           │
//! │      └─ HostConnection ──┼───────────────────────┼─ │  WatchService         │
//! │          └─ Listeners    │ ← api/update          │  └─ GrantRegistry        │
//! └──────────────────────────┘                       └──────────────────────────┘
//! ```
//!
//! - `bridge/`   - capability surface, connection, transport, listeners
//! - `host/`     - host server, collaborators, grants, file watcher
//! - `types/`    - shared identifiers, payloads and wire types
//! - `config.rs` - configuration
//! - `error.rs`  - error types

pub mod bridge;
pub mod config;
pub mod error;
pub mod host;
pub mod types;

pub use error::{Error, Result};
pub use types::*;

pub use bridge::{
    CapabilityBridge, ClientContext, HostChannel, HostConnection, ListenerRegistry, PendingReply,
    ProtocolHandler, Subscription, SubscriptionId, Transport, UpdateReceiver,
};
pub use config::BridgeConfig;
pub use host::{
    ChangeDeriver, DigestDeriver, FileDialog, FsWatchService, GrantRegistry, HostServer,
    ResourceChanged, UpdateSink, WatchPolicy, WatchService,
};
