//! Host-side collaborator interfaces
//!
//! The host server does not know how a dialog is shown or how changes are
//! detected. It calls into these traits and hands watch services an
//! [`UpdateSink`] to push payloads back to the client.

use crate::bridge::{ProtocolHandler, TransportSender};
use crate::error::Result;
use crate::types::{UpdatePayload, WatchTarget};
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::trace;

/// Shows a file-selection interaction to the user
#[async_trait]
pub trait FileDialog: Send + Sync {
    /// `Ok(None)` when the user cancels
    async fn pick_file(&self) -> Result<Option<PathBuf>>;
}

/// Establishes and monitors watches
#[async_trait]
pub trait WatchService: Send + Sync {
    /// Start monitoring `target`, pushing change payloads into `sink`
    async fn watch(&self, target: WatchTarget, sink: UpdateSink) -> Result<()>;
}

/// Pushes update events to the connected client
#[derive(Debug, Clone)]
pub struct UpdateSink {
    sender: TransportSender,
    protocol: Arc<ProtocolHandler>,
}

impl UpdateSink {
    pub fn new(sender: TransportSender) -> Self {
        Self {
            sender,
            protocol: Arc::new(ProtocolHandler::new()),
        }
    }

    /// Queue a payload for delivery. Errors once the client is gone.
    pub fn emit(&self, payload: &UpdatePayload) -> Result<()> {
        trace!("Emitting update ({} bytes)", payload.len());
        self.sender
            .send_request(&self.protocol.create_update_notification(payload))
    }

    pub fn emit_json<T: Serialize>(&self, value: &T) -> Result<()> {
        self.emit(&UpdatePayload::from_json(value)?)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
