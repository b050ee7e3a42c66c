//! The capability surface handed to a client context
//!
//! Exactly three operations cross the boundary:
//!
//! - `open_file_dialog` - request/response, suspends the caller until the host
//!   answers; a cancelled dialog is `Ok(None)`
//! - `watch` - one-way, returns as soon as the message is queued
//! - `register_update_listener` - callback invoked for every update event, in
//!   delivery order, with the payload exactly as the host sent it

use super::channel::HostChannel;
use super::listeners::SubscriptionId;
use super::protocol::ProtocolHandler;
use crate::config::BridgeConfig;
use crate::error::Result;
use crate::types::{methods, SelectedPath, UpdatePayload, WatchTarget};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Immutable set of capabilities exposed to the client
#[derive(Clone)]
pub struct CapabilityBridge {
    channel: Arc<dyn HostChannel>,
    protocol: Arc<ProtocolHandler>,
    dialog_timeout: Option<Duration>,
}

impl CapabilityBridge {
    pub fn new(channel: Arc<dyn HostChannel>) -> Self {
        Self {
            channel,
            protocol: Arc::new(ProtocolHandler::new()),
            dialog_timeout: None,
        }
    }

    pub fn from_config(channel: Arc<dyn HostChannel>, config: &BridgeConfig) -> Self {
        Self::new(channel).with_dialog_timeout(config.dialog_timeout())
    }

    /// Give up on the dialog after `timeout`. Unset by default: the caller
    /// waits as long as the user takes.
    pub fn with_dialog_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.dialog_timeout = timeout;
        self
    }

    /// Ask the host to run its file dialog and wait for the outcome
    pub async fn open_file_dialog(&self) -> Result<Option<SelectedPath>> {
        let reply = self.channel.call(methods::OPEN_FILE_DIALOG, None)?;
        debug!("Waiting for dialog reply {}", reply.id());
        let response = reply.wait(self.dialog_timeout).await?;
        self.protocol.parse_dialog_response(&response)
    }

    /// Same as [`open_file_dialog`](Self::open_file_dialog) for callers outside
    /// an async runtime. Blocks the current thread; ignores the dialog timeout.
    pub fn open_file_dialog_blocking(&self) -> Result<Option<SelectedPath>> {
        let reply = self.channel.call(methods::OPEN_FILE_DIALOG, None)?;
        let response = reply.wait_blocking()?;
        self.protocol.parse_dialog_response(&response)
    }

    /// Forward a watch request. Does not wait for the host and reports no
    /// outcome; only an already-closed channel is an error.
    pub fn watch(&self, target: impl Into<WatchTarget>) -> Result<()> {
        let target = target.into();
        let notification = self.protocol.create_watch_notification(&target);
        self.channel.notify(&notification.method, notification.params)?;
        info!("Watch requested for {}", target);
        Ok(())
    }

    /// Invoke `callback` once per update event until the subscription is
    /// cancelled or the host goes away. Registrations are independent; every
    /// live one sees every event.
    pub fn register_update_listener<F>(&self, mut callback: F) -> Result<Subscription>
    where
        F: FnMut(UpdatePayload) + Send + 'static,
    {
        let mut receiver = self.channel.subscribe()?;
        let id = receiver.id();

        let task = tokio::spawn(async move {
            while let Some(payload) = receiver.recv().await {
                callback(payload);
            }
            debug!("Update listener {} finished", receiver.id());
        });

        Ok(Subscription { id, task })
    }
}

/// Handle to one update-listener registration.
///
/// Dropping the handle leaves the listener running until the context is torn
/// down; call [`cancel`](Self::cancel) to stop it.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    task: tokio::task::JoinHandle<()>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// False once cancelled or once the host's update stream ended
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop delivering events to this listener
    pub fn cancel(self) {
        debug!("Cancelling update listener {}", self.id);
        self.task.abort();
    }

    /// Wait until the update stream ends
    pub async fn closed(self) {
        let _ = self.task.await;
    }
}
