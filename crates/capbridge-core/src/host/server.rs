//! Host-side server: answers a client context's capability calls

use super::collaborators::{FileDialog, UpdateSink, WatchService};
use super::grants::{GrantRegistry, WatchPolicy};
use crate::bridge::{BridgeMessage, ProtocolHandler, Transport, TransportSender};
use crate::config::BridgeConfig;
use crate::error::{Error, HostError, Result};
use crate::types::{error_codes, JsonRpcResponse, WatchTarget};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Serves one client context over one transport
pub struct HostServer {
    transport: Transport,
    protocol: Arc<ProtocolHandler>,
    dialog: Arc<dyn FileDialog>,
    watch_service: Arc<dyn WatchService>,
    grants: Arc<RwLock<GrantRegistry>>,
    policy: WatchPolicy,
    dialog_timeout: Option<Duration>,
}

impl HostServer {
    pub fn new(
        transport: Transport,
        dialog: Arc<dyn FileDialog>,
        watch_service: Arc<dyn WatchService>,
    ) -> Self {
        Self {
            transport,
            protocol: Arc::new(ProtocolHandler::new()),
            dialog,
            watch_service,
            grants: Arc::new(RwLock::new(GrantRegistry::new())),
            policy: WatchPolicy::default(),
            dialog_timeout: None,
        }
    }

    pub fn with_config(mut self, config: &BridgeConfig) -> Self {
        self.policy = config.watch_policy;
        self.dialog_timeout = config.dialog_timeout();
        self
    }

    pub fn with_policy(mut self, policy: WatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Shared view of the grants recorded from dialog selections
    pub fn grants(&self) -> Arc<RwLock<GrantRegistry>> {
        Arc::clone(&self.grants)
    }

    /// Handle for pushing updates to this server's client
    pub fn update_sink(&self) -> UpdateSink {
        UpdateSink::new(self.transport.sender())
    }

    /// Serve until the client disconnects
    pub async fn run(self) -> Result<()> {
        info!("Host server started (watch policy: {})", self.policy);
        let sender = self.transport.sender();
        let sink = self.update_sink();

        while let Some(line) = self.transport.recv_line().await {
            let value = match serde_json::from_str::<serde_json::Value>(&line) {
                Ok(v) => v,
                Err(e) => {
                    let snippet = line.chars().take(300).collect::<String>();
                    debug!("Ignoring non-JSON client output ({}): {}", e, snippet);
                    continue;
                }
            };

            match self.protocol.parse_message(&value) {
                Ok(BridgeMessage::OpenFileDialog { id }) => {
                    tokio::spawn(Self::handle_dialog(
                        id,
                        Arc::clone(&self.protocol),
                        Arc::clone(&self.dialog),
                        Arc::clone(&self.grants),
                        self.dialog_timeout,
                        sender.clone(),
                    ));
                }
                Ok(BridgeMessage::Watch(target)) => {
                    tokio::spawn(Self::handle_watch(
                        target,
                        self.policy,
                        Arc::clone(&self.grants),
                        Arc::clone(&self.watch_service),
                        sink.clone(),
                    ));
                }
                Ok(BridgeMessage::UnknownRequest(request)) => {
                    warn!("Client called unsupported method: {}", request.method);
                    if let Err(e) = sender.send_response(&self.protocol.create_method_not_found(&request)) {
                        error!("Failed to send response: {}", e);
                    }
                }
                Ok(BridgeMessage::UnknownNotification(request)) => {
                    debug!("Ignoring notification: {}", request.method);
                }
                Ok(other) => {
                    warn!("Unexpected message from client: {:?}", other);
                }
                Err(e) => {
                    warn!("Failed to parse client message: {}", e);
                }
            }
        }

        info!("Client disconnected");
        Ok(())
    }

    /// Run [`run`](Self::run) on its own task
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    /// Runs off the dispatch loop; priming a large tree must not stall
    /// other requests.
    async fn handle_watch(
        target: WatchTarget,
        policy: WatchPolicy,
        grants: Arc<RwLock<GrantRegistry>>,
        watch_service: Arc<dyn WatchService>,
        sink: UpdateSink,
    ) {
        if let Err(e) = grants.read().await.permits(policy, &target) {
            warn!("Watch on {} refused: {}", target, e);
            return;
        }
        info!("Watching {}", target);
        // No acknowledgment channel back to the client.
        if let Err(e) = watch_service.watch(target.clone(), sink).await {
            warn!("Watch on {} not established: {}", target, e);
        }
    }

    async fn handle_dialog(
        id: serde_json::Value,
        protocol: Arc<ProtocolHandler>,
        dialog: Arc<dyn FileDialog>,
        grants: Arc<RwLock<GrantRegistry>>,
        timeout: Option<Duration>,
        sender: TransportSender,
    ) {
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, dialog.pick_file()).await {
                Ok(result) => result,
                Err(_) => Err(Error::Host(HostError::DialogFailed(format!(
                    "no selection within {:?}",
                    limit
                )))),
            },
            None => dialog.pick_file().await,
        };

        let response: JsonRpcResponse = match outcome {
            Ok(Some(path)) => match grants.write().await.grant(&path) {
                Ok(()) => {
                    info!("Dialog selected {:?}", path);
                    protocol.create_dialog_response(id, Some(path.to_string_lossy().as_ref()))
                }
                Err(e) => protocol.create_error_response(id, error_codes::INTERNAL_ERROR, &e.to_string()),
            },
            Ok(None) => {
                info!("Dialog cancelled");
                protocol.create_dialog_response(id, None)
            }
            Err(e) => {
                error!("Dialog failed: {}", e);
                protocol.create_error_response(id, error_codes::INTERNAL_ERROR, &e.to_string())
            }
        };

        if let Err(e) = sender.send_response(&response) {
            error!("Failed to send dialog response: {}", e);
        }
    }
}
