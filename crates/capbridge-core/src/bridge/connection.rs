//! Client-side connection to the host process
//!
//! `HostConnection` implements [`HostChannel`] over a [`Transport`]: requests
//! are matched to replies by id, `api/update` notifications are fanned out to
//! the listener registry, and a vanished host fails everything that is still
//! waiting instead of leaving it hanging.

use super::channel::{HostChannel, PendingReply};
use super::listeners::{ListenerRegistry, UpdateReceiver};
use super::protocol::{BridgeMessage, ProtocolHandler};
use super::transport::{Transport, TransportSender};
use crate::error::{BridgeError, Error, Result};
use crate::types::{JsonRpcRequest, JsonRpcResponse};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

#[derive(Default)]
struct PendingTable {
    waiters: HashMap<u64, oneshot::Sender<JsonRpcResponse>>,
    closed: bool,
}

/// Connection from a client context to its host
pub struct HostConnection {
    protocol: ProtocolHandler,
    sender: TransportSender,
    pending: Arc<Mutex<PendingTable>>,
    listeners: ListenerRegistry,
    message_task: tokio::task::JoinHandle<()>,
}

impl HostConnection {
    /// Take ownership of a transport and start the message loop
    pub fn new(transport: Transport) -> Self {
        let sender = transport.sender();
        let pending = Arc::new(Mutex::new(PendingTable::default()));
        let listeners = ListenerRegistry::new();

        let message_task = tokio::spawn(Self::message_loop(
            transport,
            Arc::clone(&pending),
            listeners.clone(),
        ));

        Self {
            protocol: ProtocolHandler::new(),
            sender,
            pending,
            listeners,
            message_task,
        }
    }

    /// Connect to the parent host over this process's stdio
    pub fn stdio() -> Self {
        Self::new(Transport::stdio())
    }

    /// False once the host has gone away
    pub fn is_connected(&self) -> bool {
        !self.pending.lock().closed && !self.sender.is_closed()
    }

    /// Number of requests still waiting for a reply
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().waiters.len()
    }

    fn send(&self, message: &JsonRpcRequest) -> Result<()> {
        if self.pending.lock().closed {
            return Err(Error::Bridge(BridgeError::TransportClosed(
                "host connection closed".to_string(),
            )));
        }
        self.sender.send_request(message)
    }

    async fn message_loop(
        transport: Transport,
        pending: Arc<Mutex<PendingTable>>,
        listeners: ListenerRegistry,
    ) {
        let protocol = ProtocolHandler::new();

        while let Some(line) = transport.recv_line().await {
            let value = match serde_json::from_str::<serde_json::Value>(&line) {
                Ok(v) => v,
                Err(e) => {
                    let snippet = line.chars().take(300).collect::<String>();
                    debug!("Ignoring non-JSON host output ({}): {}", e, snippet);
                    continue;
                }
            };

            match protocol.parse_message(&value) {
                Ok(BridgeMessage::Response(response)) => {
                    let Some(id) = response.id.as_ref().and_then(|v| v.as_u64()) else {
                        warn!("Received response without a numeric id: {:?}", response.id);
                        continue;
                    };
                    let waiter = pending.lock().waiters.remove(&id);
                    match waiter {
                        Some(tx) => {
                            debug!("Delivering response for request {}", id);
                            // The caller may have timed out and dropped its receiver.
                            let _ = tx.send(response);
                        }
                        None => warn!("Received response for unknown request: {}", id),
                    }
                }
                Ok(BridgeMessage::Update(payload)) => {
                    let delivered = listeners.dispatch(&payload);
                    if delivered == 0 {
                        debug!("No listeners for update ({} bytes)", payload.len());
                    }
                }
                Ok(other) => {
                    warn!("Unexpected message from host: {:?}", other);
                }
                Err(e) => {
                    warn!("Failed to parse host message: {}", e);
                }
            }
        }

        info!("Host connection closed");
        {
            let mut table = pending.lock();
            table.closed = true;
            // Dropping the senders wakes every waiter with HostTerminated.
            table.waiters.clear();
        }
        listeners.close();
    }
}

impl HostChannel for HostConnection {
    fn call(&self, method: &str, params: Option<serde_json::Value>) -> Result<PendingReply> {
        let request = self.protocol.create_request(method, params);
        let id = request
            .id
            .as_ref()
            .and_then(|v| v.as_u64())
            .ok_or_else(|| Error::Bridge(BridgeError::InvalidMessage("Request missing ID".to_string())))?;
        let (tx, rx) = oneshot::channel();

        {
            let mut table = self.pending.lock();
            if table.closed {
                return Err(Error::Bridge(BridgeError::TransportClosed(
                    "host connection closed".to_string(),
                )));
            }
            table.waiters.insert(id, tx);
        }

        if let Err(e) = self.sender.send_request(&request) {
            self.pending.lock().waiters.remove(&id);
            return Err(e);
        }

        debug!("Request {} ({}) sent", id, method);
        let pending = Arc::downgrade(&self.pending);
        Ok(PendingReply::with_cleanup(id, rx, move |id| {
            if let Some(pending) = pending.upgrade() {
                if pending.lock().waiters.remove(&id).is_some() {
                    debug!("Request {} abandoned before its reply", id);
                }
            }
        }))
    }

    fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<()> {
        let notification = JsonRpcRequest::notification(method, params);
        self.send(&notification)?;
        debug!("Notification {} sent", method);
        Ok(())
    }

    fn subscribe(&self) -> Result<UpdateReceiver> {
        self.listeners.register()
    }
}

impl Drop for HostConnection {
    fn drop(&mut self) {
        self.message_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{methods, UpdatePayload};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    async fn next_request(host: &Transport) -> JsonRpcRequest {
        let line = host
            .recv_line_timeout(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_call_matches_reply_by_id() {
        let (client, host) = Transport::in_memory_pair();
        let connection = HostConnection::new(client);

        let reply = connection.call(methods::OPEN_FILE_DIALOG, None).unwrap();
        let request = next_request(&host).await;
        assert_eq!(request.method, methods::OPEN_FILE_DIALOG);
        assert_eq!(request.id, Some(serde_json::json!(reply.id())));

        host.send_response(&JsonRpcResponse::success(
            reply.id(),
            serde_json::json!({"path": "/a.vrm"}),
        ))
        .unwrap();

        let response = reply.wait(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(response.result.unwrap()["path"], "/a.vrm");
        assert_eq!(connection.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_host_exit_fails_pending_requests() {
        let (client, host) = Transport::in_memory_pair();
        let connection = HostConnection::new(client);

        let reply = connection.call(methods::OPEN_FILE_DIALOG, None).unwrap();
        let _ = next_request(&host).await;
        drop(host);

        let err = reply.wait(Some(Duration::from_secs(1))).await.unwrap_err();
        assert!(matches!(err, Error::Bridge(BridgeError::HostTerminated)));

        // The loop marks the table closed right after failing the waiters.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!connection.is_connected());
        let err = connection.notify(methods::WATCH, None).unwrap_err();
        assert!(err.is_transport_failure());
        assert!(connection.call(methods::OPEN_FILE_DIALOG, None).is_err());
        assert!(connection.subscribe().is_err());
    }

    #[tokio::test]
    async fn test_updates_reach_subscribers_and_garbage_is_skipped() {
        let (client, host) = Transport::in_memory_pair();
        let connection = HostConnection::new(client);
        let mut rx = connection.subscribe().unwrap();

        let protocol = ProtocolHandler::new();
        host.sender().send(&serde_json::json!({"unexpected": true})).unwrap();
        host.send_request(&protocol.create_update_notification(&UpdatePayload::new(b"tex".to_vec())))
            .unwrap();

        let payload = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload.as_bytes(), b"tex");
    }

    #[tokio::test]
    async fn test_timed_out_request_is_forgotten() {
        let (client, host) = Transport::in_memory_pair();
        let connection = HostConnection::new(client);

        let reply = connection.call(methods::OPEN_FILE_DIALOG, None).unwrap();
        let id = reply.id();
        let _ = next_request(&host).await;
        assert_eq!(connection.pending_requests(), 1);

        let err = reply.wait(Some(Duration::from_millis(20))).await.unwrap_err();
        assert!(matches!(err, Error::Bridge(BridgeError::Timeout)));
        assert_eq!(connection.pending_requests(), 0);

        // A late reply is dropped without disturbing the connection.
        host.send_response(&JsonRpcResponse::success(id, serde_json::json!({"path": null})))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(connection.is_connected());
    }

    #[tokio::test]
    async fn test_bad_lines_from_host_do_not_end_the_connection() {
        let (client_io, mut host_io) = tokio::io::duplex(4096);
        let (read, write) = tokio::io::split(client_io);
        let connection = HostConnection::new(Transport::new(read, write));
        let mut rx = connection.subscribe().unwrap();

        let update = ProtocolHandler::new()
            .create_update_notification(&UpdatePayload::new(b"after".to_vec()));
        let mut bytes = b"\xff\xfe garbage\nnot json at all\n".to_vec();
        bytes.extend(serde_json::to_vec(&update).unwrap());
        bytes.push(b'\n');
        host_io.write_all(&bytes).await.unwrap();

        let payload = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload.as_bytes(), b"after");
        assert!(connection.is_connected());
        assert!(connection.notify(methods::WATCH, None).is_ok());
    }
}
