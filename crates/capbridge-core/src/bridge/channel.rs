//! The seam between the capability surface and whatever carries its messages

use super::listeners::UpdateReceiver;
use crate::error::{BridgeError, Error, Result};
use crate::types::JsonRpcResponse;
use std::fmt;
use std::time::Duration;
use tokio::sync::oneshot;

/// Channel to the host as seen from the client side.
///
/// Implementations own the raw transport; the capability surface only ever
/// sees these three primitives.
#[cfg_attr(test, mockall::automock)]
pub trait HostChannel: Send + Sync {
    /// Send a request and return a handle to its eventual reply
    fn call(&self, method: &str, params: Option<serde_json::Value>) -> Result<PendingReply>;

    /// Send a one-way message. Never waits on the host.
    fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<()>;

    /// Register a new listener on the host's update stream
    fn subscribe(&self) -> Result<UpdateReceiver>;
}

/// A request in flight.
///
/// Dropping it (after a reply, a timeout, or an abandoned wait) runs the
/// cleanup hook so the channel can forget the request.
pub struct PendingReply {
    id: u64,
    rx: oneshot::Receiver<JsonRpcResponse>,
    cleanup: Option<Box<dyn FnOnce(u64) + Send>>,
}

impl PendingReply {
    pub fn new(id: u64, rx: oneshot::Receiver<JsonRpcResponse>) -> Self {
        Self {
            id,
            rx,
            cleanup: None,
        }
    }

    /// Like [`new`](Self::new), calling `cleanup` with the id on drop
    pub fn with_cleanup<F>(id: u64, rx: oneshot::Receiver<JsonRpcResponse>, cleanup: F) -> Self
    where
        F: FnOnce(u64) + Send + 'static,
    {
        Self {
            id,
            rx,
            cleanup: Some(Box::new(cleanup)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the reply, optionally bounded by `timeout`
    pub async fn wait(mut self, timeout: Option<Duration>) -> Result<JsonRpcResponse> {
        let reply = match timeout {
            Some(limit) => tokio::time::timeout(limit, &mut self.rx)
                .await
                .map_err(|_| Error::Bridge(BridgeError::Timeout))?,
            None => (&mut self.rx).await,
        };

        reply.map_err(|_| Error::Bridge(BridgeError::HostTerminated))
    }

    /// Block the current thread until the reply arrives.
    ///
    /// Panics if called from within an async runtime; use [`wait`](Self::wait) there.
    pub fn wait_blocking(mut self) -> Result<JsonRpcResponse> {
        let (_, placeholder) = oneshot::channel();
        std::mem::replace(&mut self.rx, placeholder)
            .blocking_recv()
            .map_err(|_| Error::Bridge(BridgeError::HostTerminated))
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup(self.id);
        }
    }
}

impl fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingReply").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dropped_sender_means_host_terminated() {
        let (tx, rx) = oneshot::channel();
        drop(tx);
        let err = PendingReply::new(1, rx).wait(None).await.unwrap_err();
        assert!(matches!(err, Error::Bridge(BridgeError::HostTerminated)));
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let (_tx, rx) = oneshot::channel();
        let err = PendingReply::new(1, rx)
            .wait(Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Bridge(BridgeError::Timeout)));
    }

    #[test]
    fn test_wait_blocking_receives() {
        let (tx, rx) = oneshot::channel();
        std::thread::spawn(move || {
            let _ = tx.send(JsonRpcResponse::success(4, serde_json::Value::Null));
        });
        let reply = PendingReply::new(4, rx).wait_blocking().unwrap();
        assert_eq!(reply.id, Some(serde_json::json!(4)));
    }

    #[tokio::test]
    async fn test_cleanup_runs_once_after_timeout() {
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0));
        let seen = std::sync::Arc::clone(&calls);
        let (_tx, rx) = oneshot::channel();

        let reply = PendingReply::with_cleanup(9, rx, move |id| {
            seen.fetch_add(id, std::sync::atomic::Ordering::SeqCst);
        });
        let err = reply.wait(Some(Duration::from_millis(10))).await.unwrap_err();

        assert!(matches!(err, Error::Bridge(BridgeError::Timeout)));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 9);
    }
}
