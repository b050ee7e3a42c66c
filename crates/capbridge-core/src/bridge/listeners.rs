//! Update listener registry
//!
//! Every registered listener gets its own unbounded queue, so one slow
//! callback never drops or delays events for another, and each listener sees
//! the host's delivery order exactly.

use crate::error::{BridgeError, Error, Result};
use crate::types::UpdatePayload;
use futures::Stream;
use parking_lot::Mutex;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Identifier of one listener registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Default)]
struct RegistryState {
    listeners: Vec<(SubscriptionId, mpsc::UnboundedSender<UpdatePayload>)>,
    closed: bool,
}

/// Fan-out table of update listeners
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener. Fails once the event source has closed.
    pub fn register(&self) -> Result<UpdateReceiver> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::Bridge(BridgeError::TransportClosed(
                "update stream has ended".to_string(),
            )));
        }

        let id = SubscriptionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        state.listeners.push((id, tx));
        debug!("Registered update listener {} ({} total)", id, state.listeners.len());

        Ok(UpdateReceiver {
            id,
            rx,
            registry: Arc::downgrade(&self.state),
        })
    }

    /// Deliver a payload to every live listener. Returns how many received it.
    pub fn dispatch(&self, payload: &UpdatePayload) -> usize {
        let mut state = self.state.lock();
        state
            .listeners
            .retain(|(_, tx)| tx.send(payload.clone()).is_ok());
        trace!("Dispatched update to {} listener(s)", state.listeners.len());
        state.listeners.len()
    }

    pub fn unregister(&self, id: SubscriptionId) -> bool {
        Self::remove(&self.state, id)
    }

    /// End every listener stream and refuse new registrations
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.listeners.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(state: &Mutex<RegistryState>, id: SubscriptionId) -> bool {
        let mut state = state.lock();
        let before = state.listeners.len();
        state.listeners.retain(|(existing, _)| *existing != id);
        before != state.listeners.len()
    }
}

/// Receiving end of one listener registration. Unregisters on drop.
pub struct UpdateReceiver {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<UpdatePayload>,
    registry: Weak<Mutex<RegistryState>>,
}

impl UpdateReceiver {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next payload, or `None` once the event source has closed
    pub async fn recv(&mut self) -> Option<UpdatePayload> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<UpdatePayload> {
        self.rx.try_recv().ok()
    }
}

impl Stream for UpdateReceiver {
    type Item = UpdatePayload;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for UpdateReceiver {
    fn drop(&mut self) {
        if let Some(state) = self.registry.upgrade() {
            if ListenerRegistry::remove(&state, self.id) {
                debug!("Unregistered update listener {}", self.id);
            }
        }
    }
}

impl fmt::Debug for UpdateReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateReceiver").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_dispatch_fans_out_in_order() {
        let registry = ListenerRegistry::new();
        let mut a = registry.register().unwrap();
        let mut b = registry.register().unwrap();

        for i in 0..3u8 {
            assert_eq!(registry.dispatch(&UpdatePayload::new(vec![i])), 2);
        }

        for rx in [&mut a, &mut b] {
            for i in 0..3u8 {
                assert_eq!(rx.recv().await.unwrap().as_bytes(), &[i]);
            }
        }
    }

    #[tokio::test]
    async fn test_drop_unregisters() {
        let registry = ListenerRegistry::new();
        let a = registry.register().unwrap();
        let _b = registry.register().unwrap();
        assert_eq!(registry.len(), 2);

        drop(a);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.dispatch(&UpdatePayload::new(b"x".to_vec())), 1);
    }

    #[tokio::test]
    async fn test_close_ends_streams_and_refuses_new() {
        let registry = ListenerRegistry::new();
        let mut rx = registry.register().unwrap();
        registry.dispatch(&UpdatePayload::new(b"last".to_vec()));
        registry.close();

        assert_eq!(rx.next().await.unwrap().as_bytes(), b"last");
        assert!(rx.next().await.is_none());
        assert!(registry.register().is_err());
        assert!(registry.is_closed());
    }

    #[test]
    fn test_unregister_by_id() {
        let registry = ListenerRegistry::new();
        let rx = registry.register().unwrap();
        assert!(registry.unregister(rx.id()));
        assert!(!registry.unregister(rx.id()));
        assert!(registry.is_empty());
    }
}
