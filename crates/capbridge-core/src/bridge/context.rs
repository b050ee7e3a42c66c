//! Restricted client context

use super::surface::{CapabilityBridge, Subscription};
use crate::error::Result;
use crate::types::{SelectedPath, UpdatePayload, WatchState, WatchTarget};

/// The untrusted side of the boundary.
///
/// Receives its capabilities at construction and holds nothing else, so the
/// only way it can reach the host is through the three bridge operations.
pub struct ClientContext {
    capabilities: CapabilityBridge,
    state: WatchState,
}

impl ClientContext {
    pub fn new(capabilities: CapabilityBridge) -> Self {
        Self {
            capabilities,
            state: WatchState::Unwatched,
        }
    }

    pub fn watch_state(&self) -> WatchState {
        self.state
    }

    pub async fn open_file_dialog(&self) -> Result<Option<SelectedPath>> {
        self.capabilities.open_file_dialog().await
    }

    pub fn open_file_dialog_blocking(&self) -> Result<Option<SelectedPath>> {
        self.capabilities.open_file_dialog_blocking()
    }

    /// Forward a watch request; the context stays `Watching` from then on.
    pub fn watch(&mut self, target: impl Into<WatchTarget>) -> Result<()> {
        self.capabilities.watch(target)?;
        self.state = WatchState::Watching;
        Ok(())
    }

    pub fn register_update_listener<F>(&self, callback: F) -> Result<Subscription>
    where
        F: FnMut(UpdatePayload) + Send + 'static,
    {
        self.capabilities.register_update_listener(callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::channel::MockHostChannel;
    use crate::error::{BridgeError, Error};
    use std::sync::Arc;

    #[test]
    fn test_watch_moves_to_watching_and_stays() {
        let mut mock = MockHostChannel::new();
        mock.expect_notify().times(2).returning(|_, _| Ok(()));
        let mut context = ClientContext::new(CapabilityBridge::new(Arc::new(mock)));
        assert_eq!(context.watch_state(), WatchState::Unwatched);

        context.watch("/models/a.vrm").unwrap();
        assert_eq!(context.watch_state(), WatchState::Watching);

        context.watch("/models/b.vrm").unwrap();
        assert_eq!(context.watch_state(), WatchState::Watching);
    }

    #[test]
    fn test_failed_watch_leaves_state_unwatched() {
        let mut mock = MockHostChannel::new();
        mock.expect_notify().times(1).returning(|_, _| {
            Err(Error::Bridge(BridgeError::TransportClosed("gone".into())))
        });
        let mut context = ClientContext::new(CapabilityBridge::new(Arc::new(mock)));

        assert!(context.watch("/models/a.vrm").is_err());
        assert_eq!(context.watch_state(), WatchState::Unwatched);
    }

    #[test]
    fn test_dialog_selection_feeds_watch() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        tx.send(crate::types::JsonRpcResponse::success(
            1,
            serde_json::json!({"path": "/models/a.vrm"}),
        ))
        .unwrap();

        let mut mock = MockHostChannel::new();
        mock.expect_call()
            .times(1)
            .return_once(move |_, _| Ok(crate::bridge::PendingReply::new(1, rx)));
        mock.expect_notify()
            .withf(|_, params| {
                params.as_ref().map(|p| p["target"] == "/models/a.vrm") == Some(true)
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let mut context = ClientContext::new(CapabilityBridge::new(Arc::new(mock)));

        let selected = tokio_test::block_on(context.open_file_dialog()).unwrap();
        let selected = selected.expect("a selection");
        tokio_test::assert_ok!(context.watch(&selected));
        assert_eq!(context.watch_state(), WatchState::Watching);
    }

    #[tokio::test]
    async fn test_updates_reach_context_only_through_listener() {
        let registry = crate::bridge::ListenerRegistry::new();
        let source = registry.clone();
        let mut mock = MockHostChannel::new();
        mock.expect_subscribe()
            .times(1)
            .returning(move || source.register());
        let context = ClientContext::new(CapabilityBridge::new(Arc::new(mock)));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _sub = context
            .register_update_listener(move |p| {
                let _ = tx.send(p);
            })
            .unwrap();

        registry.dispatch(&UpdatePayload::new(b"one".to_vec()));
        let got = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.as_bytes(), b"one");
    }
}
