//! Test client - one node with its own log and a link to a server

use std::sync::Arc;

use parking_lot::Mutex;
use tandem_core::{Action, AddOptions, Meta, NodeId, TandemResult};
use tandem_sync::{LinkState, LinkStats};

use crate::handle::LogHandle;
use crate::hub::{Hub, LogOwner};
use crate::server::TestServer;

/// Client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Server to attach to; a fresh one is created if unset
    pub server: Option<TestServer>,
    /// Subprotocol announced in the handshake
    pub subprotocol: String,
    /// Retain every entry in the client log
    pub keep_actions: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: None,
            subprotocol: "0.0.0".to_string(),
            keep_actions: false,
        }
    }
}

impl ClientConfig {
    /// Attach to an existing server
    pub fn with_server(mut self, server: TestServer) -> Self {
        self.server = Some(server);
        self
    }

    /// Subprotocol announced in the handshake
    pub fn with_subprotocol(mut self, subprotocol: impl Into<String>) -> Self {
        self.subprotocol = subprotocol.into();
        self
    }

    /// Retain every entry in the client log
    pub fn with_keep_actions(mut self, keep: bool) -> Self {
        self.keep_actions = keep;
        self
    }
}

/// In-memory client
///
/// Starts disconnected. Dropping the client disconnects it and removes its
/// log from the server's hub.
pub struct TestClient {
    hub: Arc<Mutex<Hub>>,
    server: TestServer,
    node_id: NodeId,
}

impl TestClient {
    /// Client with its own fresh server
    pub fn new(label: &str) -> Self {
        Self::with_config(label, ClientConfig::default())
    }

    /// Client attached to an existing server
    pub fn with_server(label: &str, server: &TestServer) -> Self {
        Self::with_config(label, ClientConfig::default().with_server(server.clone()))
    }

    /// Client built from `config`
    pub fn with_config(label: &str, config: ClientConfig) -> Self {
        let server = config.server.unwrap_or_default();
        let hub = server.hub.clone();
        let node_id = hub
            .lock()
            .add_client(label, config.subprotocol, config.keep_actions);
        Self {
            hub,
            server,
            node_id,
        }
    }

    /// Node id, stable across reconnects
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Server this client talks to
    pub fn server(&self) -> &TestServer {
        &self.server
    }

    /// Handle to this client's log
    pub fn log(&self) -> LogHandle {
        LogHandle::new(self.hub.clone(), LogOwner::Client(self.node_id.clone()))
    }

    /// Retain every entry in the client log from now on
    pub fn keep_actions(&self) {
        if let Ok(slot) = self.hub.lock().client_mut(&self.node_id) {
            slot.log.keep_actions();
        }
    }

    /// Handshake with the server and resume diffusion
    pub fn connect(&self) -> TandemResult<()> {
        let mut hub = self.hub.lock();
        hub.connect(&self.node_id)?;
        hub.pump();
        Ok(())
    }

    /// Drop the link; anything in flight is discarded and every
    /// subscription is released
    pub fn disconnect(&self) {
        self.hub.lock().disconnect(&self.node_id);
    }

    /// Connection state of the link
    pub fn state(&self) -> LinkState {
        self.hub
            .lock()
            .client(&self.node_id)
            .map(|slot| slot.link.state())
            .unwrap_or_default()
    }

    /// Is the link connected?
    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Link counters
    pub fn stats(&self) -> LinkStats {
        self.hub
            .lock()
            .client(&self.node_id)
            .map(|slot| slot.link.stats().clone())
            .unwrap_or_default()
    }

    /// Add `action` for sync and wait until the server answers
    ///
    /// Returns the action's meta on `processed`. Fails with `Undone` if the
    /// server undid it, `NotConnected` while offline and `Frozen` inside a
    /// freeze scope.
    ///
    /// The harness runs on the caller's thread, so inside a freeze the
    /// answer could only arrive after the scope ends and waiting would never
    /// return. To queue a sync entry while frozen, add it through
    /// [`TestClient::log`] with [`AddOptions::sync`] instead.
    pub fn sync(&self, action: Action) -> TandemResult<Meta> {
        self.sync_with(action, AddOptions::new())
    }

    /// [`TestClient::sync`] with explicit add options (`sync` is forced on)
    pub fn sync_with(&self, action: Action, options: AddOptions) -> TandemResult<Meta> {
        self.hub.lock().client_sync(&self.node_id, action, options)
    }

    /// Actions this client transmitted to the server while `f` ran
    pub fn sent<F>(&self, f: F) -> TandemResult<Vec<Action>>
    where
        F: FnOnce(),
    {
        self.hub.lock().start_recording(&self.node_id)?;
        f();
        Ok(self.hub.lock().stop_recording(&self.node_id))
    }

    /// Client-local view: has the server acknowledged a subscription?
    pub fn subscribed(&self, channel: &str) -> bool {
        self.hub
            .lock()
            .client(&self.node_id)
            .is_ok_and(|slot| slot.subscriptions.contains(channel))
    }
}

impl Drop for TestClient {
    fn drop(&mut self) {
        self.hub.lock().remove_client(&self.node_id);
        tracing::debug!(node = %self.node_id, "client dropped");
    }
}

impl std::fmt::Debug for TestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestClient")
            .field("node_id", &self.node_id)
            .field("server", &self.server.node_id())
            .finish()
    }
}
