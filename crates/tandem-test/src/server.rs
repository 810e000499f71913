//! Test server - the shared end of every link

use std::sync::Arc;

use parking_lot::Mutex;
use tandem_core::{Action, NodeId, TestTime};
use tandem_sync::{ChannelContent, ResendRule, UndoRule};

use crate::handle::LogHandle;
use crate::hub::{Hub, LogOwner};

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Label of the server node id
    pub label: String,
    /// Subprotocol announced in the handshake
    pub subprotocol: String,
    /// Retain every entry in the server log
    pub keep_actions: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            label: "server".to_string(),
            subprotocol: "0.0.0".to_string(),
            keep_actions: false,
        }
    }
}

impl ServerConfig {
    /// Label of the server node id
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Subprotocol announced in the handshake
    pub fn with_subprotocol(mut self, subprotocol: impl Into<String>) -> Self {
        self.subprotocol = subprotocol.into();
        self
    }

    /// Retain every entry in the server log
    pub fn with_keep_actions(mut self, keep: bool) -> Self {
        self.keep_actions = keep;
        self
    }
}

/// In-memory server
///
/// Cloning yields another handle to the same server; clients built with a
/// handle share its log, registry and control plane.
#[derive(Clone)]
pub struct TestServer {
    pub(crate) hub: Arc<Mutex<Hub>>,
    node_id: NodeId,
}

impl TestServer {
    /// Server with the default config
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Server built from `config`
    pub fn with_config(config: ServerConfig) -> Self {
        let hub = Hub::new(&config.label, config.subprotocol, config.keep_actions);
        let node_id = hub.server_id().clone();
        tracing::debug!(node = %node_id, "server created");
        Self {
            hub: Arc::new(Mutex::new(hub)),
            node_id,
        }
    }

    /// Server node id
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Time source shared by every log on this server
    pub fn time(&self) -> TestTime {
        self.hub.lock().time().clone()
    }

    /// Subprotocol announced to connecting clients
    pub fn subprotocol(&self) -> String {
        self.hub.lock().server.subprotocol.clone()
    }

    /// Handle to the server log
    pub fn log(&self) -> LogHandle {
        LogHandle::new(self.hub.clone(), LogOwner::Server)
    }

    /// Retain every entry in the server log from now on
    pub fn keep_actions(&self) {
        self.hub.lock().server.log.keep_actions();
    }

    /// Define what a subscriber of `channel` receives
    pub fn on_channel(&self, channel: impl Into<String>, content: impl Into<ChannelContent>) {
        self.hub
            .lock()
            .server
            .registry
            .define_channel(channel, content);
    }

    /// Scope synced actions of `action_type` to the channel `channel` derives
    pub fn resend<F>(&self, action_type: impl Into<String>, channel: F)
    where
        F: Fn(&Action) -> String + Send + 'static,
    {
        self.hub
            .lock()
            .server
            .registry
            .add_resend(ResendRule::for_type(action_type, channel));
    }

    /// Scope synced actions matching `matches` to the channel `channel` derives
    pub fn resend_when<P, F>(&self, matches: P, channel: F)
    where
        P: Fn(&Action) -> bool + Send + 'static,
        F: Fn(&Action) -> String + Send + 'static,
    {
        self.hub
            .lock()
            .server
            .registry
            .add_resend(ResendRule::new(matches, channel));
    }

    /// Undo the next action matching `rule`
    ///
    /// A bare type string is a type filter: `server.undo_next("test")`.
    pub fn undo_next(&self, rule: impl Into<UndoRule>) {
        self.hub.lock().server.control.undo_next(rule.into());
    }

    /// Undo every future action equal to `pattern`
    pub fn undo_action(&self, pattern: Action) {
        self.hub.lock().server.control.undo_action(pattern);
    }

    /// Run `f` with processing paused on every link
    ///
    /// Local writes made inside `f` still land; their diffusion waits and
    /// resumes, in id order, once the outermost scope ends.
    pub fn freeze_processing<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.hub.lock().freeze();
        let _thaw = ThawGuard { hub: &self.hub };
        f()
    }

    /// Is a freeze scope open?
    pub fn is_frozen(&self) -> bool {
        self.hub.lock().server.control.is_frozen()
    }

    /// Clients currently connected, sorted by node id
    pub fn connected(&self) -> Vec<NodeId> {
        self.hub.lock().connected()
    }

    /// Subscribers of `channel`, sorted by node id
    pub fn subscribers(&self, channel: &str) -> Vec<NodeId> {
        self.hub.lock().server.registry.subscribers(channel)
    }
}

impl Default for TestServer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TestServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestServer")
            .field("node_id", &self.node_id)
            .finish()
    }
}

/// Releases a freeze scope even if the closure panics
struct ThawGuard<'a> {
    hub: &'a Mutex<Hub>,
}

impl Drop for ThawGuard<'_> {
    fn drop(&mut self) {
        self.hub.lock().thaw();
    }
}
