//! Log handles - shared views of one log inside a hub

use std::sync::Arc;

use parking_lot::Mutex;
use tandem_core::{Action, AddOptions, Meta, NodeId, TandemResult};

use crate::hub::{Hub, LogOwner};

/// Handle to the server log or one client's log
///
/// Reads return owned snapshots, in id order unless stated otherwise.
#[derive(Clone)]
pub struct LogHandle {
    hub: Arc<Mutex<Hub>>,
    owner: LogOwner,
}

impl LogHandle {
    pub(crate) fn new(hub: Arc<Mutex<Hub>>, owner: LogOwner) -> Self {
        Self { hub, owner }
    }

    /// Node that owns the log
    pub fn node_id(&self) -> TandemResult<NodeId> {
        let hub = self.hub.lock();
        hub.log(&self.owner).map(|log| log.node_id().clone())
    }

    /// Append an action and diffuse it
    ///
    /// On a client, a `sync` entry goes to the server now if the client is
    /// connected, otherwise on the next connect. On the server, `nodes` and
    /// `channels` scope delivery; unscoped entries reach every client.
    pub fn add(&self, action: Action, options: AddOptions) -> TandemResult<Meta> {
        let mut hub = self.hub.lock();
        let meta = match &self.owner {
            LogOwner::Server => hub.server_add(action, options),
            LogOwner::Client(node) => hub.client_add(node, action, options)?,
        };
        hub.pump();
        Ok(meta)
    }

    /// Stored actions in id order
    pub fn actions(&self) -> Vec<Action> {
        let hub = self.hub.lock();
        hub.log(&self.owner)
            .map(|log| log.actions().cloned().collect())
            .unwrap_or_default()
    }

    /// Stored entries with meta in id order
    pub fn entries(&self) -> Vec<(Action, Meta)> {
        let hub = self.hub.lock();
        hub.log(&self.owner)
            .map(|log| {
                log.entries()
                    .map(|(action, meta)| (action.clone(), meta.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Entries in insertion order
    pub fn entries_by_added(&self) -> Vec<(Action, Meta)> {
        let hub = self.hub.lock();
        hub.log(&self.owner)
            .map(|log| {
                log.entries_by_added()
                    .into_iter()
                    .map(|(action, meta)| (action.clone(), meta.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Retain every entry from now on
    pub fn keep_actions(&self) -> TandemResult<()> {
        self.hub.lock().log_mut(&self.owner)?.keep_actions();
        Ok(())
    }

    /// Observe every accepted entry
    ///
    /// The listener runs while the harness is locked and must not call back
    /// into it.
    pub fn on_add<F>(&self, listener: F) -> TandemResult<()>
    where
        F: Fn(&Action, &Meta) + Send + 'static,
    {
        self.hub.lock().log_mut(&self.owner)?.on_add(Box::new(listener));
        Ok(())
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        let hub = self.hub.lock();
        hub.log(&self.owner).map(|log| log.len()).unwrap_or(0)
    }

    /// No stored entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogHandle").field("owner", &self.owner).finish()
    }
}
