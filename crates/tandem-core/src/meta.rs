//! Metadata attached to every logged action

use serde::{Deserialize, Serialize};

use crate::{ActionId, NodeId};

/// Meta - protocol-assigned data for one log entry
///
/// `channels` and `nodes` are routing scope: they stay on the author's own
/// entry and are stripped from every delivered copy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub id: ActionId,
    /// Logical time (mirrors `id.time`)
    pub time: u64,
    /// Local insertion sequence of the owning log
    pub added: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subprotocol: Option<String>,
    #[serde(default)]
    pub sync: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<NodeId>>,
}

impl Meta {
    /// Meta for `id`, unscoped and not yet added
    pub fn new(id: ActionId) -> Self {
        Meta {
            time: id.time,
            id,
            added: 0,
            subprotocol: None,
            sync: false,
            channels: None,
            nodes: None,
        }
    }

    /// Take the routing scope out, leaving the stored form
    pub fn take_routing(&mut self) -> Routing {
        Routing {
            nodes: self.nodes.take(),
            channels: self.channels.take(),
        }
    }

    /// Copy of the routing scope
    pub fn routing(&self) -> Routing {
        Routing {
            nodes: self.nodes.clone(),
            channels: self.channels.clone(),
        }
    }
}

/// Delivery scope of an entry
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Routing {
    pub nodes: Option<Vec<NodeId>>,
    pub channels: Option<Vec<String>>,
}

impl Routing {
    /// No explicit scope: broadcast
    pub fn broadcast() -> Self {
        Routing::default()
    }

    /// Scope that matches nobody (declined entries)
    pub fn nowhere() -> Self {
        Routing {
            nodes: Some(Vec::new()),
            channels: None,
        }
    }

    /// Scope that targets exactly one node
    pub fn to_node(node: NodeId) -> Self {
        Routing {
            nodes: Some(vec![node]),
            channels: None,
        }
    }

    /// No nodes and no channels
    #[inline]
    pub fn is_broadcast(&self) -> bool {
        self.nodes.is_none() && self.channels.is_none()
    }

    /// Append channels to the scope
    pub fn add_channels(&mut self, extra: Vec<String>) {
        if extra.is_empty() {
            return;
        }
        let channels = self.channels.get_or_insert_with(Vec::new);
        for channel in extra {
            if !channels.contains(&channel) {
                channels.push(channel);
            }
        }
    }
}

/// Options for a local `add`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AddOptions {
    /// Mark for cross-node replication
    pub sync: bool,
    /// Explicit recipients
    pub nodes: Option<Vec<NodeId>>,
    /// Channels the action is scoped to
    pub channels: Option<Vec<String>>,
    /// Explicit logical time instead of a clock tick
    pub time: Option<u64>,
}

impl AddOptions {
    /// Plain local add: no sync, no scope, clock time
    pub fn new() -> Self {
        AddOptions::default()
    }

    /// Options with the sync flag set
    pub fn sync() -> Self {
        AddOptions {
            sync: true,
            ..AddOptions::default()
        }
    }

    /// Set the sync flag
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Target explicit recipients
    pub fn with_nodes(mut self, nodes: Vec<NodeId>) -> Self {
        self.nodes = Some(nodes);
        self
    }

    /// Scope to channels
    pub fn with_channels(mut self, channels: Vec<String>) -> Self {
        self.channels = Some(channels);
        self
    }

    /// Use an explicit logical time
    pub fn with_time(mut self, time: u64) -> Self {
        self.time = Some(time);
        self
    }
}

/// Per-action override used by channel definitions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MetaOverride {
    pub time: Option<u64>,
}

impl MetaOverride {
    /// Override the logical time of a channel action
    pub fn time(time: u64) -> Self {
        MetaOverride { time: Some(time) }
    }
}
