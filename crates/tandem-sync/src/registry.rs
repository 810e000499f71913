//! Subscription registry - who listens to which channel
//!
//! Channels are named scopes. The server keeps who is subscribed, what a new
//! subscriber receives on join, and which synced actions get rebroadcast to a
//! channel instead of going to everybody.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use tandem_core::{Action, MetaOverride, NodeId};

/// Builds channel contents for a subscribing node
pub type ChannelFactory = Box<dyn Fn(&NodeId) -> Vec<(Action, MetaOverride)> + Send>;

/// What a channel delivers to a new subscriber
pub enum ChannelContent {
    /// Fixed actions, in definition order
    Fixed(Vec<(Action, MetaOverride)>),
    /// Computed per subscriber
    Factory(ChannelFactory),
}

impl ChannelContent {
    /// Content computed per subscriber
    pub fn factory<F>(f: F) -> Self
    where
        F: Fn(&NodeId) -> Vec<(Action, MetaOverride)> + Send + 'static,
    {
        ChannelContent::Factory(Box::new(f))
    }

    fn actions_for(&self, node: &NodeId) -> Vec<(Action, MetaOverride)> {
        match self {
            ChannelContent::Fixed(actions) => actions.clone(),
            ChannelContent::Factory(factory) => factory(node),
        }
    }
}

impl From<Action> for ChannelContent {
    fn from(action: Action) -> Self {
        ChannelContent::Fixed(vec![(action, MetaOverride::default())])
    }
}

impl From<Vec<Action>> for ChannelContent {
    fn from(actions: Vec<Action>) -> Self {
        ChannelContent::Fixed(
            actions
                .into_iter()
                .map(|a| (a, MetaOverride::default()))
                .collect(),
        )
    }
}

impl From<Vec<(Action, MetaOverride)>> for ChannelContent {
    fn from(actions: Vec<(Action, MetaOverride)>) -> Self {
        ChannelContent::Fixed(actions)
    }
}

impl fmt::Debug for ChannelContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelContent::Fixed(actions) => f.debug_tuple("Fixed").field(actions).finish(),
            ChannelContent::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

type ActionPredicate = Box<dyn Fn(&Action) -> bool + Send>;
type ChannelNameFn = Box<dyn Fn(&Action) -> String + Send>;

/// Rebroadcast rule: matching actions are scoped to a derived channel
pub struct ResendRule {
    matches: ActionPredicate,
    channel: ChannelNameFn,
}

impl ResendRule {
    /// Rule scoping actions that match `matches` to `channel(action)`
    pub fn new<P, F>(matches: P, channel: F) -> Self
    where
        P: Fn(&Action) -> bool + Send + 'static,
        F: Fn(&Action) -> String + Send + 'static,
    {
        Self {
            matches: Box::new(matches),
            channel: Box::new(channel),
        }
    }

    /// Rule matching one action type
    pub fn for_type<F>(action_type: impl Into<String>, channel: F) -> Self
    where
        F: Fn(&Action) -> String + Send + 'static,
    {
        let action_type = action_type.into();
        Self::new(move |a: &Action| a.is_type(&action_type), channel)
    }

    fn channel_for(&self, action: &Action) -> Option<String> {
        (self.matches)(action).then(|| (self.channel)(action))
    }
}

impl fmt::Debug for ResendRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResendRule(..)")
    }
}

/// Subscription registry - server-side channel table
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    /// Channel -> subscribers
    subscribers: HashMap<String, BTreeSet<NodeId>>,
    /// Node -> channels it holds
    node_channels: HashMap<NodeId, BTreeSet<String>>,
    /// Channel -> join contents
    definitions: HashMap<String, ChannelContent>,
    resend: Vec<ResendRule>,
}

impl SubscriptionRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) what a channel delivers on join
    pub fn define_channel(&mut self, name: impl Into<String>, content: impl Into<ChannelContent>) {
        self.definitions.insert(name.into(), content.into());
    }

    /// Join contents for `node`, in definition order
    pub fn channel_actions(&self, channel: &str, node: &NodeId) -> Vec<(Action, MetaOverride)> {
        self.definitions
            .get(channel)
            .map(|content| content.actions_for(node))
            .unwrap_or_default()
    }

    /// Returns false if `node` was already subscribed
    pub fn subscribe(&mut self, channel: impl Into<String>, node: NodeId) -> bool {
        let channel = channel.into();
        self.node_channels
            .entry(node.clone())
            .or_default()
            .insert(channel.clone());
        self.subscribers.entry(channel).or_default().insert(node)
    }

    /// Returns false if `node` was not subscribed
    pub fn unsubscribe(&mut self, channel: &str, node: &NodeId) -> bool {
        if let Some(channels) = self.node_channels.get_mut(node) {
            channels.remove(channel);
        }
        self.subscribers
            .get_mut(channel)
            .map(|nodes| nodes.remove(node))
            .unwrap_or(false)
    }

    /// Remove a node from every channel (it disconnected)
    /// Returns the channels it held
    pub fn remove_node(&mut self, node: &NodeId) -> Vec<String> {
        let channels = self.node_channels.remove(node).unwrap_or_default();
        for channel in &channels {
            if let Some(nodes) = self.subscribers.get_mut(channel) {
                nodes.remove(node);
            }
        }
        channels.into_iter().collect()
    }

    /// Is `node` subscribed to `channel`?
    pub fn is_subscribed(&self, channel: &str, node: &NodeId) -> bool {
        self.subscribers
            .get(channel)
            .is_some_and(|nodes| nodes.contains(node))
    }

    /// Subscribers of a channel, sorted
    pub fn subscribers(&self, channel: &str) -> Vec<NodeId> {
        self.subscribers
            .get(channel)
            .map(|nodes| nodes.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Channels a node holds, sorted
    pub fn channels_of(&self, node: &NodeId) -> Vec<String> {
        self.node_channels
            .get(node)
            .map(|channels| channels.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Register a rebroadcast rule
    pub fn add_resend(&mut self, rule: ResendRule) {
        self.resend.push(rule);
    }

    /// Channels every matching resend rule derives for `action`
    pub fn resend_channels(&self, action: &Action) -> Vec<String> {
        let mut channels = Vec::new();
        for channel in self.resend.iter().filter_map(|r| r.channel_for(action)) {
            if !channels.contains(&channel) {
                channels.push(channel);
            }
        }
        channels
    }
}
