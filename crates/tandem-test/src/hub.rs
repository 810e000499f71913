//! Hub - one server, its clients, and the diffusion loop between them
//!
//! Everything a harness touches lives here behind one lock. Public
//! operations mutate and then call [`Hub::pump`], which delivers the oldest
//! pending envelope across every live link until nothing is left to move.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tandem_core::{
    types, Action, ActionId, AddOptions, Meta, NodeId, Routing, TandemError, TandemResult,
    TestTime, UndoError,
};
use tandem_log::ActionLog;
use tandem_sync::{ControlPlane, Direction, Envelope, SubscriptionRegistry, SyncLink};

/// Server half of the hub
pub(crate) struct ServerState {
    pub log: ActionLog,
    pub subprotocol: String,
    pub registry: SubscriptionRegistry,
    pub control: ControlPlane,
    /// Delivery scope of retained entries received from clients
    /// (the stored copy no longer carries it)
    routes: HashMap<ActionId, Routing>,
}

impl ServerState {
    fn route_of(&self, meta: &Meta) -> Routing {
        let routing = meta.routing();
        if !routing.is_broadcast() {
            return routing;
        }
        self.routes.get(&meta.id).cloned().unwrap_or_default()
    }
}

/// Client half of the hub
pub(crate) struct ClientSlot {
    pub log: ActionLog,
    pub link: SyncLink,
    /// Client-local view of acknowledged subscriptions
    pub subscriptions: BTreeSet<String>,
    /// Sync requests waiting for `processed`/`undo`
    awaiting: HashSet<ActionId>,
    outcomes: HashMap<ActionId, Result<(), UndoError>>,
    /// Active `sent` scopes, innermost last
    recorders: Vec<Vec<Action>>,
}

impl ClientSlot {
    fn transmit(&mut self, envelope: Envelope) {
        let action = envelope.action.clone();
        if self.link.send(Direction::ToServer, envelope) {
            for recorder in &mut self.recorders {
                recorder.push(action.clone());
            }
        }
    }

    /// Resolve a sync entry on `processed` or `undo`
    fn settle(&mut self, id: &ActionId, outcome: Result<(), UndoError>) {
        if outcome.is_ok() {
            if let Some((action, _)) = self.log.get(id) {
                match (action.action_type(), action.channel()) {
                    (types::SUBSCRIBE, Some(channel)) => {
                        self.subscriptions.insert(channel.to_string());
                    }
                    (types::UNSUBSCRIBE, Some(channel)) => {
                        self.subscriptions.remove(channel);
                    }
                    _ => {}
                }
            }
        }
        self.log.release(id);
        if self.awaiting.remove(id) {
            self.outcomes.insert(id.clone(), outcome);
        }
    }
}

/// Which log a handle points at
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum LogOwner {
    Server,
    Client(NodeId),
}

pub(crate) struct Hub {
    time: TestTime,
    pub server: ServerState,
    clients: BTreeMap<NodeId, ClientSlot>,
}

impl Hub {
    pub fn new(label: &str, subprotocol: String, keep_actions: bool) -> Self {
        let time = TestTime::new();
        let mut log = ActionLog::new(time.next_node_id(label), time.clone());
        if keep_actions {
            log.keep_actions();
        }
        Hub {
            time,
            server: ServerState {
                log,
                subprotocol,
                registry: SubscriptionRegistry::new(),
                control: ControlPlane::new(),
                routes: HashMap::new(),
            },
            clients: BTreeMap::new(),
        }
    }

    pub fn time(&self) -> &TestTime {
        &self.time
    }

    pub fn server_id(&self) -> &NodeId {
        self.server.log.node_id()
    }

    // ------------------------------------------------------------------
    // Clients
    // ------------------------------------------------------------------

    pub fn add_client(&mut self, label: &str, subprotocol: String, keep_actions: bool) -> NodeId {
        let node = self.time.next_node_id(label);
        let mut log = ActionLog::new(node.clone(), self.time.clone());
        if keep_actions {
            log.keep_actions();
        }
        let slot = ClientSlot {
            log,
            link: SyncLink::new(node.clone(), subprotocol),
            subscriptions: BTreeSet::new(),
            awaiting: HashSet::new(),
            outcomes: HashMap::new(),
            recorders: Vec::new(),
        };
        self.clients.insert(node.clone(), slot);
        tracing::debug!(node = %node, "client created");
        node
    }

    /// Disconnect and forget a client
    pub fn remove_client(&mut self, node: &NodeId) {
        self.disconnect(node);
        self.clients.remove(node);
    }

    pub fn client(&self, node: &NodeId) -> TandemResult<&ClientSlot> {
        self.clients
            .get(node)
            .ok_or_else(|| TandemError::UnknownNode(node.clone()))
    }

    pub fn client_mut(&mut self, node: &NodeId) -> TandemResult<&mut ClientSlot> {
        self.clients
            .get_mut(node)
            .ok_or_else(|| TandemError::UnknownNode(node.clone()))
    }

    pub fn log(&self, owner: &LogOwner) -> TandemResult<&ActionLog> {
        match owner {
            LogOwner::Server => Ok(&self.server.log),
            LogOwner::Client(node) => self.client(node).map(|slot| &slot.log),
        }
    }

    pub fn log_mut(&mut self, owner: &LogOwner) -> TandemResult<&mut ActionLog> {
        match owner {
            LogOwner::Server => Ok(&mut self.server.log),
            LogOwner::Client(node) => self.client_mut(node).map(|slot| &mut slot.log),
        }
    }

    /// Connected clients, sorted
    pub fn connected(&self) -> Vec<NodeId> {
        self.clients
            .iter()
            .filter(|(_, slot)| slot.link.is_connected())
            .map(|(node, _)| node.clone())
            .collect()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Handshake, then resume diffusion from both watermarks
    pub fn connect(&mut self, node: &NodeId) -> TandemResult<()> {
        let frozen = self.server.control.is_frozen();
        let server_subprotocol = self.server.subprotocol.clone();

        let slot = self
            .clients
            .get_mut(node)
            .ok_or_else(|| TandemError::UnknownNode(node.clone()))?;
        slot.link.begin_connect()?;
        slot.link.complete_connect(server_subprotocol)?;
        if frozen {
            slot.link.pause();
        }

        let outgoing: Vec<Envelope> = slot
            .log
            .held_since(slot.link.client_watermark())
            .map(|(action, meta)| Envelope::new(action.clone(), meta.clone()))
            .collect();
        let resent = outgoing.len();
        for envelope in outgoing {
            slot.transmit(envelope);
        }

        let mut replayed = 0;
        let server = &self.server;
        for (action, meta) in server.log.entries_since(slot.link.server_watermark()) {
            let routing = server.route_of(meta);
            if delivers_to(action, meta, &routing, node, &server.registry) {
                slot.link
                    .send(Direction::ToClient, Envelope::new(action.clone(), meta.clone()));
                replayed += 1;
            } else {
                slot.link.advance_watermark(Direction::ToClient, meta.added);
            }
        }

        tracing::debug!(
            node = %node,
            subprotocol = slot.link.client_subprotocol(),
            resent,
            replayed,
            "client connected"
        );
        Ok(())
    }

    /// Drop the link, discarding everything in flight
    pub fn disconnect(&mut self, node: &NodeId) {
        let Some(slot) = self.clients.get_mut(node) else {
            return;
        };
        if !slot.link.is_connected() {
            return;
        }
        let discarded = slot.link.disconnect();
        slot.subscriptions.clear();
        let channels = self.server.registry.remove_node(node);
        tracing::debug!(node = %node, discarded, ?channels, "client disconnected");
    }

    /// Open a freeze scope, pausing every link on the outermost one
    pub fn freeze(&mut self) {
        if self.server.control.freeze() {
            for slot in self.clients.values_mut() {
                slot.link.pause();
            }
            tracing::debug!("processing frozen");
        }
    }

    /// Close a freeze scope, resuming and pumping on the last one
    pub fn thaw(&mut self) {
        if self.server.control.thaw() {
            for slot in self.clients.values_mut() {
                slot.link.resume();
            }
            tracing::debug!("processing resumed");
            self.pump();
        }
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Author an action on a client log, queueing it if it must sync
    pub fn client_add(
        &mut self,
        node: &NodeId,
        action: Action,
        options: AddOptions,
    ) -> TandemResult<Meta> {
        let slot = self.client_mut(node)?;
        let meta = slot.log.add(action.clone(), options);
        if meta.sync {
            slot.transmit(Envelope::new(action, meta.clone()));
        }
        Ok(meta)
    }

    /// Author an action on a client log and wait for its outcome
    pub fn client_sync(
        &mut self,
        node: &NodeId,
        action: Action,
        options: AddOptions,
    ) -> TandemResult<Meta> {
        let frozen = self.server.control.is_frozen();
        let slot = self.client_mut(node)?;
        if !slot.link.is_connected() {
            return Err(TandemError::NotConnected(node.clone()));
        }
        if frozen {
            return Err(TandemError::Frozen);
        }

        let meta = slot.log.add(action.clone(), options.with_sync(true));
        slot.awaiting.insert(meta.id.clone());
        slot.transmit(Envelope::new(action, meta.clone()));

        self.pump();

        let slot = self.client_mut(node)?;
        match slot.outcomes.remove(&meta.id) {
            Some(Ok(())) => Ok(meta),
            Some(Err(undo)) => Err(undo.into()),
            None => {
                slot.awaiting.remove(&meta.id);
                Err(TandemError::Unacknowledged(meta.id))
            }
        }
    }

    /// Author an action on the server log and diffuse it
    pub fn server_add(&mut self, action: Action, options: AddOptions) -> Meta {
        let meta = self.server.log.add(action.clone(), options);
        let routing = meta.routing();
        self.fan_out(&action, &meta, &routing);
        meta
    }

    /// Open a `sent` scope on a client
    pub fn start_recording(&mut self, node: &NodeId) -> TandemResult<()> {
        self.client_mut(node)?.recorders.push(Vec::new());
        Ok(())
    }

    /// Close the innermost `sent` scope
    pub fn stop_recording(&mut self, node: &NodeId) -> Vec<Action> {
        self.clients
            .get_mut(node)
            .and_then(|slot| slot.recorders.pop())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Diffusion
    // ------------------------------------------------------------------

    /// Deliver pending envelopes, oldest id first, until every link is idle
    pub fn pump(&mut self) {
        loop {
            let next = self
                .clients
                .iter()
                .filter_map(|(node, slot)| {
                    slot.link
                        .peek()
                        .map(|(direction, id)| (id.clone(), direction, node.clone()))
                })
                .min_by(|a, b| a.0.cmp(&b.0));

            let Some((_, direction, node)) = next else {
                break;
            };
            let Some(envelope) = self
                .clients
                .get_mut(&node)
                .and_then(|slot| slot.link.pop(direction))
            else {
                break;
            };

            match direction {
                Direction::ToServer => self.receive_on_server(&node, envelope),
                Direction::ToClient => self.receive_on_client(&node, envelope),
            }
        }
    }

    fn fan_out(&mut self, action: &Action, meta: &Meta, routing: &Routing) {
        let registry = &self.server.registry;
        for (node, slot) in self.clients.iter_mut() {
            if !slot.link.is_connected() {
                continue;
            }
            if delivers_to(action, meta, routing, node, registry) {
                tracing::trace!(id = %meta.id, to = %node, "diffuse");
                slot.link
                    .send(Direction::ToClient, Envelope::new(action.clone(), meta.clone()));
            } else {
                slot.link.advance_watermark(Direction::ToClient, meta.added);
            }
        }
    }

    fn receive_on_server(&mut self, from: &NodeId, envelope: Envelope) {
        let Envelope { action, mut meta } = envelope;
        if meta.subprotocol.is_none() {
            if let Some(slot) = self.clients.get(from) {
                meta.subprotocol = Some(slot.link.client_subprotocol().to_string());
            }
        }
        if self.server.log.has(&meta.id) {
            tracing::trace!(id = %meta.id, from = %from, "server already has action");
            return;
        }

        let id = meta.id.clone();
        let reply_to = AddOptions::new().with_nodes(vec![from.clone()]);

        if let Some(verdict) = self.server.control.check(&action) {
            if let Some(stored) = self.server.log.apply(action.clone(), meta) {
                self.remember_route(&stored, Routing::nowhere());
                self.fan_out(&action, &stored, &Routing::nowhere());
            }
            tracing::debug!(id = %id, reason = %verdict.reason, "undo");
            let undo = Action::undo(&id, &verdict.reason, &action, &verdict.extra);
            self.server_add(undo, reply_to);
            return;
        }

        let mut routing = meta.routing();
        routing.add_channels(self.server.registry.resend_channels(&action));

        let Some(stored) = self.server.log.apply(action.clone(), meta) else {
            return;
        };
        self.remember_route(&stored, routing.clone());
        self.fan_out(&action, &stored, &routing);

        match (action.action_type(), action.channel()) {
            (types::SUBSCRIBE, Some(channel)) => self.subscribe(channel, from),
            (types::UNSUBSCRIBE, Some(channel)) => {
                self.server.registry.unsubscribe(channel, from);
                tracing::debug!(node = %from, channel, "unsubscribed");
            }
            (types::SUBSCRIBE | types::UNSUBSCRIBE, None) => {
                tracing::warn!(id = %id, "subscription action without a channel");
            }
            _ => {}
        }

        self.server_add(Action::processed(&id), reply_to);
    }

    fn subscribe(&mut self, channel: &str, node: &NodeId) {
        self.server.registry.subscribe(channel, node.clone());
        let actions = self.server.registry.channel_actions(channel, node);
        tracing::debug!(node = %node, channel, actions = actions.len(), "subscribed");

        for (action, meta_override) in actions {
            let mut options = AddOptions::new().with_nodes(vec![node.clone()]);
            if let Some(time) = meta_override.time {
                options = options.with_time(time);
            }
            self.server_add(action, options);
        }
    }

    fn remember_route(&mut self, stored: &Meta, routing: Routing) {
        if self.server.log.contains(&stored.id) && !routing.is_broadcast() {
            self.server.routes.insert(stored.id.clone(), routing);
        }
    }

    fn receive_on_client(&mut self, to: &NodeId, envelope: Envelope) {
        let server_subprotocol = &self.server.subprotocol;
        let Some(slot) = self.clients.get_mut(to) else {
            return;
        };
        let Envelope { action, mut meta } = envelope;
        if meta.subprotocol.is_none() {
            meta.subprotocol = Some(server_subprotocol.clone());
        }
        if slot.log.apply(action.clone(), meta).is_none() {
            return;
        }

        let Some(target) = action.target_id() else {
            return;
        };
        match action.action_type() {
            types::PROCESSED => slot.settle(&target, Ok(())),
            types::UNDO => slot.settle(&target, Err(UndoError::from_undo(action))),
            _ => {}
        }
    }
}

/// Server -> client delivery filter
///
/// An origin never gets its own action back. Explicit `nodes` and
/// `channels` scope the entry; an unscoped entry is broadcast unless it is
/// one of the protocol's own actions.
pub(crate) fn delivers_to(
    action: &Action,
    meta: &Meta,
    routing: &Routing,
    client: &NodeId,
    registry: &SubscriptionRegistry,
) -> bool {
    if meta.id.is_from(client) {
        return false;
    }
    if routing
        .nodes
        .as_ref()
        .is_some_and(|nodes| nodes.contains(client))
    {
        return true;
    }
    if routing
        .channels
        .as_ref()
        .is_some_and(|channels| channels.iter().any(|c| registry.is_subscribed(c, client)))
    {
        return true;
    }
    routing.is_broadcast() && !action.is_control()
}
