//! Sync link - the reconciliation channel between one client and the server
//!
//! A link owns two id-ordered outboxes. Nothing here touches a log: the
//! harness decides what to enqueue and applies what it pops.

use std::collections::BTreeMap;

use tandem_core::{Action, ActionId, Meta, NodeId, TandemError, TandemResult};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Which way an envelope travels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ToServer,
    ToClient,
}

/// One action in flight
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub action: Action,
    /// Sender's meta, routing scope included
    pub meta: Meta,
}

impl Envelope {
    /// Wrap an action with its sender-side meta
    pub fn new(action: Action, meta: Meta) -> Self {
        Self { action, meta }
    }

    /// Id of the carried action
    #[inline]
    pub fn id(&self) -> &ActionId {
        &self.meta.id
    }

    /// `added` of the entry in the sender's log
    #[inline]
    pub fn source_added(&self) -> u64 {
        self.meta.added
    }
}

/// Link counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub connects: u64,
    pub sent_to_server: u64,
    pub sent_to_client: u64,
    pub delivered: u64,
    /// Envelopes thrown away by a disconnect
    pub discarded: u64,
}

/// Sync link between a client log and the server log
///
/// INVARIANT: outboxes are empty unless the link is connected
#[derive(Debug)]
pub struct SyncLink {
    client: NodeId,
    state: LinkState,
    client_subprotocol: String,
    server_subprotocol: Option<String>,
    paused: bool,
    to_server: BTreeMap<ActionId, Envelope>,
    to_client: BTreeMap<ActionId, Envelope>,
    /// Client `added` up to which sync entries were handed to the link
    client_watermark: u64,
    /// Server `added` up to which entries were handed to the link
    server_watermark: u64,
    stats: LinkStats,
}

impl SyncLink {
    /// Disconnected link for `client`
    pub fn new(client: NodeId, client_subprotocol: impl Into<String>) -> Self {
        Self {
            client,
            state: LinkState::Disconnected,
            client_subprotocol: client_subprotocol.into(),
            server_subprotocol: None,
            paused: false,
            to_server: BTreeMap::new(),
            to_client: BTreeMap::new(),
            client_watermark: 0,
            server_watermark: 0,
            stats: LinkStats::default(),
        }
    }

    /// Client node on this link
    pub fn client(&self) -> &NodeId {
        &self.client
    }

    /// Current connection state
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Is the handshake complete?
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// Subprotocol the client announces
    pub fn client_subprotocol(&self) -> &str {
        &self.client_subprotocol
    }

    /// Subprotocol the server announced during the last handshake
    pub fn server_subprotocol(&self) -> Option<&str> {
        self.server_subprotocol.as_deref()
    }

    /// Link counters
    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Client `added` already handed to the link
    pub fn client_watermark(&self) -> u64 {
        self.client_watermark
    }

    /// Server `added` already handed to the link
    pub fn server_watermark(&self) -> u64 {
        self.server_watermark
    }

    /// Disconnected -> Connecting
    pub fn begin_connect(&mut self) -> TandemResult<()> {
        if self.state != LinkState::Disconnected {
            return Err(TandemError::AlreadyConnected(self.client.clone()));
        }
        self.state = LinkState::Connecting;
        Ok(())
    }

    /// Connecting -> Connected, recording the server side of the handshake
    /// Subprotocol mismatch is recorded, never rejected
    pub fn complete_connect(&mut self, server_subprotocol: impl Into<String>) -> TandemResult<()> {
        if self.state != LinkState::Connecting {
            return Err(TandemError::NotConnected(self.client.clone()));
        }
        self.server_subprotocol = Some(server_subprotocol.into());
        self.state = LinkState::Connected;
        self.stats.connects += 1;
        Ok(())
    }

    /// Drop to Disconnected, discarding everything in flight
    ///
    /// Watermarks rewind to just below the oldest discarded entry, so those
    /// entries are offered again after the next connect. Returns the number
    /// of discarded envelopes.
    pub fn disconnect(&mut self) -> usize {
        self.state = LinkState::Disconnected;

        if let Some(min) = self.to_server.values().map(Envelope::source_added).min() {
            self.client_watermark = self.client_watermark.min(min.saturating_sub(1));
        }
        if let Some(min) = self.to_client.values().map(Envelope::source_added).min() {
            self.server_watermark = self.server_watermark.min(min.saturating_sub(1));
        }

        let discarded = self.to_server.len() + self.to_client.len();
        self.to_server.clear();
        self.to_client.clear();
        self.stats.discarded += discarded as u64;
        discarded
    }

    /// Freeze overlay
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Release the freeze overlay
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Is delivery held by a freeze?
    #[inline]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Queue an envelope; returns false if the link is not connected
    pub fn send(&mut self, direction: Direction, envelope: Envelope) -> bool {
        if !self.is_connected() {
            return false;
        }
        let added = envelope.source_added();
        match direction {
            Direction::ToServer => {
                self.client_watermark = self.client_watermark.max(added);
                self.stats.sent_to_server += 1;
                self.to_server.insert(envelope.id().clone(), envelope);
            }
            Direction::ToClient => {
                self.server_watermark = self.server_watermark.max(added);
                self.stats.sent_to_client += 1;
                self.to_client.insert(envelope.id().clone(), envelope);
            }
        }
        true
    }

    /// Mark source entries as offered without queueing them
    /// (entries the filter rejected still count as handled)
    pub fn advance_watermark(&mut self, direction: Direction, added: u64) {
        match direction {
            Direction::ToServer => self.client_watermark = self.client_watermark.max(added),
            Direction::ToClient => self.server_watermark = self.server_watermark.max(added),
        }
    }

    /// Oldest deliverable envelope, if the link is live and not paused
    pub fn peek(&self) -> Option<(Direction, &ActionId)> {
        if !self.is_connected() || self.paused {
            return None;
        }
        let up = self.to_server.keys().next().map(|id| (Direction::ToServer, id));
        let down = self.to_client.keys().next().map(|id| (Direction::ToClient, id));
        match (up, down) {
            (Some(u), Some(d)) => Some(if d.1 < u.1 { d } else { u }),
            (u, d) => u.or(d),
        }
    }

    /// Take the oldest envelope in one direction
    pub fn pop(&mut self, direction: Direction) -> Option<Envelope> {
        if !self.is_connected() || self.paused {
            return None;
        }
        let queue = match direction {
            Direction::ToServer => &mut self.to_server,
            Direction::ToClient => &mut self.to_client,
        };
        let envelope = queue.pop_first().map(|(_, envelope)| envelope);
        if envelope.is_some() {
            self.stats.delivered += 1;
        }
        envelope
    }

    /// Envelopes queued in both directions
    pub fn pending(&self) -> usize {
        self.to_server.len() + self.to_client.len()
    }
}
