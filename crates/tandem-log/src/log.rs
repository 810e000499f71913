//! Action log - one node's ordered action history

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use tandem_core::{Action, ActionId, AddOptions, Meta, NodeId, TestTime};

/// Read-only notification hook, called after every accepted entry
pub type Listener = Box<dyn Fn(&Action, &Meta) + Send>;

/// What a log stores once an entry no longer needs to be held
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Retention {
    /// Thin client: entries are dropped as soon as nothing holds them
    #[default]
    KeepNone,
    /// Keep every entry
    KeepAll,
}

#[derive(Debug)]
struct LogEntry {
    action: Action,
    meta: Meta,
    /// Sync entry still waiting for `processed`/`undo`
    held: bool,
}

/// Action log - append-only, ordered by action id
///
/// Every id the log ever accepted is remembered, even when the entry itself
/// was not retained, so replays are always no-ops.
pub struct ActionLog {
    node_id: NodeId,
    time: TestTime,
    /// Retained entries, in id order
    entries: BTreeMap<ActionId, LogEntry>,
    /// Every id accepted so far
    seen: HashSet<ActionId>,
    last_added: u64,
    retention: Retention,
    listeners: Vec<Listener>,
}

impl ActionLog {
    /// Create an empty log owned by `node_id`
    pub fn new(node_id: NodeId, time: TestTime) -> Self {
        ActionLog {
            node_id,
            time,
            entries: BTreeMap::new(),
            seen: HashSet::new(),
            last_added: 0,
            retention: Retention::default(),
            listeners: Vec::new(),
        }
    }

    /// Node that owns this log
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Time source shared with the rest of the harness
    pub fn time(&self) -> &TestTime {
        &self.time
    }

    /// Current retention mode
    pub fn retention(&self) -> Retention {
        self.retention
    }

    /// Keep every entry from now on
    pub fn keep_actions(&mut self) {
        self.retention = Retention::KeepAll;
    }

    /// Register a listener for accepted entries
    pub fn on_add(&mut self, listener: Listener) {
        self.listeners.push(listener);
    }

    /// Author a new action on this node
    ///
    /// Sync entries are held until [`ActionLog::release`] regardless of
    /// retention, so an offline client never loses them.
    pub fn add(&mut self, action: Action, options: AddOptions) -> Meta {
        let time = match options.time {
            Some(time) => {
                self.time.observe(time);
                time
            }
            None => self.time.tick(),
        };

        let mut meta = Meta::new(self.next_id(time));
        meta.sync = options.sync;
        meta.nodes = options.nodes;
        meta.channels = options.channels;

        let held = meta.sync;
        self.insert(action, meta, held)
    }

    /// Accept an entry delivered from another log
    ///
    /// Keeps the sender's id and time, assigns a local `added`, and strips the
    /// routing scope. Returns `None` when the id was already seen.
    pub fn apply(&mut self, action: Action, mut meta: Meta) -> Option<Meta> {
        if self.seen.contains(&meta.id) {
            tracing::trace!(node = %self.node_id, id = %meta.id, "duplicate entry ignored");
            return None;
        }
        meta.take_routing();
        meta.time = meta.id.time;
        self.time.observe(meta.time);
        Some(self.insert(action, meta, false))
    }

    fn insert(&mut self, action: Action, mut meta: Meta, held: bool) -> Meta {
        self.last_added += 1;
        meta.added = self.last_added;
        self.seen.insert(meta.id.clone());

        for listener in &self.listeners {
            listener(&action, &meta);
        }

        if held || self.retention == Retention::KeepAll {
            self.entries.insert(
                meta.id.clone(),
                LogEntry {
                    action,
                    meta: meta.clone(),
                    held,
                },
            );
        }

        tracing::trace!(node = %self.node_id, id = %meta.id, added = meta.added, "entry added");
        meta
    }

    /// Smallest free sequence for `(time, node)`
    fn next_id(&self, time: u64) -> ActionId {
        let mut id = ActionId::new(time, self.node_id.clone(), 0);
        while self.seen.contains(&id) {
            id.seq += 1;
        }
        id
    }

    /// Drop the hold on a sync entry once it was acknowledged or undone
    /// Returns true if an entry was held
    pub fn release(&mut self, id: &ActionId) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        let was_held = entry.held;
        entry.held = false;
        if self.retention == Retention::KeepNone {
            self.entries.remove(id);
        }
        was_held
    }

    /// Has this log ever accepted `id`?
    #[inline]
    pub fn has(&self, id: &ActionId) -> bool {
        self.seen.contains(id)
    }

    /// Is `id` currently stored?
    #[inline]
    pub fn contains(&self, id: &ActionId) -> bool {
        self.entries.contains_key(id)
    }

    /// Stored entry by id
    pub fn get(&self, id: &ActionId) -> Option<(&Action, &Meta)> {
        self.entries.get(id).map(|e| (&e.action, &e.meta))
    }

    /// Stored actions in log order
    pub fn actions(&self) -> impl Iterator<Item = &Action> + '_ {
        self.entries.values().map(|e| &e.action)
    }

    /// Stored entries with meta in log order
    pub fn entries(&self) -> impl Iterator<Item = (&Action, &Meta)> + '_ {
        self.entries.values().map(|e| (&e.action, &e.meta))
    }

    /// Stored entries in insertion order
    pub fn entries_by_added(&self) -> Vec<(&Action, &Meta)> {
        let mut entries: Vec<_> = self.entries().collect();
        entries.sort_by_key(|(_, meta)| meta.added);
        entries
    }

    /// Stored entries added after `added`, in id order
    pub fn entries_since(&self, added: u64) -> impl Iterator<Item = (&Action, &Meta)> + '_ {
        self.entries().filter(move |(_, meta)| meta.added > added)
    }

    /// Held sync entries added after `added`, in id order
    pub fn held_since(&self, added: u64) -> impl Iterator<Item = (&Action, &Meta)> + '_ {
        self.entries
            .values()
            .filter(move |e| e.held && e.meta.added > added)
            .map(|e| (&e.action, &e.meta))
    }

    /// Sync entries still waiting for an answer
    pub fn held_count(&self) -> usize {
        self.entries.values().filter(|e| e.held).count()
    }

    /// Last `added` value assigned
    pub fn last_added(&self) -> u64 {
        self.last_added
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No stored entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ActionLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionLog")
            .field("node_id", &self.node_id)
            .field("entries", &self.entries.len())
            .field("seen", &self.seen.len())
            .field("last_added", &self.last_added)
            .field("retention", &self.retention)
            .finish()
    }
}
