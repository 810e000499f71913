//! Identity types for the tandem harness
//!
//! Node ids are hierarchical strings (`label:connection:salt`) and action ids
//! combine logical time, the authoring node and a disambiguating sequence.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::{TandemError, TandemResult};

/// Node identity - `label:connection:salt`
///
/// Ordering is lexicographic over the rendered string, which is what the
/// action id tie-break relies on.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Build a node id from its three parts
    pub fn new(label: &str, connection: u64, salt: u64) -> Self {
        NodeId(format!("{label}:{connection}:{salt}"))
    }

    /// Client discriminator (everything before the connection number)
    pub fn label(&self) -> &str {
        self.parts().0
    }

    /// Connection sequence number
    pub fn connection(&self) -> u64 {
        self.parts().1
    }

    /// Per-process salt
    pub fn salt(&self) -> u64 {
        self.parts().2
    }

    /// Rendered `label:connection:salt` form
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn parts(&self) -> (&str, u64, u64) {
        // Validated on construction, so the fallbacks never trigger.
        let mut it = self.0.rsplitn(3, ':');
        let salt = it.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let connection = it.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let label = it.next().unwrap_or("");
        (label, connection, salt)
    }
}

impl FromStr for NodeId {
    type Err = TandemError;

    fn from_str(s: &str) -> TandemResult<Self> {
        let mut it = s.rsplitn(3, ':');
        let salt = it.next().map(str::parse::<u64>);
        let connection = it.next().map(str::parse::<u64>);
        let label = it.next();

        match (label, connection, salt) {
            (Some(label), Some(Ok(_)), Some(Ok(_)))
                if !label.is_empty() && !label.contains(char::is_whitespace) =>
            {
                Ok(NodeId(s.to_string()))
            }
            _ => Err(TandemError::InvalidId(s.to_string())),
        }
    }
}

impl TryFrom<String> for NodeId {
    type Error = TandemError;

    fn try_from(value: String) -> TandemResult<Self> {
        value.parse()
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hands out node ids that are unique within one harness
///
/// Every call consumes one slot of a shared counter, so the server created
/// first gets `server:1:1` and the next client labelled `10` gets `10:2:2`.
#[derive(Debug, Default)]
pub struct NodeIdentity {
    last: AtomicU64,
}

impl NodeIdentity {
    /// Create an allocator with no ids issued
    pub fn new() -> Self {
        NodeIdentity::default()
    }

    /// Allocate an id for a new node
    pub fn create(&self, label: &str) -> NodeId {
        let n = self.last.fetch_add(1, Ordering::SeqCst) + 1;
        let label: String = label
            .chars()
            .map(|c| if c.is_whitespace() { '_' } else { c })
            .collect();
        NodeId::new(&label, n, n)
    }

    /// Number of ids handed out so far
    pub fn issued(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }
}

/// Action identity - total order over every action in a harness
///
/// Ordered by time, then node id, then sequence (derive order matters).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActionId {
    pub time: u64,
    pub node: NodeId,
    pub seq: u32,
}

impl ActionId {
    /// Create an id from its parts
    #[inline]
    pub fn new(time: u64, node: NodeId, seq: u32) -> Self {
        ActionId { time, node, seq }
    }

    /// Is this action authored by `node`?
    #[inline]
    pub fn is_from(&self, node: &NodeId) -> bool {
        &self.node == node
    }
}

impl FromStr for ActionId {
    type Err = TandemError;

    fn from_str(s: &str) -> TandemResult<Self> {
        let invalid = || TandemError::InvalidId(s.to_string());
        let mut it = s.split(' ');
        let time = it.next().and_then(|t| t.parse().ok()).ok_or_else(invalid)?;
        let node = it.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())?;
        let seq = it.next().and_then(|q| q.parse().ok()).ok_or_else(invalid)?;
        if it.next().is_some() {
            return Err(invalid());
        }
        Ok(ActionId { time, node, seq })
    }
}

impl TryFrom<String> for ActionId {
    type Error = TandemError;

    fn try_from(value: String) -> TandemResult<Self> {
        value.parse()
    }
}

impl From<ActionId> for String {
    fn from(id: ActionId) -> Self {
        id.to_string()
    }
}

impl fmt::Debug for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Action({self})")
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.time, self.node, self.seq)
    }
}
