//! Error types for the tandem harness

use thiserror::Error;

use crate::{Action, ActionId, NodeId};

/// Server-declined action, surfaced to the caller of a sync
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Server undid action because of {reason}")]
pub struct UndoError {
    pub reason: String,
    /// The `undo` action itself (original under `action`, plus any extra payload)
    pub action: Action,
}

impl UndoError {
    /// Build from a received `undo` action
    pub fn from_undo(undo: Action) -> Self {
        let reason = undo.get_str("reason").unwrap_or("error").to_string();
        UndoError {
            reason,
            action: undo,
        }
    }

    /// The action the server declined
    pub fn original(&self) -> Option<Action> {
        self.action
            .get("action")
            .cloned()
            .and_then(|value| Action::from_value(value).ok())
    }
}

/// Core tandem errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TandemError {
    // Protocol errors
    #[error(transparent)]
    Undone(#[from] UndoError),

    // State errors
    #[error("Node {0} is not connected")]
    NotConnected(NodeId),

    #[error("Node {0} is already connected")]
    AlreadyConnected(NodeId),

    #[error("Processing is frozen: sync cannot be acknowledged")]
    Frozen,

    #[error("No acknowledgement received for {0}")]
    Unacknowledged(ActionId),

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    // Format errors
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Invalid id: {0}")]
    InvalidId(String),
}

impl TandemError {
    /// Is this a server-side undo rather than a local state error?
    pub fn is_undo(&self) -> bool {
        matches!(self, TandemError::Undone(_))
    }

    /// Undo details, if the server declined the action
    pub fn as_undo(&self) -> Option<&UndoError> {
        match self {
            TandemError::Undone(undo) => Some(undo),
            _ => None,
        }
    }
}

/// Result type for tandem operations
pub type TandemResult<T> = Result<T, TandemError>;
