//! Action definitions
//!
//! An action is an open record with a required string `type`. Everything
//! else is arbitrary JSON payload that only the application interprets.
//! The protocol itself authors four kinds: `processed`, `undo`, `subscribe`
//! and `unsubscribe`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ActionId, TandemError, TandemResult};

/// Protocol action types
pub mod types {
    pub const PROCESSED: &str = "processed";
    pub const UNDO: &str = "undo";
    pub const SUBSCRIBE: &str = "subscribe";
    pub const UNSUBSCRIBE: &str = "unsubscribe";
}

/// Keys an undo payload can never override
const UNDO_RESERVED: [&str; 4] = ["type", "id", "reason", "action"];

/// Action - one application intent or event
/// INVARIANT: `fields["type"]` is always a string
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Action {
    fields: Map<String, Value>,
}

impl Action {
    /// Create an action with only a type
    pub fn new(action_type: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("type".to_string(), Value::String(action_type.into()));
        Action { fields }
    }

    /// Add or replace a payload field (`type` is left untouched)
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Set a payload field in place (`type` is left untouched)
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if key != "type" {
            self.fields.insert(key, value.into());
        }
    }

    /// Parse an action from a JSON value
    pub fn from_value(value: Value) -> TandemResult<Self> {
        match value {
            Value::Object(fields) => Self::try_from(fields),
            other => Err(TandemError::InvalidAction(format!(
                "expected an object, got {other}"
            ))),
        }
    }

    /// JSON form of the action
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    /// The `type` discriminant
    #[inline]
    pub fn action_type(&self) -> &str {
        self.fields
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Check the `type` discriminant
    #[inline]
    pub fn is_type(&self, action_type: &str) -> bool {
        self.action_type() == action_type
    }

    /// Payload field by key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Payload field by key, if it is a string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Is this one of the protocol's own actions?
    pub fn is_control(&self) -> bool {
        matches!(
            self.action_type(),
            types::PROCESSED | types::UNDO | types::SUBSCRIBE | types::UNSUBSCRIBE
        )
    }

    /// Channel named by a `subscribe`/`unsubscribe` action
    pub fn channel(&self) -> Option<&str> {
        self.get_str("channel")
    }

    /// Target id of a `processed`/`undo` action
    pub fn target_id(&self) -> Option<ActionId> {
        self.get_str("id").and_then(|id| id.parse().ok())
    }

    // ------------------------------------------------------------------
    // Protocol actions
    // ------------------------------------------------------------------

    /// `{ type: "processed", id }`
    pub fn processed(id: &ActionId) -> Self {
        Action::new(types::PROCESSED).with("id", id.to_string())
    }

    /// `{ type: "undo", id, reason, action, ...extra }`
    pub fn undo(id: &ActionId, reason: &str, original: &Action, extra: &Map<String, Value>) -> Self {
        let mut undo = Action::new(types::UNDO)
            .with("id", id.to_string())
            .with("reason", reason)
            .with("action", original.to_value());
        for (key, value) in extra {
            if !UNDO_RESERVED.contains(&key.as_str()) {
                undo.fields.insert(key.clone(), value.clone());
            }
        }
        undo
    }

    /// `{ type: "subscribe", channel }`
    pub fn subscribe(channel: impl Into<String>) -> Self {
        Action::new(types::SUBSCRIBE).with("channel", channel.into())
    }

    /// `{ type: "unsubscribe", channel }`
    pub fn unsubscribe(channel: impl Into<String>) -> Self {
        Action::new(types::UNSUBSCRIBE).with("channel", channel.into())
    }
}

impl TryFrom<Map<String, Value>> for Action {
    type Error = TandemError;

    fn try_from(fields: Map<String, Value>) -> TandemResult<Self> {
        match fields.get("type") {
            Some(Value::String(_)) => Ok(Action { fields }),
            Some(other) => Err(TandemError::InvalidAction(format!(
                "`type` must be a string, got {other}"
            ))),
            None => Err(TandemError::InvalidAction("missing `type`".to_string())),
        }
    }
}

impl TryFrom<Value> for Action {
    type Error = TandemError;

    fn try_from(value: Value) -> TandemResult<Self> {
        Action::from_value(value)
    }
}

impl From<Action> for Map<String, Value> {
    fn from(action: Action) -> Self {
        action.fields
    }
}

impl From<Action> for Value {
    fn from(action: Action) -> Self {
        Value::Object(action.fields)
    }
}
