//! Control plane - scripted failure injection
//!
//! Undo rules decline actions on the server before they take effect.
//! One-shot rules are consumed in FIFO order; persistent patterns are
//! checked after them. The freeze counter backs `freeze_processing`.

use std::collections::VecDeque;
use std::fmt;

use serde_json::{Map, Value};
use tandem_core::Action;

type UndoPredicate = Box<dyn Fn(&Action) -> bool + Send>;

/// Default undo reason
pub const DEFAULT_REASON: &str = "error";

/// One-shot undo rule
#[derive(Default)]
pub struct UndoRule {
    action_type: Option<String>,
    predicate: Option<UndoPredicate>,
    extra: Map<String, Value>,
}

impl UndoRule {
    /// Match the next action of any type
    pub fn any() -> Self {
        Self::default()
    }

    /// Match the next action of `action_type`; the type becomes the reason
    pub fn of_type(action_type: impl Into<String>) -> Self {
        Self {
            action_type: Some(action_type.into()),
            ..Self::default()
        }
    }

    /// Additionally require a payload predicate
    pub fn when<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&Action) -> bool + Send + 'static,
    {
        self.predicate = Some(Box::new(predicate));
        self
    }

    /// Payload merged into the emitted `undo` action
    pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        self.extra = extra;
        self
    }

    /// Single extra payload field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Does this rule decline `action`?
    pub fn matches(&self, action: &Action) -> bool {
        let type_ok = self
            .action_type
            .as_deref()
            .map_or(true, |t| action.is_type(t));
        type_ok && self.predicate.as_ref().map_or(true, |p| p(action))
    }

    /// Reason carried by the `undo`: the type filter, or "error"
    pub fn reason(&self) -> &str {
        self.action_type.as_deref().unwrap_or(DEFAULT_REASON)
    }
}

impl From<&str> for UndoRule {
    fn from(action_type: &str) -> Self {
        UndoRule::of_type(action_type)
    }
}

impl From<String> for UndoRule {
    fn from(action_type: String) -> Self {
        UndoRule::of_type(action_type)
    }
}

impl fmt::Debug for UndoRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UndoRule")
            .field("action_type", &self.action_type)
            .field("predicate", &self.predicate.is_some())
            .field("extra", &self.extra)
            .finish()
    }
}

/// Decision to decline an action
#[derive(Debug, Clone, PartialEq)]
pub struct UndoVerdict {
    pub reason: String,
    pub extra: Map<String, Value>,
}

/// Control plane state owned by the server
#[derive(Debug, Default)]
pub struct ControlPlane {
    one_shot: VecDeque<UndoRule>,
    persistent: Vec<Action>,
    freeze_depth: usize,
}

impl ControlPlane {
    /// Control plane with no rules and no freeze
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a one-shot rule
    pub fn undo_next(&mut self, rule: UndoRule) {
        self.one_shot.push_back(rule);
    }

    /// Undo every future action structurally equal to `pattern`
    pub fn undo_action(&mut self, pattern: Action) {
        self.persistent.push(pattern);
    }

    /// Check an incoming action, consuming the first matching one-shot rule
    pub fn check(&mut self, action: &Action) -> Option<UndoVerdict> {
        if let Some(pos) = self.one_shot.iter().position(|rule| rule.matches(action)) {
            let rule = self.one_shot.remove(pos)?;
            return Some(UndoVerdict {
                reason: rule.reason().to_string(),
                extra: rule.extra,
            });
        }

        self.persistent
            .iter()
            .any(|pattern| pattern == action)
            .then(|| UndoVerdict {
                reason: DEFAULT_REASON.to_string(),
                extra: Map::new(),
            })
    }

    /// One-shot rules not consumed yet
    pub fn pending_rules(&self) -> usize {
        self.one_shot.len()
    }

    /// Enter a freeze scope; true when this is the outermost one
    pub fn freeze(&mut self) -> bool {
        self.freeze_depth += 1;
        self.freeze_depth == 1
    }

    /// Leave a freeze scope; true when the last one was released
    pub fn thaw(&mut self) -> bool {
        if self.freeze_depth == 0 {
            return false;
        }
        self.freeze_depth -= 1;
        self.freeze_depth == 0
    }

    /// Is any freeze scope open?
    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.freeze_depth > 0
    }
}
