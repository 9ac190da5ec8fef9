//! Precondition / claim / postcondition tables.

use std::fmt;

use crate::actuation::Action;
use crate::state::Scope;

/// A named state paired with a value, either awaited or written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    /// Owner of the state
    pub scope: Scope,
    /// State name within the scope
    pub key: &'static str,
    /// Value awaited or written
    pub value: bool,
}

impl Condition {
    /// `scope.key = value`
    pub fn new(scope: Scope, key: &'static str, value: bool) -> Self {
        Self { scope, key, value }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}={}", self.scope, self.key, self.value)
    }
}

/// What one command does to the shared state around a single actuation.
///
/// Precondition groups resolve strictly in order; conditions inside a group are
/// awaited concurrently. Claims are written once every group holds and before
/// the action starts. Effects are written only after the action succeeds.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    /// Groups awaited in order
    pub preconditions: Vec<Vec<Condition>>,
    /// Written right before the action
    pub claims: Vec<Condition>,
    /// The single actuation
    pub action: Action,
    /// Written after the action succeeds
    pub effects: Vec<Condition>,
}

impl Plan {
    /// A plan that only performs `action`.
    pub fn new(action: Action) -> Self {
        Self {
            preconditions: Vec::new(),
            claims: Vec::new(),
            action,
            effects: Vec::new(),
        }
    }

    /// Append a precondition group that starts after the previous ones hold.
    pub fn then(mut self, group: impl IntoIterator<Item = Condition>) -> Self {
        let group: Vec<Condition> = group.into_iter().collect();
        if !group.is_empty() {
            self.preconditions.push(group);
        }
        self
    }

    /// Add writes made before the action starts.
    pub fn claim(mut self, writes: impl IntoIterator<Item = Condition>) -> Self {
        self.claims.extend(writes);
        self
    }

    /// Add writes made once the action succeeds.
    pub fn effect(mut self, writes: impl IntoIterator<Item = Condition>) -> Self {
        self.effects.extend(writes);
        self
    }
}
