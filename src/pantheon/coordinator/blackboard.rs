//! Task-scoped shared key/value store.

use std::collections::HashMap;

use crate::pantheon::error::PantheonError;

/// A blackboard enforces that every key carries a `task:{id}:` or `agent:{name}:` prefix; any
/// other prefix is rejected with [`PantheonError::ForbiddenKey`].
pub struct Blackboard {
    values: HashMap<String, String>,
    frozen: bool,
}

fn has_allowed_prefix(key: &str) -> bool {
    key.starts_with("task:") || key.starts_with("agent:")
}

impl Blackboard {
    pub fn new() -> Self {
        Blackboard { values: HashMap::new(), frozen: false }
    }

    /// Write `value` under `key`. Fails with `ForbiddenKey` if the prefix is not allowed, or if
    /// the blackboard has been frozen by task termination.
    pub fn write(&mut self, key: &str, value: &str) -> Result<(), PantheonError> {
        if !has_allowed_prefix(key) {
            return Err(PantheonError::ForbiddenKey(key.to_string()));
        }
        if self.frozen {
            return Err(PantheonError::ForbiddenKey(format!("{key} (blackboard frozen)")));
        }
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Read the last committed value for `key`, or `None` if never written.
    pub fn read(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    /// Number of keys currently stored, for the task-close summary.
    pub fn key_count(&self) -> usize {
        self.values.len()
    }

    /// Freeze the blackboard; every further `write` fails. Termination is irreversible.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }
}

impl Default for Blackboard {
    fn default() -> Self {
        Self::new()
    }
}
