//! Startup-time mapping from workflow type name to handler.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;

use temporal_sdk::WorkflowFunction;
use thiserror::Error;

/// Registry of the workflow functions a worker serves.
pub type WorkflowRegistry = HandlerRegistry<WorkflowFunction>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("a handler for type {0:?} is already registered")]
    Duplicate(String),

    #[error("handler type name must not be empty")]
    EmptyName,
}

/// Handlers keyed by type name. Each name can be registered once; the first
/// registration wins and later attempts are rejected.
pub struct HandlerRegistry<H> {
    handlers: HashMap<String, H>,
}

impl<H> HandlerRegistry<H> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        type_name: impl Into<String>,
        handler: impl Into<H>,
    ) -> Result<(), RegistrationError> {
        let type_name = type_name.into();
        if type_name.trim().is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        match self.handlers.entry(type_name) {
            Entry::Occupied(existing) => Err(RegistrationError::Duplicate(existing.key().clone())),
            Entry::Vacant(slot) => {
                slot.insert(handler.into());
                Ok(())
            }
        }
    }

    pub fn get(&self, type_name: &str) -> Option<&H> {
        self.handlers.get(type_name)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.handlers.contains_key(type_name)
    }

    /// Registered type names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Hand every entry over, e.g. to a worker's own registration API.
    pub fn into_entries(self) -> impl Iterator<Item = (String, H)> {
        self.handlers.into_iter()
    }
}

impl<H> Default for HandlerRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> fmt::Debug for HandlerRegistry<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("types", &self.names())
            .finish()
    }
}
