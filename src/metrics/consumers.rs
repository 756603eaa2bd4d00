//! Consumer identity registry.
//!
//! Tracks named/grouped API callers and remembers which identifiers changed
//! since the last drain; only those "dirty" records are shipped to the hub.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde::Serialize;

const MAX_IDENTIFIER_LENGTH: usize = 128;
const MAX_NAME_LENGTH: usize = 64;
const MAX_GROUP_LENGTH: usize = 64;

/// A named/grouped API caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Consumer {
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl Consumer {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            name: None,
            group: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

/// Consumer argument accepted at the adapter boundary: either a bare
/// identifier or a structured record. Resolved once into a canonical
/// [`Consumer`] before anything else sees it.
#[derive(Debug, Clone)]
pub enum ConsumerSource {
    Identifier(String),
    Record(Consumer),
}

impl From<&str> for ConsumerSource {
    fn from(identifier: &str) -> Self {
        Self::Identifier(identifier.to_string())
    }
}

impl From<String> for ConsumerSource {
    fn from(identifier: String) -> Self {
        Self::Identifier(identifier)
    }
}

impl From<Consumer> for ConsumerSource {
    fn from(consumer: Consumer) -> Self {
        Self::Record(consumer)
    }
}

impl ConsumerSource {
    /// Trim and truncate fields into the canonical record shape. Returns
    /// `None` for an empty identifier, which callers treat as anonymous.
    pub fn canonicalize(self) -> Option<Consumer> {
        let consumer = match self {
            Self::Identifier(identifier) => Consumer::new(identifier),
            Self::Record(consumer) => consumer,
        };

        let identifier = clip(&consumer.identifier, MAX_IDENTIFIER_LENGTH);
        if identifier.is_empty() {
            return None;
        }

        Some(Consumer {
            identifier,
            name: consumer
                .name
                .map(|name| clip(&name, MAX_NAME_LENGTH))
                .filter(|name| !name.is_empty()),
            group: consumer
                .group
                .map(|group| clip(&group, MAX_GROUP_LENGTH))
                .filter(|group| !group.is_empty()),
        })
    }
}

fn clip(value: &str, max_len: usize) -> String {
    let trimmed = value.trim();
    if trimmed.len() <= max_len {
        return trimmed.to_string();
    }
    let mut end = max_len;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}

#[derive(Default)]
struct RegistryState {
    consumers: HashMap<String, Consumer>,
    dirty: HashSet<String>,
}

/// Registry of consumers seen since startup.
///
/// Stored records persist across drains; only the dirty set resets.
#[derive(Default)]
pub struct ConsumerRegistry {
    state: Mutex<RegistryState>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// No-op when both name and group are unset, so placeholder consumers
    /// never register. Field-level changes mark the identifier dirty.
    pub fn add_or_update(&self, consumer: Consumer) {
        if consumer.name.is_none() && consumer.group.is_none() {
            return;
        }

        let mut state = self.state.lock().expect("consumer registry mutex poisoned");
        let RegistryState { consumers, dirty } = &mut *state;
        match consumers.entry(consumer.identifier.clone()) {
            Entry::Vacant(slot) => {
                dirty.insert(consumer.identifier.clone());
                slot.insert(consumer);
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                let mut changed = false;
                if consumer.name.is_some() && consumer.name != existing.name {
                    existing.name = consumer.name;
                    changed = true;
                }
                if consumer.group.is_some() && consumer.group != existing.group {
                    existing.group = consumer.group;
                    changed = true;
                }
                if changed {
                    dirty.insert(consumer.identifier);
                }
            }
        }
    }

    /// Return the full records of dirty identifiers and clear the dirty set.
    pub fn drain_and_reset(&self) -> Vec<Consumer> {
        let mut state = self.state.lock().expect("consumer registry mutex poisoned");
        let dirty = std::mem::take(&mut state.dirty);
        dirty
            .into_iter()
            .filter_map(|identifier| state.consumers.get(&identifier).cloned())
            .collect()
    }
}
