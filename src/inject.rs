//! Programmatic injections.
//!
//! Hosts (extensions, scripts, UI panels) register content under stable
//! ids between builds; the pipeline turns the registered set into blocks
//! and optionally feeds it to the lore scan. Registering an id twice
//! replaces the previous injection; registering empty content removes it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::{GenerationType, Role};

/// Where an injection lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectPosition {
    /// Start of the prompt, before the main region.
    Before,
    /// End of the main region, before chat history.
    After,
    /// Interleaved into chat at `(depth, role)`.
    Chat,
    /// No block; only meaningful together with `scan`.
    None,
}

/// Predicate deciding whether an injection participates in a build.
/// Suppression covers both placement and scan participation.
pub type InjectionFilter = Arc<dyn Fn(&FilterInput<'_>) -> bool + Send + Sync>;

/// The slice of build state a filter may inspect.
pub struct FilterInput<'a> {
    pub generation_type: GenerationType,
    pub chat_length: usize,
    pub character_name: &'a str,
    pub user_name: &'a str,
}

/// One registered injection.
#[derive(Clone)]
pub struct Injection {
    pub content: String,
    pub position: InjectPosition,
    pub depth: u32,
    pub role: Role,
    /// Content joins the lore scan buffer.
    pub scan: bool,
    pub filter: Option<InjectionFilter>,
    /// Removed from the registry after one build.
    pub ephemeral: bool,
}

impl std::fmt::Debug for Injection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Injection")
            .field("content", &self.content)
            .field("position", &self.position)
            .field("depth", &self.depth)
            .field("role", &self.role)
            .field("scan", &self.scan)
            .field("filter", &self.filter.as_ref().map(|_| "<fn>"))
            .field("ephemeral", &self.ephemeral)
            .finish()
    }
}

impl Injection {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            position: InjectPosition::After,
            depth: 0,
            role: Role::System,
            scan: false,
            filter: None,
            ephemeral: false,
        }
    }

    pub fn at(mut self, position: InjectPosition) -> Self {
        self.position = position;
        self
    }

    pub fn in_chat(mut self, depth: u32, role: Role) -> Self {
        self.position = InjectPosition::Chat;
        self.depth = depth;
        self.role = role;
        self
    }

    pub fn scanned(mut self) -> Self {
        self.scan = true;
        self
    }

    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    pub fn filtered(mut self, filter: InjectionFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Ordered id → injection map. Insertion order is the emission order for
/// injections sharing a position.
#[derive(Debug, Clone, Default)]
pub struct InjectionRegistry {
    entries: Vec<(String, Injection)>,
}

impl InjectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace. Empty content removes the id.
    pub fn register(&mut self, id: impl Into<String>, injection: Injection) {
        let id = id.into();
        if injection.content.is_empty() {
            self.remove(&id);
            return;
        }
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == id) {
            slot.1 = injection;
        } else {
            self.entries.push((id, injection));
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| k != id);
        self.entries.len() != before
    }

    pub fn get(&self, id: &str) -> Option<&Injection> {
        self.entries.iter().find(|(k, _)| k == id).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Injection)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop ephemeral injections. Called by the builder once a build
    /// finishes, error or not.
    pub fn prune_ephemeral(&mut self) {
        self.entries.retain(|(_, inj)| !inj.ephemeral);
    }
}
