//! Sticky / cooldown / delay persistence.
//!
//! Timed effects outlive a build, so they live in the chat-local variable
//! store as JSON under a reserved key. Keys are the stable entry identity
//! `"{source}:{book}.{uid}"`; message counts are absolute chat lengths.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::EntryKey;
use crate::vars::VariableStore;

pub const TIMED_EFFECTS_KEY: &str = "__tavernkit_timed_effects";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedEffect {
    pub start: u32,
    pub end: u32,
    #[serde(default)]
    pub protected: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimedEffects {
    #[serde(default)]
    pub sticky: BTreeMap<String, TimedEffect>,
    #[serde(default)]
    pub cooldown: BTreeMap<String, TimedEffect>,
}

impl TimedEffects {
    /// Load from the store. Invalid structure resets cleanly.
    pub fn load(store: &dyn VariableStore) -> Self {
        match store.get(TIMED_EFFECTS_KEY) {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                tracing::warn!("timed-effect state is invalid, resetting: {err}");
                Self::default()
            }),
            None => Self::default(),
        }
    }

    pub fn save(&self, store: &mut dyn VariableStore) {
        if self.sticky.is_empty() && self.cooldown.is_empty() {
            store.delete(TIMED_EFFECTS_KEY);
            return;
        }
        match serde_json::to_string(self) {
            Ok(json) => store.set(TIMED_EFFECTS_KEY, json),
            Err(err) => tracing::warn!("failed to serialize timed-effect state: {err}"),
        }
    }

    /// Drop effects whose window has closed. Returns the keys of sticky
    /// effects that just expired, so the engine can chain cooldowns.
    pub fn expire(&mut self, message_count: u32) -> Vec<String> {
        let mut ended_sticky = Vec::new();
        self.sticky.retain(|key, effect| {
            let keep = effect.end > message_count;
            if !keep {
                ended_sticky.push(key.clone());
            }
            keep
        });
        self.cooldown.retain(|_, effect| effect.end > message_count);
        ended_sticky
    }

    pub fn is_sticky(&self, key: &EntryKey) -> bool {
        self.sticky.contains_key(&key.to_string())
    }

    pub fn in_cooldown(&self, key: &EntryKey) -> bool {
        self.cooldown.contains_key(&key.to_string())
    }

    /// Record effects for a fresh activation.
    pub fn on_activated(&mut self, key: &EntryKey, sticky: u32, cooldown: u32, message_count: u32) {
        let id = key.to_string();
        if sticky > 0 {
            self.sticky.entry(id).or_insert(TimedEffect {
                start: message_count,
                end: message_count + sticky,
                protected: false,
            });
        } else if cooldown > 0 {
            self.cooldown.insert(
                id,
                TimedEffect {
                    start: message_count,
                    end: message_count + cooldown,
                    protected: false,
                },
            );
        }
    }

    /// A sticky window just closed; start the cooldown window, replacing
    /// any prior one.
    pub fn chain_cooldown(&mut self, key: &str, cooldown: u32, message_count: u32) {
        if cooldown == 0 {
            return;
        }
        self.cooldown.insert(
            key.to_string(),
            TimedEffect {
                start: message_count,
                end: message_count + cooldown,
                protected: true,
            },
        );
    }
}
