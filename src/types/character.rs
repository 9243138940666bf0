use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::history::Role;
use super::lorebook::LoreBook;

/// A normalized character definition (Character Card V2/V3 data).
///
/// Card file decoding lives outside the core; loaders hand this struct in
/// with unknown `extensions` keys preserved for round-trip safety.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub personality: String,
    #[serde(default)]
    pub scenario: String,
    /// Overrides the preset main prompt when `prefer_char_prompt` is set.
    #[serde(default)]
    pub system_prompt: String,
    /// Overrides the preset PHI when `prefer_char_instructions` is set.
    #[serde(default)]
    pub post_history_instructions: String,
    #[serde(default)]
    pub first_message: String,
    #[serde(default)]
    pub alternate_greetings: Vec<String>,
    /// Raw example-dialogue text, `<START>`-separated.
    #[serde(default)]
    pub example_dialogue: String,
    #[serde(default)]
    pub creator_notes: String,
    #[serde(default)]
    pub character_version: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub depth_prompt: DepthPrompt,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded_lorebook: Option<LoreBook>,
    /// Unknown card fields, preserved unmodified.
    #[serde(default)]
    pub extensions: HashMap<String, Value>,
}

impl Character {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Character-supplied in-chat prompt injected at a fixed depth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthPrompt {
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_depth")]
    pub depth: u32,
    #[serde(default = "DepthPrompt::default_role")]
    pub role: Role,
}

fn default_depth() -> u32 {
    4
}

impl DepthPrompt {
    fn default_role() -> Role {
        Role::System
    }
}

impl Default for DepthPrompt {
    fn default() -> Self {
        Self {
            text: String::new(),
            depth: default_depth(),
            role: Role::System,
        }
    }
}

/// The user persona.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    #[serde(default)]
    pub persona_text: String,
}

impl User {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            persona_text: String::new(),
        }
    }
}

/// Group-chat context consumed by the group-aware macros.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupContext {
    pub members: Vec<String>,
    #[serde(default)]
    pub muted: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_character: Option<String>,
}

impl GroupContext {
    /// Member names joined for prompt text: "A, B and C".
    pub fn joined_members(&self) -> String {
        join_names(&self.members)
    }

    /// Non-muted member names joined the same way.
    pub fn joined_not_muted(&self) -> String {
        let names: Vec<String> = self
            .members
            .iter()
            .filter(|m| !self.muted.contains(m))
            .cloned()
            .collect();
        join_names(&names)
    }

    /// Members other than the currently speaking character.
    pub fn joined_not_current(&self) -> String {
        let current = self.current_character.as_deref().unwrap_or_default();
        let names: Vec<String> = self
            .members
            .iter()
            .filter(|m| m.as_str() != current)
            .cloned()
            .collect();
        join_names(&names)
    }
}

fn join_names(names: &[String]) -> String {
    match names.len() {
        0 => String::new(),
        1 => names[0].clone(),
        n => format!("{} and {}", names[..n - 1].join(", "), names[n - 1]),
    }
}
