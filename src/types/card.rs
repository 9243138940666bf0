use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::character::{Character, DepthPrompt};
use super::history::Role;
use super::lorebook::{LoreBook, LoreEntry, LorePosition};
use crate::errors::BuildError;

/// A parsed character card container (V2 and the V3 superset).
///
/// File decoding (PNG chunks, base64) is a loader concern; this type
/// starts from the card JSON and normalizes it into [`Character`],
/// preserving unknown `extensions` for round-trip safety. V1 cards
/// (no `spec` field) are rejected with a distinct error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterCard {
    #[serde(default)]
    pub spec: String,
    #[serde(default)]
    pub spec_version: String,
    pub data: CardData,
}

/// The `data` envelope of a V2/V3 card.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardData {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub personality: String,
    #[serde(default)]
    pub scenario: String,
    #[serde(default)]
    pub first_mes: String,
    #[serde(default)]
    pub mes_example: String,
    #[serde(default)]
    pub creator_notes: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub post_history_instructions: String,
    #[serde(default)]
    pub alternate_greetings: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub character_version: String,
    #[serde(default)]
    pub extensions: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_book: Option<CardBook>,
}

/// An embedded lorebook as cards carry it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardBook {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_depth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_budget: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recursive_scanning: Option<bool>,
    #[serde(default)]
    pub entries: Vec<CardBookEntry>,
}

/// One embedded lorebook entry in card form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardBookEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub insertion_order: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_sensitive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selective: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_keys: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constant: Option<bool>,
    /// `before_char` / `after_char` in cards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(default)]
    pub extensions: HashMap<String, Value>,
}

fn default_true() -> bool {
    true
}

impl CharacterCard {
    /// Parse card JSON and normalize. V1 cards carry their fields at the
    /// top level with no `spec`, so they fail here with
    /// [`BuildError::UnsupportedVersion`].
    pub fn from_json(json: &str) -> Result<Character, BuildError> {
        let value: Value = serde_json::from_str(json)
            .map_err(|err| BuildError::InvalidInput(format!("card is not valid JSON: {err}")))?;
        if value.get("spec").is_none() {
            return Err(BuildError::UnsupportedVersion(
                "card has no spec field (V1 cards are not supported)".into(),
            ));
        }
        let card: CharacterCard = serde_json::from_value(value)
            .map_err(|err| BuildError::InvalidInput(format!("malformed card: {err}")))?;
        card.into_character()
    }

    pub fn into_character(self) -> Result<Character, BuildError> {
        match self.spec.as_str() {
            "chara_card_v2" | "chara_card_v3" => {}
            other => {
                return Err(BuildError::UnsupportedVersion(format!(
                    "unsupported card spec: {other:?}"
                )))
            }
        }
        if self.data.name.is_empty() {
            return Err(BuildError::InvalidInput("card has no character name".into()));
        }

        let data = self.data;
        Ok(Character {
            name: data.name,
            description: data.description,
            personality: data.personality,
            scenario: data.scenario,
            system_prompt: data.system_prompt,
            post_history_instructions: data.post_history_instructions,
            first_message: data.first_mes,
            alternate_greetings: data.alternate_greetings,
            example_dialogue: data.mes_example,
            creator_notes: data.creator_notes,
            character_version: data.character_version,
            tags: data.tags,
            depth_prompt: depth_prompt_from_extensions(&data.extensions),
            embedded_lorebook: data.character_book.map(normalize_book),
            extensions: data.extensions,
        })
    }
}

/// Cards tuck the depth prompt into
/// `extensions.depth_prompt = { prompt, depth, role }`.
fn depth_prompt_from_extensions(extensions: &HashMap<String, Value>) -> DepthPrompt {
    let Some(raw) = extensions.get("depth_prompt") else {
        return DepthPrompt::default();
    };
    let text = raw
        .get("prompt")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let mut depth_prompt = DepthPrompt {
        text,
        ..Default::default()
    };
    if let Some(depth) = raw.get("depth").and_then(Value::as_u64) {
        depth_prompt.depth = depth as u32;
    }
    if let Some(role) = raw.get("role").and_then(Value::as_str) {
        depth_prompt.role = match role {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            _ => Role::System,
        };
    }
    depth_prompt
}

fn normalize_book(book: CardBook) -> LoreBook {
    let entries = book
        .entries
        .into_iter()
        .enumerate()
        .map(|(index, raw)| {
            let uid = raw.id.unwrap_or(index as u32);
            let mut entry = LoreEntry::new(uid, raw.content).with_keys(raw.keys);
            entry.name = raw.name;
            entry.enabled = raw.enabled;
            entry.insertion_order = raw.insertion_order;
            entry.case_sensitive = raw.case_sensitive;
            entry.selective = raw.selective.unwrap_or(false);
            entry.secondary_keys = raw.secondary_keys.unwrap_or_default();
            entry.constant = raw.constant.unwrap_or(false);
            entry.position = match raw.position.as_deref() {
                Some("after_char") => LorePosition::AfterCharDefs,
                _ => LorePosition::BeforeCharDefs,
            };
            entry
        })
        .collect();

    LoreBook {
        name: book.name.unwrap_or_else(|| "embedded".into()),
        entries,
        scan_depth: book.scan_depth,
        token_budget: book.token_budget,
        recursive_scanning: book.recursive_scanning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v2_card_normalizes() {
        let json = r#"{
            "spec": "chara_card_v2",
            "spec_version": "2.0",
            "data": {
                "name": "Alice",
                "description": "A cartographer.",
                "first_mes": "Hello!",
                "mes_example": "<START>\n{{user}}: hi\n{{char}}: hello",
                "alternate_greetings": ["Yo."],
                "extensions": {"depth_prompt": {"prompt": "Stay wry.", "depth": 2, "role": "user"}},
                "character_book": {
                    "name": "maps",
                    "entries": [
                        {"keys": ["atlas"], "content": "The atlas is cursed.",
                         "insertion_order": 5, "position": "after_char"}
                    ]
                }
            }
        }"#;

        let character = CharacterCard::from_json(json).unwrap();
        assert_eq!(character.name, "Alice");
        assert_eq!(character.first_message, "Hello!");
        assert_eq!(character.depth_prompt.text, "Stay wry.");
        assert_eq!(character.depth_prompt.depth, 2);
        assert_eq!(character.depth_prompt.role, Role::User);

        let book = character.embedded_lorebook.unwrap();
        assert_eq!(book.name, "maps");
        assert_eq!(book.entries[0].position, LorePosition::AfterCharDefs);
        assert_eq!(book.entries[0].insertion_order, 5);
    }

    #[test]
    fn v1_card_is_rejected_distinctly() {
        let json = r#"{"name": "Alice", "description": "old format"}"#;
        let err = CharacterCard::from_json(json).unwrap_err();
        assert!(matches!(err, BuildError::UnsupportedVersion(_)));
    }

    #[test]
    fn unknown_spec_is_rejected() {
        let json = r#"{"spec": "chara_card_v9", "spec_version": "9.0", "data": {"name": "X"}}"#;
        let err = CharacterCard::from_json(json).unwrap_err();
        assert!(matches!(err, BuildError::UnsupportedVersion(_)));
    }

    #[test]
    fn extensions_roundtrip_through_character() {
        let json = r#"{
            "spec": "chara_card_v3",
            "spec_version": "3.0",
            "data": {"name": "Alice", "extensions": {"vendor_blob": {"k": [1, 2, 3]}}}
        }"#;
        let character = CharacterCard::from_json(json).unwrap();
        assert_eq!(character.extensions["vendor_blob"]["k"][1], 2);
    }

    #[test]
    fn uids_fall_back_to_entry_index() {
        let json = r#"{
            "spec": "chara_card_v2",
            "spec_version": "2.0",
            "data": {
                "name": "Alice",
                "character_book": {"entries": [
                    {"keys": ["a"], "content": "A"},
                    {"keys": ["b"], "content": "B"}
                ]}
            }
        }"#;
        let character = CharacterCard::from_json(json).unwrap();
        let book = character.embedded_lorebook.unwrap();
        assert_eq!(book.entries[0].uid, 0);
        assert_eq!(book.entries[1].uid, 1);
        assert_eq!(book.name, "embedded");
    }
}
