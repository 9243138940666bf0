use serde::{Deserialize, Serialize};

use super::history::Role;
use super::preset::GenerationType;

/// Which side a lorebook came from. Part of the stable entry identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoreSource {
    Character,
    Global,
}

impl std::fmt::Display for LoreSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoreSource::Character => f.write_str("character"),
            LoreSource::Global => f.write_str("global"),
        }
    }
}

/// Stable identity of an entry across a build: `"{source}:{book}.{uid}"`.
/// Uid uniqueness is per book.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryKey {
    pub source: LoreSource,
    pub book: String,
    pub uid: u32,
}

impl std::fmt::Display for EntryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}.{}", self.source, self.book, self.uid)
    }
}

/// How secondary keys combine with the primary key set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectiveLogic {
    /// Primary matched and any secondary matched.
    AndAny,
    /// Primary matched and all secondaries matched.
    AndAll,
    /// Primary matched and no secondary matched.
    NotAny,
    /// Primary matched and at least one secondary did not match.
    NotAll,
}

impl Default for SelectiveLogic {
    fn default() -> Self {
        SelectiveLogic::AndAny
    }
}

/// Where an activated entry's content is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LorePosition {
    BeforeCharDefs,
    AfterCharDefs,
    BeforeExampleMessages,
    AfterExampleMessages,
    /// Prepended to the authors-note text.
    TopOfAn,
    /// Appended to the authors-note text.
    BottomOfAn,
    /// Interleaved into chat at `depth`.
    AtDepth,
    /// Collected into a named outlet, read back by `{{outlet::name}}`.
    Outlet,
}

impl Default for LorePosition {
    fn default() -> Self {
        LorePosition::BeforeCharDefs
    }
}

/// One lorebook entry.
///
/// Field groups follow the card format: matching, activation, placement,
/// budget/recursion, triggers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoreEntry {
    pub uid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub content: String,

    // — matching —
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub secondary_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_sensitive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_whole_words: Option<bool>,
    #[serde(default)]
    pub selective: bool,
    #[serde(default)]
    pub selective_logic: SelectiveLogic,
    #[serde(default)]
    pub use_regex: bool,
    #[serde(default)]
    pub match_character_description: bool,
    #[serde(default)]
    pub match_character_personality: bool,
    #[serde(default)]
    pub match_scenario: bool,
    #[serde(default)]
    pub match_creator_notes: bool,
    #[serde(default)]
    pub match_persona: bool,
    #[serde(default)]
    pub match_depth_prompt: bool,

    // — activation —
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub constant: bool,
    #[serde(default = "default_probability")]
    pub probability: u8,
    #[serde(default)]
    pub use_probability: bool,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub group_weight: i32,
    #[serde(default)]
    pub group_override: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_group_scoring: Option<bool>,
    /// Suppress until the chat has at least this many messages.
    #[serde(default)]
    pub delay: u32,
    /// Stay active this many messages after a hit.
    #[serde(default)]
    pub sticky: u32,
    /// Block re-activation this many messages after a hit.
    #[serde(default)]
    pub cooldown: u32,
    #[serde(default)]
    pub delay_until_recursion: bool,

    // — placement —
    #[serde(default)]
    pub position: LorePosition,
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outlet_name: Option<String>,
    #[serde(default)]
    pub insertion_order: i32,

    // — budget & recursion —
    #[serde(default)]
    pub ignore_budget: bool,
    /// Activated content does not join the recursion scan buffer.
    #[serde(default)]
    pub prevent_recursion: bool,
    /// Entry cannot be activated by recursed content.
    #[serde(default)]
    pub exclude_recursion: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_depth: Option<u32>,

    /// Generation types this entry fires for; empty means all.
    #[serde(default)]
    pub triggers: Vec<GenerationType>,
}

fn default_enabled() -> bool {
    true
}

fn default_probability() -> u8 {
    100
}

impl LoreEntry {
    pub fn new(uid: u32, content: impl Into<String>) -> Self {
        Self {
            uid,
            name: None,
            content: content.into(),
            keys: Vec::new(),
            secondary_keys: Vec::new(),
            case_sensitive: None,
            match_whole_words: None,
            selective: false,
            selective_logic: SelectiveLogic::default(),
            use_regex: false,
            match_character_description: false,
            match_character_personality: false,
            match_scenario: false,
            match_creator_notes: false,
            match_persona: false,
            match_depth_prompt: false,
            enabled: true,
            constant: false,
            probability: 100,
            use_probability: false,
            group: String::new(),
            group_weight: 100,
            group_override: false,
            use_group_scoring: None,
            delay: 0,
            sticky: 0,
            cooldown: 0,
            delay_until_recursion: false,
            position: LorePosition::default(),
            depth: 4,
            role: Role::System,
            outlet_name: None,
            insertion_order: 100,
            ignore_budget: false,
            prevent_recursion: false,
            exclude_recursion: false,
            scan_depth: None,
            triggers: Vec::new(),
        }
    }

    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Whether this entry fires for the given generation type.
    pub fn triggers_on(&self, generation_type: GenerationType) -> bool {
        self.triggers.is_empty() || self.triggers.contains(&generation_type)
    }
}

/// A lorebook: a named set of entries plus scan settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoreBook {
    pub name: String,
    #[serde(default)]
    pub entries: Vec<LoreEntry>,
    /// Book-level override for how many chat messages are scanned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_depth: Option<u32>,
    /// Book-level token budget override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_budget: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recursive_scanning: Option<bool>,
}

impl LoreBook {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_entries(mut self, entries: Vec<LoreEntry>) -> Self {
        self.entries = entries;
        self
    }
}
