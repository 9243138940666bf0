use serde::{Deserialize, Serialize};

use super::history::Role;

/// The intent of a build. Gates entry triggers and alters plan assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationType {
    Normal,
    Continue,
    Impersonate,
    Swipe,
    Regenerate,
    Quiet,
}

impl Default for GenerationType {
    fn default() -> Self {
        GenerationType::Normal
    }
}

/// What happens to example dialogue under budget pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamplesBehavior {
    /// Evicted first when the budget is tight.
    GraduallyPushOut,
    /// Never evicted.
    AlwaysKeep,
    /// Never emitted at all.
    Disabled,
}

impl Default for ExamplesBehavior {
    fn default() -> Self {
        ExamplesBehavior::GraduallyPushOut
    }
}

/// Tiebreak when merging character and global lore candidates that share
/// an insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoreInsertionStrategy {
    /// Pure sort on insertion order; source does not matter.
    Sorted,
    CharacterFirst,
    GlobalFirst,
}

impl Default for LoreInsertionStrategy {
    fn default() -> Self {
        LoreInsertionStrategy::CharacterFirst
    }
}

/// Authors-note placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorsNotePosition {
    InPrompt,
    InChat,
    BeforePrompt,
}

impl Default for AuthorsNotePosition {
    fn default() -> Self {
        AuthorsNotePosition::InChat
    }
}

/// Authors-note configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorsNote {
    #[serde(default)]
    pub text: String,
    /// Insert when `(user messages + 1) % frequency == 0`; zero disables.
    #[serde(default = "default_an_frequency")]
    pub frequency: i32,
    #[serde(default)]
    pub position: AuthorsNotePosition,
    #[serde(default = "default_an_depth")]
    pub depth: u32,
    #[serde(default)]
    pub role: Role,
    /// Whether the note text participates in the lore scan buffer.
    #[serde(default)]
    pub allow_wi_scan: bool,
}

fn default_an_frequency() -> i32 {
    1
}

fn default_an_depth() -> u32 {
    4
}

impl Default for AuthorsNote {
    fn default() -> Self {
        Self {
            text: String::new(),
            frequency: 1,
            position: AuthorsNotePosition::default(),
            depth: 4,
            role: Role::System,
            allow_wi_scan: false,
        }
    }
}

/// Where a prompt entry is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPosition {
    Relative,
    InChat,
}

impl Default for EntryPosition {
    fn default() -> Self {
        EntryPosition::Relative
    }
}

/// Turn-count predicate for entry conditions, evaluated against the
/// number of visible user messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnPredicate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub every: Option<u32>,
}

impl TurnPredicate {
    pub fn holds(&self, turns: u32) -> bool {
        if let Some(min) = self.min {
            if turns < min {
                return false;
            }
        }
        if let Some(max) = self.max {
            if turns > max {
                return false;
            }
        }
        if let Some(equals) = self.equals {
            if turns != equals {
                return false;
            }
        }
        if let Some(every) = self.every {
            if every == 0 || turns % every != 0 {
                return false;
            }
        }
        true
    }
}

/// Optional activation conditions on a prompt entry. All present
/// conditions must hold.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryCondition {
    /// Substring or JS-style `/regex/flags` matched against recent chat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    /// How many recent messages the keyword scans; defaults to the
    /// preset's world-info depth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword_depth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turns: Option<TurnPredicate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags_any: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags_all: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_contains: Option<String>,
}

/// One element of the preset's ordered prompt-entry list.
///
/// Pinned entries name a built-in slot the assembler fills from preset or
/// character data; custom entries carry their own content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub position: EntryPosition,
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub order: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Generation types this entry applies to; empty means all.
    #[serde(default)]
    pub triggers: Vec<GenerationType>,
    #[serde(default)]
    pub forbid_overrides: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<EntryCondition>,
}

fn default_true() -> bool {
    true
}

impl PromptEntry {
    pub fn pinned(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            enabled: true,
            pinned: true,
            role: Role::System,
            position: EntryPosition::Relative,
            depth: 0,
            order: 0,
            content: None,
            triggers: Vec::new(),
            forbid_overrides: false,
            conditions: None,
        }
    }

    pub fn custom(id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            enabled: true,
            pinned: false,
            role,
            position: EntryPosition::Relative,
            depth: 0,
            order: 0,
            content: Some(content.into()),
            triggers: Vec::new(),
            forbid_overrides: false,
            conditions: None,
        }
    }

    pub fn in_chat(mut self, depth: u32, order: i32) -> Self {
        self.position = EntryPosition::InChat;
        self.depth = depth;
        self.order = order;
        self
    }

    pub fn triggers_on(&self, generation_type: GenerationType) -> bool {
        self.triggers.is_empty() || self.triggers.contains(&generation_type)
    }
}

/// Instruct-mode wrapping for the text-completion dialect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstructFormat {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub input_prefix: String,
    #[serde(default)]
    pub input_suffix: String,
    #[serde(default)]
    pub output_prefix: String,
    #[serde(default)]
    pub output_suffix: String,
    #[serde(default)]
    pub system_prefix: String,
    #[serde(default)]
    pub system_suffix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_output_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_output_prefix: Option<String>,
    #[serde(default)]
    pub stop_sequence: String,
    #[serde(default = "default_true")]
    pub wrap_newline: bool,
}

/// All ordering, budget and formatting knobs for a build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preset {
    // — core templates —
    pub main_prompt: String,
    #[serde(default)]
    pub post_history_instructions: String,
    #[serde(default = "default_true")]
    pub prefer_char_prompt: bool,
    #[serde(default = "default_true")]
    pub prefer_char_instructions: bool,

    // — separators & nudges —
    #[serde(default)]
    pub new_chat_prompt: String,
    #[serde(default)]
    pub new_group_chat_prompt: String,
    #[serde(default)]
    pub new_example_chat: String,
    #[serde(default)]
    pub group_nudge_prompt: String,
    #[serde(default)]
    pub continue_nudge_prompt: String,
    #[serde(default)]
    pub impersonation_prompt: String,
    #[serde(default)]
    pub replace_empty_message: String,

    // — continue handling —
    #[serde(default)]
    pub continue_prefill: bool,
    #[serde(default)]
    pub continue_postfix: String,

    // — output shaping —
    #[serde(default)]
    pub squash_system_messages: bool,
    #[serde(default)]
    pub wi_format: String,
    #[serde(default)]
    pub scenario_format: String,
    #[serde(default)]
    pub personality_format: String,
    #[serde(default)]
    pub examples_behavior: ExamplesBehavior,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruct: Option<InstructFormat>,

    // — budgets —
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window_tokens: Option<u32>,
    #[serde(default)]
    pub reserved_response_tokens: u32,
    #[serde(default = "default_message_overhead")]
    pub message_token_overhead: u32,

    // — world info —
    #[serde(default = "default_wi_depth")]
    pub world_info_depth: u32,
    /// Percentage of the context window granted to lore.
    #[serde(default = "default_wi_budget")]
    pub world_info_budget: u32,
    /// Absolute token cap on lore; zero means uncapped.
    #[serde(default)]
    pub world_info_budget_cap: u32,
    #[serde(default)]
    pub world_info_include_names: bool,
    #[serde(default)]
    pub world_info_min_activations: u32,
    #[serde(default)]
    pub world_info_min_activations_depth_max: u32,
    #[serde(default)]
    pub world_info_use_group_scoring: bool,
    #[serde(default)]
    pub world_info_recursive: bool,
    #[serde(default = "default_recursion_steps")]
    pub world_info_max_recursion_steps: u32,
    #[serde(default)]
    pub character_lore_insertion_strategy: LoreInsertionStrategy,

    // — authors note —
    #[serde(default)]
    pub authors_note: AuthorsNote,

    // — the ordered entry list —
    #[serde(default = "Preset::default_prompt_entries")]
    pub prompt_entries: Vec<PromptEntry>,
}

fn default_message_overhead() -> u32 {
    4
}

fn default_wi_depth() -> u32 {
    2
}

fn default_wi_budget() -> u32 {
    25
}

fn default_recursion_steps() -> u32 {
    3
}

/// Pinned prompt-entry ids the assembler understands.
pub mod pinned {
    pub const MAIN_PROMPT: &str = "main_prompt";
    pub const PERSONA_DESCRIPTION: &str = "persona_description";
    pub const CHARACTER_DESCRIPTION: &str = "character_description";
    pub const CHARACTER_PERSONALITY: &str = "character_personality";
    pub const SCENARIO: &str = "scenario";
    pub const CHAT_EXAMPLES: &str = "chat_examples";
    pub const CHAT_HISTORY: &str = "chat_history";
    pub const WORLD_INFO_BEFORE_CHAR_DEFS: &str = "world_info_before_char_defs";
    pub const WORLD_INFO_AFTER_CHAR_DEFS: &str = "world_info_after_char_defs";
    pub const WORLD_INFO_BEFORE_EXAMPLE_MESSAGES: &str = "world_info_before_example_messages";
    pub const WORLD_INFO_AFTER_EXAMPLE_MESSAGES: &str = "world_info_after_example_messages";
    pub const AUTHORS_NOTE: &str = "authors_note";
    pub const POST_HISTORY_INSTRUCTIONS: &str = "post_history_instructions";
    pub const ENHANCE_DEFINITIONS: &str = "enhance_definitions";
    pub const AUXILIARY_PROMPT: &str = "auxiliary_prompt";

    pub const ALL: &[&str] = &[
        MAIN_PROMPT,
        PERSONA_DESCRIPTION,
        CHARACTER_DESCRIPTION,
        CHARACTER_PERSONALITY,
        SCENARIO,
        CHAT_EXAMPLES,
        CHAT_HISTORY,
        WORLD_INFO_BEFORE_CHAR_DEFS,
        WORLD_INFO_AFTER_CHAR_DEFS,
        WORLD_INFO_BEFORE_EXAMPLE_MESSAGES,
        WORLD_INFO_AFTER_EXAMPLE_MESSAGES,
        AUTHORS_NOTE,
        POST_HISTORY_INSTRUCTIONS,
        ENHANCE_DEFINITIONS,
        AUXILIARY_PROMPT,
    ];
}

impl Preset {
    /// The canonical anchored ordering: injections and lore slot into the
    /// gaps this list leaves around the chat-history sentinel.
    pub fn default_prompt_entries() -> Vec<PromptEntry> {
        [
            pinned::MAIN_PROMPT,
            pinned::WORLD_INFO_BEFORE_CHAR_DEFS,
            pinned::PERSONA_DESCRIPTION,
            pinned::CHARACTER_DESCRIPTION,
            pinned::CHARACTER_PERSONALITY,
            pinned::SCENARIO,
            pinned::ENHANCE_DEFINITIONS,
            pinned::AUXILIARY_PROMPT,
            pinned::WORLD_INFO_AFTER_CHAR_DEFS,
            pinned::WORLD_INFO_BEFORE_EXAMPLE_MESSAGES,
            pinned::CHAT_EXAMPLES,
            pinned::WORLD_INFO_AFTER_EXAMPLE_MESSAGES,
            pinned::AUTHORS_NOTE,
            pinned::CHAT_HISTORY,
            pinned::POST_HISTORY_INSTRUCTIONS,
        ]
        .iter()
        .map(|id| PromptEntry::pinned(*id))
        .collect()
    }

    /// Tokens available for input: context window minus the response
    /// reserve. `None` disables trimming.
    pub fn max_input_tokens(&self) -> Option<u32> {
        self.context_window_tokens
            .map(|window| window.saturating_sub(self.reserved_response_tokens))
    }

    /// Effective lore budget in tokens.
    pub fn lore_budget(&self) -> u32 {
        let window = self.context_window_tokens.unwrap_or(8192);
        let percent = (window as u64 * self.world_info_budget as u64 / 100) as u32;
        if self.world_info_budget_cap == 0 {
            percent
        } else {
            percent.min(self.world_info_budget_cap)
        }
    }
}

impl Default for Preset {
    fn default() -> Self {
        Self {
            main_prompt: "Write {{char}}'s next reply in a fictional chat between \
                          {{charIfNotGroup}} and {{user}}."
                .into(),
            post_history_instructions: String::new(),
            prefer_char_prompt: true,
            prefer_char_instructions: true,
            new_chat_prompt: "[Start a new Chat]".into(),
            new_group_chat_prompt: "[Start a new group chat. Group members: {{group}}]".into(),
            new_example_chat: "[Example Chat]".into(),
            group_nudge_prompt: "[Write the next reply only as {{char}}.]".into(),
            continue_nudge_prompt: "[Continue your last message without repeating its original \
                                    content.]"
                .into(),
            impersonation_prompt: "[Write your next reply from the point of view of {{user}}, \
                                   using the chat history so far as a guideline for the writing \
                                   style of {{user}}.]"
                .into(),
            replace_empty_message: String::new(),
            continue_prefill: false,
            continue_postfix: " ".into(),
            squash_system_messages: false,
            wi_format: "{0}\n".into(),
            scenario_format: "[Circumstances and context of the dialogue: {0}]".into(),
            personality_format: "[{{char}}'s personality: {0}]".into(),
            examples_behavior: ExamplesBehavior::default(),
            instruct: None,
            context_window_tokens: None,
            reserved_response_tokens: 0,
            message_token_overhead: 4,
            world_info_depth: 2,
            world_info_budget: 25,
            world_info_budget_cap: 0,
            world_info_include_names: false,
            world_info_min_activations: 0,
            world_info_min_activations_depth_max: 0,
            world_info_use_group_scoring: false,
            world_info_recursive: false,
            world_info_max_recursion_steps: 3,
            character_lore_insertion_strategy: LoreInsertionStrategy::default(),
            authors_note: AuthorsNote::default(),
            prompt_entries: Self::default_prompt_entries(),
        }
    }
}
