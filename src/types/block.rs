use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::history::Role;

/// Where a block lands in the final linear sequence.
///
/// `Relative` blocks keep the order the prompt-entry list emitted them in;
/// the other points are fixed regions resolved during compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertionPoint {
    /// Start of the prompt, before the main region.
    BeforePrompt,
    /// The ordered main region around the chat-history sentinel.
    Relative,
    /// End of the main region, immediately before chat history.
    InPrompt,
    /// The chat-history sentinel itself.
    ChatHistory,
    /// Post-history instructions; always last.
    PostHistory,
    /// Interleaved into chat history by `(depth, order, role)`.
    InChat,
}

/// Bucket governing trimmer priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetGroup {
    System,
    Examples,
    Lore,
    History,
    Custom,
    Default,
}

impl Default for BudgetGroup {
    fn default() -> Self {
        BudgetGroup::Default
    }
}

/// Well-known slot tags attached to blocks the pipeline produces itself.
pub mod slots {
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
    pub const CHARACTER_DEPTH_PROMPT: &str = "character_depth_prompt";
    pub const NEW_CHAT_PROMPT: &str = "new_chat_prompt";
    pub const NEW_EXAMPLE_CHAT: &str = "new_example_chat";
    pub const MES_EXAMPLE: &str = "mes_example";
    pub const GROUP_NUDGE: &str = "group_nudge";
    pub const CONTINUE_NUDGE: &str = "continue_nudge";
    pub const IMPERSONATION_PROMPT: &str = "impersonation_prompt";
    pub const USER_MESSAGE: &str = "user_message";
    pub const HISTORY_MESSAGE: &str = "history_message";
    pub const WORLD_INFO_ENTRY: &str = "world_info_entry";
}

/// The unit of assembled prompt.
///
/// Constructed by the lore/entry/injection workers, merged and expanded by
/// compilation, possibly evicted by the trimmer. Evicted blocks are never
/// revived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<String>,
    pub enabled: bool,
    pub insertion_point: InsertionPoint,
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub order: i32,
    /// Eviction weight inside the lore group; lower keeps longer.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub group: BudgetGroup,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Block {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            name: None,
            slot: None,
            enabled: true,
            insertion_point: InsertionPoint::Relative,
            depth: 0,
            order: 0,
            priority: 0,
            group: BudgetGroup::Default,
            tags: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_slot(mut self, slot: impl Into<String>) -> Self {
        self.slot = Some(slot.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn in_group(mut self, group: BudgetGroup) -> Self {
        self.group = group;
        self
    }

    pub fn at(mut self, point: InsertionPoint) -> Self {
        self.insertion_point = point;
        self
    }

    pub fn at_depth(mut self, depth: u32, order: i32) -> Self {
        self.insertion_point = InsertionPoint::InChat;
        self.depth = depth;
        self.order = order;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn has_slot(&self, slot: &str) -> bool {
        self.slot.as_deref() == Some(slot)
    }

    /// Whether this is the chat-history sentinel.
    pub fn is_history_sentinel(&self) -> bool {
        self.insertion_point == InsertionPoint::ChatHistory
    }
}
