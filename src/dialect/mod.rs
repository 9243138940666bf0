//! Wire-format projection.
//!
//! The final block sequence converts mechanically into the target
//! provider shape. All adapters are deterministic and preserve message
//! order; only the merging rules each dialect defines apply.

mod anthropic;
mod misc;
mod openai;
mod text;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::BuildError;
use crate::types::{Block, InstructFormat, Role};

/// Supported wire shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    OpenAiChat,
    AnthropicMessages,
    TextCompletion,
    CohereChat,
    GoogleChat,
    MistralChat,
    /// OpenAI-shaped, but without per-message names.
    Ai21Chat,
    /// OpenAI-compatible wire shape.
    XaiChat,
}

impl Default for Dialect {
    fn default() -> Self {
        Dialect::OpenAiChat
    }
}

impl std::str::FromStr for Dialect {
    type Err = BuildError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "openai" | "chat-openai" | "openai_chat" => Ok(Dialect::OpenAiChat),
            "anthropic" | "chat-anthropic" | "anthropic_messages" => Ok(Dialect::AnthropicMessages),
            "text" | "text-completion" | "text_completion" => Ok(Dialect::TextCompletion),
            "cohere" | "cohere_chat" => Ok(Dialect::CohereChat),
            "google" | "google_chat" => Ok(Dialect::GoogleChat),
            "mistral" | "mistral_chat" => Ok(Dialect::MistralChat),
            "ai21" | "ai21_chat" => Ok(Dialect::Ai21Chat),
            "xai" | "xai_chat" => Ok(Dialect::XaiChat),
            other => Err(BuildError::UnknownDialect(other.to_string())),
        }
    }
}

/// Per-call rendering knobs.
#[derive(Debug, Clone)]
pub struct DialectOptions {
    /// Merge adjacent unnamed system messages (openai dialect).
    pub squash_system_messages: bool,
    /// Emit per-message `name` fields where the dialect supports them.
    pub include_names: bool,
    /// Instruct-mode wrapping for the text dialect.
    pub instruct: Option<InstructFormat>,
    pub user_label: String,
    pub assistant_label: String,
    pub system_label: String,
}

impl Default for DialectOptions {
    fn default() -> Self {
        Self {
            squash_system_messages: false,
            include_names: true,
            instruct: None,
            user_label: "User".into(),
            assistant_label: "Assistant".into(),
            system_label: "System".into(),
        }
    }
}

impl DialectOptions {
    /// Pick up the preset's output-shaping knobs.
    pub fn from_preset(preset: &crate::types::Preset) -> Self {
        Self {
            squash_system_messages: preset.squash_system_messages,
            instruct: preset.instruct.clone(),
            ..Default::default()
        }
    }

    /// Label speakers with the actual character and user names.
    pub fn with_speakers(mut self, user: &str, assistant: &str) -> Self {
        self.user_label = user.to_string();
        self.assistant_label = assistant.to_string();
        self
    }

    pub fn label(&self, role: Role) -> &str {
        match role {
            Role::User => &self.user_label,
            Role::Assistant => &self.assistant_label,
            Role::System => &self.system_label,
        }
    }
}

/// One chat-shaped output message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One Anthropic system text part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPart {
    #[serde(rename = "type")]
    pub part_type: String,
    pub text: String,
}

impl TextPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            part_type: "text".into(),
            text: text.into(),
        }
    }
}

/// The rendered output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireOutput {
    Chat(Vec<WireMessage>),
    Anthropic {
        system: Vec<TextPart>,
        messages: Vec<WireMessage>,
        /// The trailing assistant message continues an existing reply.
        prefill: bool,
    },
    Text {
        prompt: String,
        stop_sequences: Vec<String>,
    },
    /// Provider-specific JSON restructurings.
    Json(Value),
}

/// Flattened view of one enabled block, as the adapters consume it.
#[derive(Debug, Clone)]
pub(crate) struct Rendered {
    pub role: Role,
    pub content: String,
    pub name: Option<String>,
    pub slot: Option<String>,
    pub prefill: bool,
}

pub(crate) fn prepare(blocks: &[Block]) -> Vec<Rendered> {
    blocks
        .iter()
        .filter(|b| b.enabled && !b.content.is_empty())
        .map(|b| Rendered {
            role: b.role,
            content: b.content.clone(),
            name: b.name.clone(),
            slot: b.slot.clone(),
            prefill: b.metadata.get("prefill").map(String::as_str) == Some("true"),
        })
        .collect()
}

/// Project blocks into the requested wire shape.
pub fn render(
    blocks: &[Block],
    dialect: Dialect,
    options: &DialectOptions,
) -> Result<WireOutput, BuildError> {
    let rendered = prepare(blocks);
    Ok(match dialect {
        Dialect::OpenAiChat => openai::render(rendered, options),
        Dialect::AnthropicMessages => anthropic::render(rendered, options),
        Dialect::TextCompletion => text::render(rendered, options),
        Dialect::CohereChat => misc::render_cohere(rendered, options),
        Dialect::GoogleChat => misc::render_google(rendered, options),
        Dialect::MistralChat | Dialect::Ai21Chat => misc::render_mistral(rendered, options),
        Dialect::XaiChat => openai::render(rendered, options),
    })
}
