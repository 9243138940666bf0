use super::{DialectOptions, Rendered, TextPart, WireMessage, WireOutput};
use crate::types::Role;

/// Content must never be empty on the Anthropic side.
const EMPTY_PLACEHOLDER: &str = "\u{200b}";

/// `{ system: [{type:"text", text}], messages: […] }`.
///
/// Leading system blocks extract into `system`; later system blocks
/// demote to user. Names prefix into content, consecutive same-role
/// messages merge, and a trailing prefill-marked assistant message sets
/// the `prefill` flag.
pub(crate) fn render(rendered: Vec<Rendered>, options: &DialectOptions) -> WireOutput {
    let mut system: Vec<TextPart> = Vec::new();
    let mut messages: Vec<WireMessage> = Vec::new();
    let mut prefill = false;
    let mut in_leading_system = true;

    for block in rendered {
        if in_leading_system && block.role == Role::System {
            system.push(TextPart::text(block.content));
            continue;
        }
        in_leading_system = false;

        // The messages array only knows user and assistant.
        let role = match block.role {
            Role::Assistant => "assistant",
            Role::User | Role::System => "user",
        };
        let content = match (&block.name, options.include_names) {
            (Some(name), true) => format!("{name}: {}", block.content),
            _ => block.content,
        };
        prefill = block.prefill && role == "assistant";

        match messages.last_mut() {
            Some(last) if last.role == role => {
                last.content.push('\n');
                last.content.push_str(&content);
            }
            _ => messages.push(WireMessage {
                role: role.to_string(),
                content,
                name: None,
            }),
        }
    }

    for message in &mut messages {
        if message.content.is_empty() {
            message.content = EMPTY_PLACEHOLDER.to_string();
        }
    }
    // Prefill only holds if the assistant message stayed last.
    if prefill && messages.last().map(|m| m.role.as_str()) != Some("assistant") {
        prefill = false;
    }

    WireOutput::Anthropic {
        system,
        messages,
        prefill,
    }
}
