use super::{DialectOptions, Rendered, WireMessage, WireOutput};
use crate::types::{slots, Role};

/// `[{role, content, name?}, …]`.
///
/// With `squash_system_messages`, adjacent unnamed system messages merge
/// (newline-joined) unless either side is a chat or example separator.
pub(crate) fn render(rendered: Vec<Rendered>, options: &DialectOptions) -> WireOutput {
    let mut messages: Vec<WireMessage> = Vec::with_capacity(rendered.len());
    let mut last_squashable = false;

    for block in rendered {
        let name = if options.include_names {
            block.name.clone()
        } else {
            None
        };
        let squashable = options.squash_system_messages
            && block.role == Role::System
            && name.is_none()
            && !is_separator(block.slot.as_deref());

        if squashable && last_squashable {
            if let Some(last) = messages.last_mut() {
                last.content.push('\n');
                last.content.push_str(&block.content);
                continue;
            }
        }

        messages.push(WireMessage {
            role: block.role.as_str().to_string(),
            content: block.content,
            name,
        });
        last_squashable = squashable;
    }

    // Empty system messages carry nothing.
    messages.retain(|m| !(m.role == "system" && m.content.is_empty()));
    WireOutput::Chat(messages)
}

fn is_separator(slot: Option<&str>) -> bool {
    matches!(
        slot,
        Some(slots::NEW_CHAT_PROMPT) | Some(slots::NEW_EXAMPLE_CHAT)
    )
}
