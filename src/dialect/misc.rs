//! Provider-specific JSON restructurings. All preserve message order
//! after role mapping, merging and name-prefixing.

use serde_json::{json, Value};

use super::{DialectOptions, Rendered, WireMessage, WireOutput};
use crate::types::Role;

fn name_prefixed(block: &Rendered, options: &DialectOptions) -> String {
    match (&block.name, options.include_names) {
        (Some(name), true) => format!("{name}: {}", block.content),
        _ => block.content.clone(),
    }
}

/// Mistral chat: openai-shaped but without `name` fields; names prefix
/// into content and consecutive same-role messages merge.
pub(crate) fn render_mistral(rendered: Vec<Rendered>, options: &DialectOptions) -> WireOutput {
    let mut messages: Vec<WireMessage> = Vec::new();
    for block in rendered {
        let content = name_prefixed(&block, options);
        let role = block.role.as_str();
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
    WireOutput::Chat(messages)
}

/// Google `generateContent`: system instruction plus user/model contents.
pub(crate) fn render_google(rendered: Vec<Rendered>, options: &DialectOptions) -> WireOutput {
    let mut system_parts: Vec<String> = Vec::new();
    let mut contents: Vec<(String, String)> = Vec::new();
    let mut leading = true;

    for block in rendered {
        if leading && block.role == Role::System {
            system_parts.push(block.content);
            continue;
        }
        leading = false;
        let role = match block.role {
            Role::Assistant => "model",
            Role::User | Role::System => "user",
        };
        let content = name_prefixed(&block, options);
        match contents.last_mut() {
            Some((last_role, last_content)) if last_role == role => {
                last_content.push('\n');
                last_content.push_str(&content);
            }
            _ => contents.push((role.to_string(), content)),
        }
    }

    let contents_json: Vec<Value> = contents
        .into_iter()
        .map(|(role, text)| json!({"role": role, "parts": [{"text": text}]}))
        .collect();
    let mut out = json!({ "contents": contents_json });
    if !system_parts.is_empty() {
        out["system_instruction"] = json!({ "parts": [{"text": system_parts.join("\n")}] });
    }
    WireOutput::Json(out)
}

/// Cohere chat: preamble, chat history, and the final user message.
pub(crate) fn render_cohere(rendered: Vec<Rendered>, options: &DialectOptions) -> WireOutput {
    let mut preamble: Vec<String> = Vec::new();
    let mut history: Vec<Value> = Vec::new();
    let mut leading = true;

    for block in rendered {
        if leading && block.role == Role::System {
            preamble.push(block.content);
            continue;
        }
        leading = false;
        let role = match block.role {
            Role::User => "USER",
            Role::Assistant => "CHATBOT",
            Role::System => "SYSTEM",
        };
        history.push(json!({
            "role": role,
            "message": name_prefixed(&block, options),
        }));
    }

    // The last user turn becomes the query message.
    let message = match history.last() {
        Some(last) if last["role"] == "USER" => history
            .pop()
            .and_then(|v| v["message"].as_str().map(str::to_string))
            .unwrap_or_default(),
        _ => String::new(),
    };

    let mut out = json!({ "chat_history": history, "message": message });
    if !preamble.is_empty() {
        out["preamble"] = Value::String(preamble.join("\n"));
    }
    WireOutput::Json(out)
}
