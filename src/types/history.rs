use serde::{Deserialize, Serialize};

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Fixed emission order inside one in-chat `(depth, order)` bucket.
    pub(crate) fn merge_rank(&self) -> u8 {
        match self {
            Role::Assistant => 0,
            Role::User => 1,
            Role::System => 2,
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::System
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chat message, including swipe alternatives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub swipes: Vec<String>,
    #[serde(default)]
    pub active_swipe_index: usize,
    /// Hidden messages stay in the UI but never reach the prompt.
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            swipes: Vec::new(),
            active_swipe_index: 0,
            visible: true,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// The text this message contributes to the prompt: the active swipe
    /// when swipes exist, the base content otherwise.
    pub fn active_content(&self) -> &str {
        if self.swipes.is_empty() {
            &self.content
        } else {
            self.swipes
                .get(self.active_swipe_index)
                .map(String::as_str)
                .unwrap_or(&self.content)
        }
    }
}

/// Chat history as the pipeline consumes it.
///
/// The host owns persistence; the core only reads. Implementations must
/// return messages in chronological order.
pub trait History {
    fn messages(&self) -> &[Message];

    fn len(&self) -> usize {
        self.messages().len()
    }

    fn is_empty(&self) -> bool {
        self.messages().is_empty()
    }

    fn last_user(&self) -> Option<&Message> {
        self.messages().iter().rev().find(|m| m.role == Role::User)
    }

    fn last_assistant(&self) -> Option<&Message> {
        self.messages()
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
    }

    /// Count of visible user messages; drives the authors-note frequency
    /// gate and turn-count entry conditions.
    fn user_message_count(&self) -> usize {
        self.messages()
            .iter()
            .filter(|m| m.visible && m.role == Role::User)
            .count()
    }
}

/// The provided in-memory history implementation.
#[derive(Debug, Clone, Default)]
pub struct VecHistory {
    messages: Vec<Message>,
}

impl VecHistory {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }
}

impl History for VecHistory {
    fn messages(&self) -> &[Message] {
        &self.messages
    }
}

impl From<Vec<Message>> for VecHistory {
    fn from(messages: Vec<Message>) -> Self {
        Self::new(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        let back: Role = serde_json::from_str("\"system\"").unwrap();
        assert_eq!(back, Role::System);
    }

    #[test]
    fn active_content_prefers_swipe() {
        let mut msg = Message::assistant("base");
        assert_eq!(msg.active_content(), "base");

        msg.swipes = vec!["first".into(), "second".into()];
        msg.active_swipe_index = 1;
        assert_eq!(msg.active_content(), "second");

        // Out-of-range swipe index falls back to the base content.
        msg.active_swipe_index = 9;
        assert_eq!(msg.active_content(), "base");
    }

    #[test]
    fn history_accessors() {
        let history = VecHistory::new(vec![
            Message::user("one"),
            Message::assistant("two"),
            Message::user("three").hidden(),
            Message::assistant("four"),
        ]);
        assert_eq!(history.len(), 4);
        assert_eq!(history.last_user().unwrap().content, "three");
        assert_eq!(history.last_assistant().unwrap().content, "four");
        // hidden user message is excluded from the frequency count
        assert_eq!(history.user_message_count(), 1);
    }
}
