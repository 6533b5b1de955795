use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a chat exchange. Serializes to the `{role, content}` shape
/// the chat completion endpoint expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered, append-only history for the lifetime of one session.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(ConversationTurn::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(ConversationTurn::assistant(content));
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Full message list for a completion call: the system prompt followed by
    /// every turn so far.
    pub fn with_system(&self, system_prompt: &str) -> Vec<ConversationTurn> {
        let mut messages = Vec::with_capacity(self.turns.len() + 1);
        messages.push(ConversationTurn::system(system_prompt));
        messages.extend(self.turns.iter().cloned());
        messages
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ConversationHistory, ConversationTurn, Role};

    #[test]
    fn turns_serialize_to_chat_message_shape() -> anyhow::Result<()> {
        let value = serde_json::to_value(ConversationTurn::assistant("ok"))?;
        assert_eq!(value, json!({"role": "assistant", "content": "ok"}));
        Ok(())
    }

    #[test]
    fn history_keeps_order_and_prepends_system_prompt() {
        let mut history = ConversationHistory::new();
        history.push_user("hi");
        history.push_assistant("hello");
        history.push_user("draw a cat");

        let messages = history.with_system("be brief");
        let roles: Vec<Role> = messages.iter().map(|turn| turn.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(messages[0].content, "be brief");
        assert_eq!(history.len(), 3);
    }
}
