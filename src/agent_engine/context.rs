use crate::device::Screenshot;
use crate::llm::types::{ChatMessage, ContentPart, ImageUrl, MessageContent, Role, ToolCall};

// ── Turn builders ─────────────────────────────────────────────────────────

pub fn system_message(text: impl Into<String>) -> ChatMessage {
    ChatMessage {
        role: Role::System,
        content: MessageContent::Text(text.into()),
        tool_call_id: None,
        tool_calls: None,
    }
}

/// User turn; with a screenshot the image part comes before the text.
pub fn user_message(text: impl Into<String>, image: Option<&Screenshot>) -> ChatMessage {
    let content = match image {
        Some(shot) => MessageContent::Parts(vec![
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: shot.data_url(),
                },
            },
            ContentPart::Text { text: text.into() },
        ]),
        None => MessageContent::Text(text.into()),
    };
    ChatMessage {
        role: Role::User,
        content,
        tool_call_id: None,
        tool_calls: None,
    }
}

pub fn assistant_message(text: impl Into<String>, tool_calls: Option<Vec<ToolCall>>) -> ChatMessage {
    ChatMessage {
        role: Role::Assistant,
        content: MessageContent::Text(text.into()),
        tool_call_id: None,
        tool_calls,
    }
}

pub fn tool_message(call_id: impl Into<String>, content: impl Into<String>) -> ChatMessage {
    ChatMessage {
        role: Role::Tool,
        content: MessageContent::Text(content.into()),
        tool_call_id: Some(call_id.into()),
        tool_calls: None,
    }
}

/// Copy of `message` keeping only its text parts. No-op without images.
pub fn strip_image(message: &ChatMessage) -> ChatMessage {
    let mut stripped = message.clone();
    if let MessageContent::Parts(parts) = &mut stripped.content {
        parts.retain(|p| matches!(p, ContentPart::Text { .. }));
    }
    stripped
}

/// `{"current_app": "<app>"}`
pub fn screen_info(current_app: &str) -> String {
    serde_json::json!({ "current_app": current_app }).to_string()
}

// ── Conversation buffer ───────────────────────────────────────────────────

/// Append-only turn list whose first entry is always the system prompt.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    messages: Vec<ChatMessage>,
}

impl ConversationContext {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![system_message(system_prompt)],
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Drop image payloads from every turn that still carries one.
    pub fn strip_images(&mut self) {
        for message in self.messages.iter_mut().filter(|m| m.has_image()) {
            *message = strip_image(message);
        }
    }

    /// Keep only the system turn.
    pub fn reset(&mut self) {
        self.messages.truncate(1);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn image_count(&self) -> usize {
        self.messages.iter().filter(|m| m.has_image()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shot() -> Screenshot {
        Screenshot {
            base64_data: "AAAA".into(),
            width: 1080,
            height: 1920,
        }
    }

    #[test]
    fn user_turn_with_image_serialises_as_parts() {
        let msg = user_message("hi", Some(&shot()));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"][0]["type"], "image_url");
        assert_eq!(json["content"][0]["image_url"]["url"], "data:image/png;base64,AAAA");
        assert_eq!(json["content"][1], serde_json::json!({"type": "text", "text": "hi"}));
        assert!(json.get("tool_calls").is_none());
    }

    #[test]
    fn stripping_is_idempotent() {
        let msg = user_message("hi", Some(&shot()));
        let once = strip_image(&msg);
        assert!(!once.has_image());
        assert_eq!(once.text(), "hi");
        let twice = strip_image(&once);
        assert_eq!(
            serde_json::to_value(&once).unwrap(),
            serde_json::to_value(&twice).unwrap()
        );
    }

    #[test]
    fn reset_keeps_system_turn() {
        let mut ctx = ConversationContext::new("sys");
        ctx.push(user_message("a", Some(&shot())));
        ctx.push(assistant_message("b", None));
        ctx.push(user_message("c", Some(&shot())));
        assert_eq!(ctx.image_count(), 2);
        ctx.strip_images();
        assert_eq!(ctx.image_count(), 0);
        ctx.reset();
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.messages()[0].role, Role::System);
    }

    #[test]
    fn screen_info_is_json() {
        assert_eq!(screen_info("微信"), r#"{"current_app":"微信"}"#);
    }
}
