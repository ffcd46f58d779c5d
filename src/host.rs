use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

use wardrobe_core::error::WardrobeError;
use wardrobe_core::CharacterId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub name: String,
    #[serde(default)]
    pub is_user: bool,
    #[serde(default)]
    pub is_system: bool,
    pub text: String,
}

impl ChatMessage {
    pub fn character(name: &str, text: &str) -> Self {
        ChatMessage {
            name: name.to_string(),
            is_user: false,
            is_system: false,
            text: text.to_string(),
        }
    }

    pub fn user(name: &str, text: &str) -> Self {
        ChatMessage {
            is_user: true,
            ..Self::character(name, text)
        }
    }

    pub fn system(text: &str) -> Self {
        ChatMessage {
            is_system: true,
            ..Self::character("System", text)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterInfo {
    pub id: CharacterId,
    pub name: String,
    /// Extension blob stored on the character record itself.
    #[serde(default)]
    pub extensions: serde_json::Value,
}

/// Everything the tracker needs from the host chat application.
#[async_trait]
pub trait HostContext: Send + Sync {
    fn current_character_id(&self) -> Option<CharacterId>;

    fn character_count(&self) -> usize;

    fn character(&self, id: &str) -> Option<CharacterInfo>;

    fn find_character_by_name(&self, name: &str) -> Option<CharacterId>;

    async fn conversation(&self) -> Result<Vec<ChatMessage>, WardrobeError>;

    async fn write_character_extensions(
        &self,
        id: &str,
        extensions: serde_json::Value,
    ) -> Result<(), WardrobeError>;
}

/// The message an instance id is derived from: the first one not written by
/// the user or the system.
pub fn first_character_message(messages: &[ChatMessage]) -> Option<&ChatMessage> {
    messages.iter().find(|m| !m.is_user && !m.is_system)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostSnapshot {
    #[serde(default)]
    pub characters: Vec<CharacterInfo>,
    #[serde(default)]
    pub current_character_id: Option<CharacterId>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

/// Host backed by plain data; used by the CLI and tests.
#[derive(Default)]
pub struct InMemoryHost {
    state: Mutex<HostSnapshot>,
}

impl InMemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: HostSnapshot) -> Self {
        InMemoryHost {
            state: Mutex::new(snapshot),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, HostSnapshot> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn add_character(&self, id: &str, name: &str) {
        let mut state = self.lock_state();
        state.characters.retain(|c| c.id != id);
        state.characters.push(CharacterInfo {
            id: id.to_string(),
            name: name.to_string(),
            extensions: serde_json::Value::Null,
        });
    }

    pub fn select_character(&self, id: Option<&str>) {
        self.lock_state().current_character_id = id.map(str::to_string);
    }

    pub fn set_messages(&self, messages: Vec<ChatMessage>) {
        self.lock_state().messages = messages;
    }

    pub fn push_message(&self, message: ChatMessage) {
        self.lock_state().messages.push(message);
    }
}

#[async_trait]
impl HostContext for InMemoryHost {
    fn current_character_id(&self) -> Option<CharacterId> {
        self.lock_state().current_character_id.clone()
    }

    fn character_count(&self) -> usize {
        self.lock_state().characters.len()
    }

    fn character(&self, id: &str) -> Option<CharacterInfo> {
        self.lock_state()
            .characters
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    fn find_character_by_name(&self, name: &str) -> Option<CharacterId> {
        let needle = name.trim();
        self.lock_state()
            .characters
            .iter()
            .find(|c| c.name.trim().eq_ignore_ascii_case(needle))
            .map(|c| c.id.clone())
    }

    async fn conversation(&self) -> Result<Vec<ChatMessage>, WardrobeError> {
        Ok(self.lock_state().messages.clone())
    }

    async fn write_character_extensions(
        &self,
        id: &str,
        extensions: serde_json::Value,
    ) -> Result<(), WardrobeError> {
        let mut state = self.lock_state();
        let character = state
            .characters
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| WardrobeError::Host(format!("character {id} not found")))?;
        character.extensions = extensions;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_character_message_skips_user_and_system() {
        let messages = vec![
            ChatMessage::system("Welcome"),
            ChatMessage::user("Me", "Hi"),
            ChatMessage::character("Alice", "Hello there"),
            ChatMessage::character("Alice", "Second"),
        ];
        let first = first_character_message(&messages).unwrap();
        assert_eq!(first.text, "Hello there");
        assert!(first_character_message(&messages[..2]).is_none());
    }

    #[test]
    fn test_find_character_by_name_is_case_insensitive() {
        let host = InMemoryHost::new();
        host.add_character("c1", "Alice");
        host.add_character("c2", "Bob");
        assert_eq!(host.find_character_by_name("alice"), Some("c1".to_string()));
        assert_eq!(host.find_character_by_name("Carol"), None);
        assert_eq!(host.character_count(), 2);
    }

    #[tokio::test]
    async fn test_write_extensions_unknown_character_fails() {
        let host = InMemoryHost::new();
        let err = host
            .write_character_extensions("nope", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, WardrobeError::Host(_)));
    }

    #[test]
    fn test_snapshot_json() {
        let snapshot: HostSnapshot = serde_json::from_str(
            r#"{"characters":[{"id":"c1","name":"Alice"}],"current_character_id":"c1",
                "messages":[{"name":"Alice","text":"Hi"}]}"#,
        )
        .unwrap();
        let host = InMemoryHost::from_snapshot(snapshot);
        assert_eq!(host.current_character_id(), Some("c1".to_string()));
        assert_eq!(host.character("c1").unwrap().extensions, serde_json::Value::Null);
    }
}
