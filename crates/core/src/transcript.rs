//! Chat transcript state.
//!
//! A [`Transcript`] is the ordered list of messages owned by one chat session. It only
//! changes through the transition methods below, and every appended message gets a
//! [`MessageId`] handle so the streaming reply can be updated without looking up "the
//! last element".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Text of the system message that replaces the transcript on restart
pub const RESTART_NOTICE: &str = "Conversation restarted. A new conversation has begun.";

/// The role of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Handle to a message inside a [`Transcript`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(u64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "msg-{}", self.0)
    }
}

/// A single transcript entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Assigned by the transcript on append
    pub id: Option<MessageId>,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// True while the assistant reply is still being appended to
    pub is_streaming: bool,
    /// True if the entry reports a failure
    pub is_error: bool,
}

impl Message {
    fn new(role: Role, text: impl Into<String>) -> Self {
        Self { id: None, role, text: text.into(), timestamp: Utc::now(), is_streaming: false, is_error: false }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Empty assistant message that the stream will fill in
    pub fn assistant_placeholder() -> Self {
        Self { is_streaming: true, ..Self::new(Role::Assistant, String::new()) }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    /// System message surfacing a failure
    pub fn error(text: impl Into<String>) -> Self {
        Self { is_error: true, ..Self::new(Role::System, text) }
    }

    /// An assistant placeholder that has not received any text yet
    pub fn is_unfilled_placeholder(&self) -> bool {
        self.role == Role::Assistant && self.text.is_empty()
    }
}

/// Ordered, append-mostly message list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    messages: Vec<Message>,
    next_id: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and return its handle.
    ///
    /// Fails when a streaming message is appended while another one is still streaming.
    pub fn append(&mut self, mut message: Message) -> Result<MessageId> {
        if message.is_streaming && self.streaming_count() > 0 {
            return Err(Error::Validation(
                "a streaming reply is already in progress".to_string(),
            ));
        }

        let id = MessageId(self.next_id);
        self.next_id += 1;
        message.id = Some(id);
        self.messages.push(message);
        Ok(id)
    }

    /// Replace the full text of a message
    pub fn update_text(&mut self, id: MessageId, text: impl Into<String>) -> Result<()> {
        let message = self.get_mut(id)?;
        message.text = text.into();
        Ok(())
    }

    /// Mark a message as final
    pub fn finish(&mut self, id: MessageId) -> Result<()> {
        let message = self.get_mut(id)?;
        message.is_streaming = false;
        Ok(())
    }

    pub fn remove(&mut self, id: MessageId) -> Option<Message> {
        let index = self.position(id)?;
        Some(self.messages.remove(index))
    }

    /// Reset the transcript to a single message
    pub fn replace_all(&mut self, message: Message) -> MessageId {
        self.messages.clear();
        let id = MessageId(self.next_id);
        self.next_id += 1;
        self.messages.push(Message { id: Some(id), ..message });
        id
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == Some(id))
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of messages currently flagged as streaming (0 or 1)
    pub fn streaming_count(&self) -> usize {
        self.messages.iter().filter(|message| message.is_streaming).count()
    }

    /// A destructive restart must be confirmed once the transcript holds more than one message
    pub fn needs_restart_confirmation(&self) -> bool {
        self.messages.len() > 1
    }

    fn position(&self, id: MessageId) -> Option<usize> {
        self.messages.iter().position(|message| message.id == Some(id))
    }

    fn get_mut(&mut self, id: MessageId) -> Result<&mut Message> {
        self.messages
            .iter_mut()
            .find(|message| message.id == Some(id))
            .ok_or_else(|| Error::Validation(format!("unknown message: {}", id)))
    }
}
