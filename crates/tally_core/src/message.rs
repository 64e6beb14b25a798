//! Validation and status messages.

use std::fmt;

/// Severity of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Blocks saving.
    Error,
    /// Reported but does not block saving.
    Warning,
    /// Informational.
    Info,
}

impl MessageKind {
    /// Returns the single-letter code: `E`, `W` or `I`.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Error => "E",
            Self::Warning => "W",
            Self::Info => "I",
        }
    }
}

/// Marks a persistent row message that is raised and cleared by the engine
/// rather than by field validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTag {
    /// The row lock could not be obtained or the row changed underneath.
    LockFailure,
    /// The row's key collides with a stored record.
    DuplicateKey,
}

/// A single message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Severity.
    pub kind: MessageKind,
    /// Text shown to the user.
    pub text: String,
    /// Field the message is about, if any.
    pub field: Option<String>,
    /// Engine tag for persistent row messages.
    pub tag: Option<MessageTag>,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// An ordered list of messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageList {
    messages: Vec<Message>,
}

impl MessageList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message.
    pub fn add(&mut self, kind: MessageKind, text: impl Into<String>) {
        self.messages.push(Message {
            kind,
            text: text.into(),
            field: None,
            tag: None,
        });
    }

    /// Appends an error.
    pub fn error(&mut self, text: impl Into<String>) {
        self.add(MessageKind::Error, text);
    }

    /// Appends a warning.
    pub fn warning(&mut self, text: impl Into<String>) {
        self.add(MessageKind::Warning, text);
    }

    /// Raises the tagged error, replacing any earlier message with the same tag.
    pub fn set_tagged(&mut self, tag: MessageTag, field: Option<&str>, text: impl Into<String>) {
        self.remove_tagged(tag);
        self.messages.push(Message {
            kind: MessageKind::Error,
            text: text.into(),
            field: field.map(str::to_string),
            tag: Some(tag),
        });
    }

    /// Clears the tagged message. Returns true if one was present.
    pub fn remove_tagged(&mut self, tag: MessageTag) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.tag != Some(tag));
        before != self.messages.len()
    }

    /// Returns the tagged message, if raised.
    #[must_use]
    pub fn tagged(&self, tag: MessageTag) -> Option<&Message> {
        self.messages.iter().find(|m| m.tag == Some(tag))
    }

    /// Returns true if the tagged message is raised.
    #[must_use]
    pub fn has_tag(&self, tag: MessageTag) -> bool {
        self.tagged(tag).is_some()
    }

    /// Removes every message.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Returns true if any message is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|m| m.kind == MessageKind::Error)
    }

    /// Returns true if a message has exactly this text.
    #[must_use]
    pub fn contains(&self, text: &str) -> bool {
        self.messages.iter().any(|m| m.text == text)
    }

    /// Iterates over the messages.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Returns the number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns true if there are no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl fmt::Display for MessageList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let texts: Vec<&str> = self.messages.iter().map(|m| m.text.as_str()).collect();
        f.write_str(&texts.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_messages_replace_and_clear() {
        let mut list = MessageList::new();
        list.set_tagged(MessageTag::DuplicateKey, Some("id"), "first");
        list.set_tagged(MessageTag::DuplicateKey, Some("id"), "second");
        assert_eq!(list.len(), 1);
        assert_eq!(list.tagged(MessageTag::DuplicateKey).unwrap().text, "second");
        assert!(list.has_errors());

        assert!(list.remove_tagged(MessageTag::DuplicateKey));
        assert!(!list.remove_tagged(MessageTag::DuplicateKey));
        assert!(list.is_empty());
    }

    #[test]
    fn warnings_do_not_count_as_errors() {
        let mut list = MessageList::new();
        list.warning("check this");
        assert!(!list.has_errors());
        list.error("mandatory");
        assert!(list.has_errors());
        assert_eq!(list.to_string(), "check this; mandatory");
    }
}
