//! Channel-level types shared across the engine
//!
//! Inbound events are the normalized form of whatever the chat transport
//! delivers; outbound messages are what the engine hands back to the
//! channel adapter. `VariableMap` is the variable bag carried by sessions
//! and group sessions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Identifier of a chat (conversation) on the channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub String);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a chat user on the channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Media attached to an inbound event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// Media type as reported by the channel ("photo", "document", ...)
    pub media_type: String,
    /// Channel-resolvable location of the media
    pub url: String,
}

/// A normalized inbound chat event delivered by the channel adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Chat the event originated from
    pub chat_id: ChatId,
    /// User who produced the event
    pub user_id: UserId,
    /// Free text, if the event carried any
    #[serde(default)]
    pub text: Option<String>,
    /// Keyboard selection value, if the event was a button press
    #[serde(default)]
    pub selection: Option<String>,
    /// Attached media
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl InboundEvent {
    /// Create a plain text message event
    pub fn message(chat_id: impl Into<String>, user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            chat_id: ChatId(chat_id.into()),
            user_id: UserId(user_id.into()),
            text: Some(text.into()),
            selection: None,
            attachments: Vec::new(),
        }
    }

    /// Create a keyboard selection event
    pub fn selection(chat_id: impl Into<String>, user_id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            chat_id: ChatId(chat_id.into()),
            user_id: UserId(user_id.into()),
            text: None,
            selection: Some(value.into()),
            attachments: Vec::new(),
        }
    }

    /// The payload a flow should react to: a selection takes precedence
    /// over free text.
    #[inline]
    pub fn payload_text(&self) -> Option<&str> {
        self.selection.as_deref().or(self.text.as_deref())
    }
}

/// One button on a reply keyboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyboardButton {
    /// Label shown to the user
    pub label: String,
    /// Value reported back on selection; defaults to the label
    #[serde(default)]
    pub value: Option<String>,
}

/// A reply keyboard as rows of buttons
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Keyboard {
    /// Button rows, top to bottom
    pub rows: Vec<Vec<KeyboardButton>>,
}

/// Body of an outbound message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessageBody {
    /// Plain text
    Text(String),
    /// Media by location, with an optional caption
    Media {
        /// Channel-resolvable location of the media
        url: String,
        /// Optional caption
        caption: Option<String>,
    },
}

/// An outbound send request handed to the channel adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Destination chat
    pub chat_id: ChatId,
    /// Message body
    pub body: MessageBody,
    /// Optional reply keyboard
    #[serde(default)]
    pub keyboard: Option<Keyboard>,
}

impl OutboundMessage {
    /// Create a text message
    pub fn text(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            body: MessageBody::Text(text.into()),
            keyboard: None,
        }
    }

    /// Create a media message
    pub fn media(chat_id: ChatId, url: impl Into<String>, caption: Option<String>) -> Self {
        Self {
            chat_id,
            body: MessageBody::Media {
                url: url.into(),
                caption,
            },
            keyboard: None,
        }
    }

    /// Attach a keyboard
    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }
}

/// Variable bag for sessions and group sessions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableMap(HashMap<String, Value>);

impl VariableMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// Get a variable by name
    #[inline]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Get a variable as a string slice
    #[inline]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|v| v.as_str())
    }

    /// Get a variable as a float
    #[inline]
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.0.get(name).and_then(|v| v.as_f64())
    }

    /// Get a variable as a boolean
    #[inline]
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.0.get(name).and_then(|v| v.as_bool())
    }

    /// Set a variable
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    /// Remove a variable, returning its previous value
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    /// Whether a variable is present
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Number of variables
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over entries
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Render `{name}` placeholders in a template from this map alone.
    /// Unknown placeholders are left as written.
    pub fn render(&self, template: &str) -> String {
        render_template(template, |name| self.get(name).cloned())
    }
}

impl From<HashMap<String, Value>> for VariableMap {
    fn from(map: HashMap<String, Value>) -> Self {
        Self(map)
    }
}

/// Render `{name}` placeholders in `template`, resolving each name through
/// `lookup`. Placeholder names are `[A-Za-z0-9_.]+`; anything else in braces
/// is passed through untouched, as are unresolved names.
pub fn render_template<F>(template: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<Value>,
{
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        if c != '{' {
            out.push(c);
            continue;
        }
        let mut end = None;
        for (i, c2) in template[start + 1..].char_indices() {
            match c2 {
                '}' => {
                    end = Some(start + 1 + i);
                    break;
                }
                c2 if c2.is_ascii_alphanumeric() || c2 == '_' || c2 == '.' => {}
                _ => break,
            }
        }
        match end {
            Some(end) if end > start + 1 => {
                let name = &template[start + 1..end];
                match lookup(name) {
                    Some(value) => out.push_str(&value_to_text(&value)),
                    None => out.push_str(&template[start..=end]),
                }
                // skip past the placeholder
                while let Some((i, _)) = chars.peek() {
                    if *i > end {
                        break;
                    }
                    chars.next();
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Human-readable form of a variable value for message rendering
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
