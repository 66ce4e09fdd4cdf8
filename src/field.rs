//! Typed message fields and the ordered [`Message`] they form.
//!
//! A [`Message`] is just a `Vec<Field>` with convenience pushers, keeping
//! each field's type explicit instead of relying on an untyped payload.

use serde_json::Value as Json;

/// A single typed field carried by an AMP message.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Field {
    /// Raw bytes.
    Blob(Vec<u8>),
    /// UTF-8 string.
    Str(String),
    /// Signed 64-bit integer.
    Int(i64),
    /// JSON value.
    Json(Json),
}

impl Field {
    /// The field as a string slice, if it is a [`Field::Str`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Field::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The field as a JSON object, if it is a [`Field::Json`] holding an object.
    pub fn as_json(&self) -> Option<&Json> {
        match self {
            Field::Json(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&str> for Field {
    fn from(s: &str) -> Self {
        Field::Str(s.to_string())
    }
}

impl From<String> for Field {
    fn from(s: String) -> Self {
        Field::Str(s)
    }
}

impl From<Vec<u8>> for Field {
    fn from(b: Vec<u8>) -> Self {
        Field::Blob(b)
    }
}

impl From<i64> for Field {
    fn from(i: i64) -> Self {
        Field::Int(i)
    }
}

impl From<Json> for Field {
    fn from(v: Json) -> Self {
        Field::Json(v)
    }
}

/// An ordered sequence of [`Field`]s — the unit exchanged over the wire.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Message(pub Vec<Field>);

impl Message {
    /// An empty message.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Builds a message from an iterator of fields.
    pub fn from_fields(fields: impl IntoIterator<Item = Field>) -> Self {
        Self(fields.into_iter().collect())
    }

    /// Appends a field, returning `self` for chaining.
    pub fn push(mut self, field: impl Into<Field>) -> Self {
        self.0.push(field.into());
        self
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the message carries no fields.
    ///
    /// Such a message is invalid and is dropped by the router.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The first field, if any.
    pub fn first(&self) -> Option<&Field> {
        self.0.first()
    }

    /// Removes and returns the first field.
    pub fn pop_front(&mut self) -> Option<Field> {
        if self.0.is_empty() {
            None
        } else {
            Some(self.0.remove(0))
        }
    }
}

impl IntoIterator for Message {
    type Item = Field;
    type IntoIter = std::vec::IntoIter<Field>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_preserves_order() {
        let msg = Message::new().push("hello").push(Field::Int(42));
        assert_eq!(msg.len(), 2);
        assert_eq!(msg.0[0].as_str(), Some("hello"));
        assert_eq!(msg.0[1], Field::Int(42));
    }

    #[test]
    fn pop_front_detaches_first_field() {
        let mut msg = Message::new().push("topic").push(Field::Blob(vec![1, 2, 3]));
        let first = msg.pop_front().unwrap();
        assert_eq!(first.as_str(), Some("topic"));
        assert_eq!(msg.len(), 1);
    }

    #[test]
    fn empty_message_has_no_first_field() {
        let msg = Message::new();
        assert!(msg.is_empty());
        assert!(msg.first().is_none());
    }
}
