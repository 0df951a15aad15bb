use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identifier::Identifier;

/// A literal or a reference held by managed-object state.
///
/// Values are totally ordered so they can key sorted collections.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Char(char),
    Str(String),
    Bytes(Vec<u8>),
    /// Reference to another managed object.
    Ref(Identifier),
}

impl Value {
    /// The referenced identifier, if this value is a reference.
    pub fn as_ref_id(&self) -> Option<Identifier> {
        match self {
            Value::Ref(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Char(c) => write!(f, "'{c}'"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Ref(id) => write!(f, "@{id}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Identifier> for Value {
    fn from(id: Identifier) -> Self {
        Value::Ref(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_extraction() {
        assert_eq!(Value::Ref(Identifier::new(9)).as_ref_id(), Some(Identifier::new(9)));
        assert_eq!(Value::Int(9).as_ref_id(), None);
    }

    #[test]
    fn display_forms() {
        assert_eq!(Value::from("k").to_string(), "\"k\"");
        assert_eq!(Value::from(Identifier::new(3)).to_string(), "@3");
        assert_eq!(Value::Bytes(vec![0; 4]).to_string(), "<4 bytes>");
    }
}
