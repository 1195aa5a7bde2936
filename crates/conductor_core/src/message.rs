//! Messages accumulated by a run.

use serde::{Deserialize, Serialize};

/// Severity of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Informational
    Info,
    /// Positive confirmation
    Success,
    /// Something worth attention, not an error
    Warning,
    /// The run is in error once one of these is added
    Error,
}

/// Design-time definition of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDef {
    /// Unique id
    pub id: String,
    /// Severity
    pub kind: MessageKind,
    /// Text with `{0}`, `{1}`.. placeholders
    pub text: String,
}

impl MessageDef {
    /// Create a message definition
    #[must_use]
    pub fn new(id: impl Into<String>, kind: MessageKind, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            text: text.into(),
        }
    }

    /// Format this definition into a message with the given parameters
    #[must_use]
    pub fn format(&self, params: &[String]) -> Message {
        let mut text = self.text.clone();
        for (i, param) in params.iter().enumerate() {
            text = text.replace(&format!("{{{}}}", i), param);
        }
        Message {
            id: self.id.clone(),
            kind: self.kind,
            text,
        }
    }
}

/// A message added to the context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Id of the definition it came from
    pub id: String,
    /// Severity
    pub kind: MessageKind,
    /// Formatted text
    pub text: String,
}

impl Message {
    /// Create an ad hoc message
    #[must_use]
    pub fn new(id: impl Into<String>, kind: MessageKind, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            text: text.into(),
        }
    }

    /// Is this an error?
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.kind == MessageKind::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_placeholders() {
        let def = MessageDef::new("qty", MessageKind::Error, "{0} units of {1} exceed stock of {0}");
        let msg = def.format(&["5".to_string(), "pens".to_string()]);
        assert_eq!(msg.text, "5 units of pens exceed stock of 5");
        assert!(msg.is_error());
    }

    #[test]
    fn test_format_without_params() {
        let def = MessageDef::new("ok", MessageKind::Success, "Saved");
        let msg = def.format(&[]);
        assert_eq!(msg.text, "Saved");
        assert!(!msg.is_error());
    }
}
