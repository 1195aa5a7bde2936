//! Scalar values carried in fields and sheet cells.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A scalar value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent/unknown
    #[default]
    Null,
    /// Boolean
    Boolean(bool),
    /// Whole number
    Integer(i64),
    /// Decimal number
    Decimal(f64),
    /// Text
    Text(String),
}

impl Value {
    /// Create a text value
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Is this null?
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Interpret as a boolean.
    ///
    /// Numbers are true when non-zero; text is true for `true`, `1`, `y` and `yes`.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Boolean(b) => *b,
            Self::Integer(i) => *i != 0,
            Self::Decimal(d) => *d != 0.0,
            Self::Text(s) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "y" | "yes"
            ),
        }
    }

    /// Parse a design-time literal: booleans and numbers are recognised, everything else is text
    #[must_use]
    pub fn parse_literal(text: &str) -> Self {
        let trimmed = text.trim();
        match trimmed {
            "true" => return Self::Boolean(true),
            "false" => return Self::Boolean(false),
            _ => {}
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Self::Integer(i);
        }
        if let Ok(d) = trimmed.parse::<f64>() {
            if d.is_finite() {
                return Self::Decimal(d);
            }
        }
        Self::Text(text.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Decimal(d) => write!(f, "{}", d),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Self::Decimal(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}
