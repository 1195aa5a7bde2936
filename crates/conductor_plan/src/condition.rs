//! Boolean and value expressions over the fields of a context.
//!
//! Expressions use the jinja expression language (`qty > 0 and status == "open"`).
//! Syntax is checked when an action is prepared, so errors surface before a
//! run starts. Only the source is kept; every evaluation compiles it again
//! and runs it against a fresh view of the fields.

use conductor_core::{EngineError, EngineResult, ExecutionContext, Value};
use minijinja::value::{Value as JinjaValue, ValueKind};
use minijinja::Environment;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;

static ENV: Lazy<Environment<'static>> = Lazy::new(Environment::new);

/// A syntax-checked expression
#[derive(Clone, PartialEq, Eq)]
pub struct Condition {
    source: String,
}

impl Condition {
    /// Check that `source` compiles, on behalf of `action`
    ///
    /// # Errors
    ///
    /// Returns error if the expression does not compile
    pub fn compile(action: &str, source: &str) -> EngineResult<Self> {
        ENV.compile_expression(source)
            .map_err(|e| EngineError::InvalidCondition {
                action: action.to_string(),
                expression: source.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            source: source.to_string(),
        })
    }

    /// Source text
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate as a boolean
    ///
    /// # Errors
    ///
    /// Returns error if evaluation fails
    pub fn is_true(&self, ctx: &ExecutionContext) -> EngineResult<bool> {
        Ok(self.eval(ctx)?.is_true())
    }

    /// Evaluate to a field value
    ///
    /// # Errors
    ///
    /// Returns error if evaluation fails
    pub fn evaluate(&self, ctx: &ExecutionContext) -> EngineResult<Value> {
        Ok(from_jinja(&self.eval(ctx)?))
    }

    fn eval(&self, ctx: &ExecutionContext) -> EngineResult<JinjaValue> {
        let expr = ENV.compile_expression(&self.source).map_err(|e| self.failure(e))?;
        let fields: HashMap<String, JinjaValue> = ctx
            .fields_snapshot()
            .into_iter()
            .map(|(name, value)| (name, to_jinja(&value)))
            .collect();
        expr.eval(JinjaValue::from_object(fields)).map_err(|e| self.failure(e))
    }

    fn failure(&self, err: minijinja::Error) -> EngineError {
        EngineError::Evaluation {
            expression: self.source.clone(),
            reason: err.to_string(),
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Condition({})", self.source)
    }
}

fn to_jinja(value: &Value) -> JinjaValue {
    match value {
        Value::Null => JinjaValue::from(()),
        Value::Boolean(b) => JinjaValue::from(*b),
        Value::Integer(i) => JinjaValue::from(*i),
        Value::Decimal(d) => JinjaValue::from(*d),
        Value::Text(s) => JinjaValue::from(s.as_str()),
    }
}

fn from_jinja(value: &JinjaValue) -> Value {
    match value.kind() {
        ValueKind::Undefined | ValueKind::None => Value::Null,
        ValueKind::Bool => Value::Boolean(value.is_true()),
        ValueKind::Number => match value.as_i64() {
            Some(i) if value.is_integer() => Value::Integer(i),
            _ => f64::try_from(value.clone()).map_or_else(|_| Value::Text(value.to_string()), Value::Decimal),
        },
        ValueKind::String => Value::Text(value.as_str().unwrap_or_default().to_string()),
        _ => Value::Text(value.to_string()),
    }
}
