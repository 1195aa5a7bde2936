//! Built-in simple actions.

use crate::action::{Invocation, MessageTemplate, Operand, Work};
use crate::logic::Logic;
use async_trait::async_trait;
use conductor_core::{EngineError, EngineResult, ExecutionContext, MessageKind, Value};
use conductor_plan::Condition;
use std::fmt;
use std::sync::Arc;

/// Where a set-value action takes its value from
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSource {
    /// A literal or another field
    Operand(Operand),
    /// An expression over fields
    Expression(Condition),
    /// Nothing; the field is removed
    Remove,
}

/// Sets a field
#[derive(Debug)]
pub struct SetValueWork {
    field: String,
    source: ValueSource,
}

impl SetValueWork {
    /// Create the work
    #[must_use]
    pub fn new(field: impl Into<String>, source: ValueSource) -> Self {
        Self {
            field: field.into(),
            source,
        }
    }
}

#[async_trait]
impl Work for SetValueWork {
    async fn act(&self, ctx: &ExecutionContext, _inv: Invocation<'_>) -> EngineResult<bool> {
        match &self.source {
            ValueSource::Operand(operand) => {
                ctx.set_value(&self.field, operand.value(ctx));
            }
            ValueSource::Expression(expression) => {
                ctx.set_value(&self.field, expression.evaluate(ctx)?);
            }
            ValueSource::Remove => {
                ctx.remove_value(&self.field);
            }
        }
        Ok(true)
    }
}

/// Removes a field; `$name` removes the field whose name is the value of `name`
#[derive(Debug)]
pub struct RemoveValueWork {
    field: String,
}

impl RemoveValueWork {
    /// Create the work
    #[must_use]
    pub fn new(field: impl Into<String>) -> Self {
        Self { field: field.into() }
    }
}

#[async_trait]
impl Work for RemoveValueWork {
    async fn act(&self, ctx: &ExecutionContext, _inv: Invocation<'_>) -> EngineResult<bool> {
        let target = match self.field.strip_prefix('$') {
            Some(indirect) => match ctx.get_value(indirect) {
                Some(Value::Null) | None => {
                    tracing::info!(field = indirect, "no field name to remove");
                    return Ok(true);
                }
                Some(name) => name.to_string(),
            },
            None => self.field.clone(),
        };
        ctx.remove_value(&target);
        Ok(true)
    }
}

/// Renames a sheet
#[derive(Debug)]
pub struct RenameSheetWork {
    from: String,
    to: String,
}

impl RenameSheetWork {
    /// Create the work
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

#[async_trait]
impl Work for RenameSheetWork {
    async fn act(&self, ctx: &ExecutionContext, _inv: Invocation<'_>) -> EngineResult<bool> {
        match ctx.remove_sheet(&self.from) {
            Some(sheet) => {
                ctx.put_sheet(&self.to, sheet);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Adds a catalog message; fails when the message is an error
#[derive(Debug)]
pub struct AddMessageWork {
    template: MessageTemplate,
}

impl AddMessageWork {
    /// Create the work
    #[must_use]
    pub fn new(template: MessageTemplate) -> Self {
        Self { template }
    }
}

#[async_trait]
impl Work for AddMessageWork {
    async fn act(&self, ctx: &ExecutionContext, _inv: Invocation<'_>) -> EngineResult<bool> {
        Ok(ctx.add_message(self.template.render(ctx)) != MessageKind::Error)
    }
}

/// Registered [`Logic`]
pub struct LogicWork {
    action: String,
    logic: Arc<dyn Logic>,
}

impl LogicWork {
    /// Wrap registered logic on behalf of `action`
    #[must_use]
    pub fn new(action: impl Into<String>, logic: Arc<dyn Logic>) -> Self {
        Self {
            action: action.into(),
            logic,
        }
    }
}

impl fmt::Debug for LogicWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicWork").field("action", &self.action).finish()
    }
}

#[async_trait]
impl Work for LogicWork {
    async fn act(&self, ctx: &ExecutionContext, _inv: Invocation<'_>) -> EngineResult<bool> {
        self.logic
            .execute(ctx)
            .await
            .map_err(|e| EngineError::action_failed(&self.action, format!("{e:#}")))
    }
}

/// Sends fields through the messaging session of the run
#[derive(Debug)]
pub struct PublishWork {
    destination: String,
    fields: Vec<String>,
}

impl PublishWork {
    /// Create the work; no fields means all fields
    #[must_use]
    pub fn new(destination: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            destination: destination.into(),
            fields,
        }
    }

    fn payload(&self, ctx: &ExecutionContext) -> serde_json::Value {
        let snapshot = ctx.fields_snapshot();
        let map: serde_json::Map<String, serde_json::Value> = if self.fields.is_empty() {
            snapshot.iter().map(|(k, v)| (k.clone(), to_json(v))).collect()
        } else {
            self.fields
                .iter()
                .map(|f| (f.clone(), snapshot.get(f).map_or(serde_json::Value::Null, to_json)))
                .collect()
        };
        serde_json::Value::Object(map)
    }
}

#[async_trait]
impl Work for PublishWork {
    async fn act(&self, ctx: &ExecutionContext, _inv: Invocation<'_>) -> EngineResult<bool> {
        let Some(session) = ctx.messaging_session() else {
            tracing::warn!(destination = %self.destination, "no messaging session, nothing published");
            return Ok(false);
        };
        session.send(&self.destination, self.payload(ctx)).await?;
        Ok(true)
    }
}

fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Decimal(d) => serde_json::Number::from_f64(*d).map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::Text(s) => serde_json::Value::String(s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::FnLogic;
    use crate::monitor::RunMetrics;
    use conductor_core::{MessageDef, MessagingSetup, MessagingUsage, Sheet};
    use conductor_sim::{MemoryMessaging, ResourceLedger};
    use serde_json::json;

    async fn act(work: &dyn Work, ctx: &ExecutionContext) -> EngineResult<bool> {
        let metrics = RunMetrics::new();
        work.act(ctx, Invocation::new(None, false, &metrics)).await
    }

    #[tokio::test]
    async fn test_set_value_sources() {
        let ctx = ExecutionContext::new("svc").with_value("a", 2).with_value("gone", 1);
        assert!(act(&SetValueWork::new("b", ValueSource::Operand(Operand::parse("$a"))), &ctx).await.unwrap());
        assert_eq!(ctx.get_value("b"), Some(Value::Integer(2)));

        let expr = Condition::compile("s", "a * 10 + 1").unwrap();
        act(&SetValueWork::new("c", ValueSource::Expression(expr)), &ctx).await.unwrap();
        assert_eq!(ctx.get_value("c"), Some(Value::Integer(21)));

        act(&SetValueWork::new("gone", ValueSource::Remove), &ctx).await.unwrap();
        assert!(!ctx.has_value("gone"));
    }

    #[tokio::test]
    async fn test_remove_indirect() {
        let ctx = ExecutionContext::new("svc").with_value("which", "x").with_value("x", 1);
        assert!(act(&RemoveValueWork::new("$which"), &ctx).await.unwrap());
        assert!(!ctx.has_value("x"));
        assert!(ctx.has_value("which"));
        assert!(act(&RemoveValueWork::new("$nothing"), &ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_rename_sheet() {
        let ctx = ExecutionContext::new("svc").with_sheet("a", Sheet::new(["x"]));
        assert!(act(&RenameSheetWork::new("a", "b"), &ctx).await.unwrap());
        assert!(ctx.has_sheet("b"));
        assert!(!ctx.has_sheet("a"));
        assert!(!act(&RenameSheetWork::new("a", "c"), &ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_add_message_fails_on_error_kind() {
        let ctx = ExecutionContext::new("svc").with_value("n", 3);
        let info = MessageTemplate::new(MessageDef::new("i", MessageKind::Info, "{0} items"), vec!["$n".into()]);
        assert!(act(&AddMessageWork::new(info), &ctx).await.unwrap());
        assert_eq!(ctx.messages()[0].text, "3 items");
        let error = MessageTemplate::new(MessageDef::new("e", MessageKind::Error, "no"), Vec::new());
        assert!(!act(&AddMessageWork::new(error), &ctx).await.unwrap());
        assert!(ctx.is_in_error());
    }

    #[tokio::test]
    async fn test_logic_failure_names_action() {
        let logic = FnLogic::new(|_: &ExecutionContext| Err(anyhow::anyhow!("broken")));
        let err = act(&LogicWork::new("calc", Arc::new(logic)), &ExecutionContext::new("svc"))
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::action_failed("calc", "broken"));
    }

    #[tokio::test]
    async fn test_publish_needs_session() {
        let ctx = ExecutionContext::new("svc").with_value("id", 9).with_value("name", "n");
        let publish = PublishWork::new("orders", vec!["id".to_string()]);
        assert!(!act(&publish, &ctx).await.unwrap());

        let ledger = ResourceLedger::new();
        let messaging = MemoryMessaging::new(ledger.clone());
        ctx.set_messaging_session(Some(messaging.borrow_session(MessagingUsage::Shared).await.unwrap()));
        assert!(act(&publish, &ctx).await.unwrap());
        assert!(act(&PublishWork::new("all", Vec::new()), &ctx).await.unwrap());
        assert_eq!(ledger.sent_to("orders"), vec![json!({"id": 9})]);
        assert_eq!(ledger.sent_to("all"), vec![json!({"id": 9, "name": "n"})]);
    }
}
