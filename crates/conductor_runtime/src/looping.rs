//! Loop actions.
//!
//! A loop either walks the rows of a sheet, exposing columns as fields for
//! each pass, or repeats while a condition holds. Break-loop ends the loop,
//! next-loop ends the pass, stop ends the run. The body cannot jump out.

use crate::action::{Container, Invocation};
use crate::block::ActionBlock;
use async_trait::async_trait;
use conductor_core::{EngineError, EngineResult, ExecutionContext, Signal, Value};
use conductor_plan::Condition;

/// Column or field names, or all of them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSelection {
    /// Every column of the sheet
    All,
    /// Only these names
    Named(Vec<String>),
}

impl FieldSelection {
    /// A single `*` selects all columns
    #[must_use]
    pub fn from_names(names: Vec<String>) -> Self {
        if names.len() == 1 && names[0] == "*" {
            Self::All
        } else {
            Self::Named(names)
        }
    }

    fn names(&self, columns: &[String]) -> Vec<String> {
        match self {
            Self::All => columns.to_vec(),
            Self::Named(names) => names.clone(),
        }
    }
}

/// What drives the passes of a loop
#[derive(Debug)]
pub enum LoopMode {
    /// One pass per row of a sheet
    Sheet {
        /// Sheet to iterate
        sheet: String,
        /// Columns copied to fields before each pass; none when absent
        columns: Option<FieldSelection>,
        /// Fields copied back into the row after each pass
        copy_back: Option<FieldSelection>,
    },
    /// Passes while the condition holds; forever when absent
    Condition(Option<Condition>),
}

/// Repeats a block
#[derive(Debug)]
pub struct LoopAction {
    name: String,
    mode: LoopMode,
    break_on_interrupt: bool,
    body: ActionBlock,
}

impl LoopAction {
    /// Create a loop
    #[must_use]
    pub fn new(name: impl Into<String>, mode: LoopMode, body: ActionBlock) -> Self {
        Self {
            name: name.into(),
            mode,
            break_on_interrupt: false,
            body,
        }
    }

    /// End the loop when the context is cancelled
    #[must_use]
    pub fn with_break_on_interrupt(mut self, enabled: bool) -> Self {
        self.break_on_interrupt = enabled;
        self
    }

    fn interrupted(&self, ctx: &ExecutionContext) -> bool {
        if self.break_on_interrupt && ctx.is_cancelled() {
            tracing::info!(action = %self.name, "loop interrupted");
            return true;
        }
        false
    }

    /// Map the signal of one pass; `None` means go on with the next pass
    fn after_pass(&self, signal: Signal) -> EngineResult<Option<Signal>> {
        match signal {
            Signal::Continue | Signal::NextLoop => Ok(None),
            Signal::BreakLoop => Ok(Some(Signal::Continue)),
            Signal::Stop => Ok(Some(Signal::Stop)),
            Signal::JumpTo(_) => Err(EngineError::JumpOutOfLoop {
                loop_name: self.name.clone(),
            }),
        }
    }

    async fn run_while(
        &self,
        condition: Option<&Condition>,
        ctx: &ExecutionContext,
        inv: Invocation<'_>,
    ) -> EngineResult<Signal> {
        loop {
            if let Some(condition) = condition {
                if !condition.is_true(ctx)? {
                    return Ok(Signal::Continue);
                }
            }
            if self.interrupted(ctx) {
                return Ok(Signal::Continue);
            }
            inv.metrics().record_loop_pass();
            let signal = self.body.execute(ctx, inv).await?;
            if let Some(signal) = self.after_pass(signal)? {
                return Ok(signal);
            }
        }
    }

    async fn run_sheet(
        &self,
        sheet: &str,
        columns: Option<&FieldSelection>,
        copy_back: Option<&FieldSelection>,
        ctx: &ExecutionContext,
        inv: Invocation<'_>,
    ) -> EngineResult<Signal> {
        let Some(sheet_columns) = ctx.read_sheet(sheet, |s| s.columns().to_vec()) else {
            tracing::info!(action = %self.name, sheet, "loop skipped, sheet not found");
            return Ok(Signal::Continue);
        };
        if ctx.nbr_rows_in_sheet(sheet) == 0 {
            tracing::info!(action = %self.name, sheet, "loop skipped, sheet has no rows");
            return Ok(Signal::Continue);
        }
        let _guard = ctx.start_iteration(sheet)?;

        let fields = columns.map(|c| c.names(&sheet_columns)).unwrap_or_default();
        let saved: Vec<(String, Option<Value>)> = fields
            .iter()
            .map(|f| (f.clone(), ctx.get_value(f)))
            .collect();

        let result = self.pass_rows(sheet, &fields, copy_back, ctx, inv).await;

        for (field, value) in saved {
            match value {
                Some(value) => {
                    ctx.set_value(&field, value);
                }
                None => {
                    ctx.remove_value(&field);
                }
            }
        }
        result
    }

    async fn pass_rows(
        &self,
        sheet: &str,
        fields: &[String],
        copy_back: Option<&FieldSelection>,
        ctx: &ExecutionContext,
        inv: Invocation<'_>,
    ) -> EngineResult<Signal> {
        let mut row = 0;
        while row < ctx.nbr_rows_in_sheet(sheet) {
            if self.interrupted(ctx) {
                return Ok(Signal::Continue);
            }
            inv.metrics().record_loop_pass();
            let values: Vec<Option<Value>> = ctx
                .read_sheet(sheet, |s| {
                    fields.iter().map(|f| s.column_value(f, row).cloned()).collect()
                })
                .unwrap_or_default();
            for (field, value) in fields.iter().zip(values) {
                match value {
                    Some(value) => {
                        ctx.set_value(field, value);
                    }
                    None => {
                        ctx.remove_value(field);
                    }
                }
            }

            let signal = self.body.execute(ctx, inv).await?;

            if let Some(selection) = copy_back {
                copy_fields_to_row(ctx, sheet, selection, row);
            }
            if let Some(signal) = self.after_pass(signal)? {
                return Ok(signal);
            }
            row += 1;
        }
        Ok(Signal::Continue)
    }
}

fn copy_fields_to_row(ctx: &ExecutionContext, sheet: &str, selection: &FieldSelection, row: usize) {
    ctx.update_sheet(sheet, |s| {
        for field in selection.names(s.columns()) {
            let value = ctx.get_value(&field).unwrap_or_default();
            s.set_column_value(&field, row, value);
        }
    });
}

#[async_trait]
impl Container for LoopAction {
    async fn run(&self, ctx: &ExecutionContext, inv: Invocation<'_>) -> EngineResult<Signal> {
        match &self.mode {
            LoopMode::Sheet {
                sheet,
                columns,
                copy_back,
            } => {
                self.run_sheet(sheet, columns.as_ref(), copy_back.as_ref(), ctx, inv)
                    .await
            }
            LoopMode::Condition(condition) => self.run_while(condition.as_ref(), ctx, inv).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ActionHeader};
    use crate::block::tests::{trace_of, traced, traced_with};
    use crate::monitor::RunMetrics;
    use conductor_core::Sheet;

    fn orders() -> Sheet {
        Sheet::new(["id", "qty"])
            .with_row(vec![Value::text("a"), Value::Integer(1)])
            .with_row(vec![Value::text("b"), Value::Integer(2)])
            .with_row(vec![Value::text("c"), Value::Integer(3)])
    }

    fn sheet_loop(body: Vec<Action>, copy_back: Option<FieldSelection>) -> LoopAction {
        copying_loop(Some(FieldSelection::All), body, copy_back)
    }

    fn copying_loop(columns: Option<FieldSelection>, body: Vec<Action>, copy_back: Option<FieldSelection>) -> LoopAction {
        LoopAction::new(
            "each",
            LoopMode::Sheet {
                sheet: "orders".to_string(),
                columns,
                copy_back,
            },
            ActionBlock::new("each", body),
        )
    }

    /// Appends the current id to the trace
    #[derive(Debug)]
    struct Visit;

    #[async_trait]
    impl crate::action::Work for Visit {
        async fn act(&self, ctx: &ExecutionContext, _inv: Invocation<'_>) -> EngineResult<bool> {
            let trace = trace_of(ctx);
            let id = ctx.get_value("id").map(|v| v.to_string()).unwrap_or_default();
            ctx.set_value("trace", format!("{}{}", trace, id));
            Ok(true)
        }
    }

    fn visit(header: ActionHeader) -> Action {
        Action::new(header, crate::action::Body::Simple(Box::new(Visit)))
    }

    #[tokio::test]
    async fn test_rows_become_fields_and_are_restored() {
        let ctx = ExecutionContext::new("svc")
            .with_sheet("orders", orders())
            .with_value("id", "outer");
        let metrics = RunMetrics::new();
        let looped = sheet_loop(vec![visit(ActionHeader::named("v"))], None);
        let signal = looped.run(&ctx, Invocation::new(None, false, &metrics)).await.unwrap();
        assert_eq!(signal, Signal::Continue);
        assert_eq!(trace_of(&ctx), "abc");
        assert_eq!(ctx.get_value("id"), Some(Value::text("outer")));
        assert!(!ctx.has_value("qty"));
        assert_eq!(metrics.snapshot().loop_passes, 3);
    }

    #[tokio::test]
    async fn test_columns_are_copied_only_when_selected() {
        let ctx = ExecutionContext::new("svc")
            .with_sheet("orders", orders())
            .with_value("id", "outer");
        let metrics = RunMetrics::new();
        let looped = copying_loop(None, vec![visit(ActionHeader::named("v"))], None);
        looped.run(&ctx, Invocation::new(None, false, &metrics)).await.unwrap();
        assert_eq!(trace_of(&ctx), "outerouterouter");
        assert!(!ctx.has_value("qty"));
        assert_eq!(metrics.snapshot().loop_passes, 3);

        ctx.set_value("trace", "");
        let named = FieldSelection::Named(vec!["qty".to_string()]);
        let looped = copying_loop(Some(named), vec![visit(ActionHeader::named("v"))], None);
        looped.run(&ctx, Invocation::new(None, false, &metrics)).await.unwrap();
        assert_eq!(trace_of(&ctx), "outerouterouter");
        assert!(!ctx.has_value("qty"));
    }

    #[tokio::test]
    async fn test_next_loop_on_second_row_still_visits_all_rows() {
        let ctx = ExecutionContext::new("svc").with_sheet("orders", orders());
        let metrics = RunMetrics::new();
        let skip = ActionHeader {
            condition: Some(Condition::compile("skip", "id == 'b'").unwrap()),
            success_jump: Some(Signal::NextLoop),
            post_processing: true,
            ..ActionHeader::named("skip")
        };
        let looped = sheet_loop(vec![traced_with(skip, true), visit(ActionHeader::named("v"))], None);
        looped.run(&ctx, Invocation::new(None, false, &metrics)).await.unwrap();
        assert_eq!(trace_of(&ctx), "askipc");
        assert_eq!(metrics.snapshot().loop_passes, 3);
    }

    #[tokio::test]
    async fn test_break_loop_is_contained() {
        let ctx = ExecutionContext::new("svc").with_sheet("orders", orders());
        let metrics = RunMetrics::new();
        let stop_at_b = ActionHeader {
            condition: Some(Condition::compile("brk", "id == 'b'").unwrap()),
            success_jump: Some(Signal::BreakLoop),
            post_processing: true,
            ..ActionHeader::named("brk")
        };
        let looped = sheet_loop(vec![visit(ActionHeader::named("v")), traced_with(stop_at_b, true)], None);
        let signal = looped.run(&ctx, Invocation::new(None, false, &metrics)).await.unwrap();
        assert_eq!(signal, Signal::Continue);
        assert_eq!(trace_of(&ctx), "abbrk");
    }

    #[tokio::test]
    async fn test_stop_propagates() {
        let ctx = ExecutionContext::new("svc").with_sheet("orders", orders());
        let metrics = RunMetrics::new();
        let stop = ActionHeader {
            success_jump: Some(Signal::Stop),
            post_processing: true,
            ..ActionHeader::named("x")
        };
        let looped = sheet_loop(vec![traced_with(stop, true)], None);
        let signal = looped.run(&ctx, Invocation::new(None, false, &metrics)).await.unwrap();
        assert_eq!(signal, Signal::Stop);
        assert_eq!(trace_of(&ctx), "x");
    }

    #[tokio::test]
    async fn test_jump_out_of_loop_is_error() {
        let ctx = ExecutionContext::new("svc").with_sheet("orders", orders());
        let metrics = RunMetrics::new();
        let jump = ActionHeader {
            success_jump: Some(Signal::JumpTo(5)),
            post_processing: true,
            ..ActionHeader::named("x")
        };
        // a jump the body cannot bind surfaces before the loop sees it
        let looped = sheet_loop(vec![traced_with(jump, true)], None);
        let err = looped.run(&ctx, Invocation::new(None, false, &metrics)).await.unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(looped.after_pass(Signal::JumpTo(0)).unwrap_err(), EngineError::JumpOutOfLoop {
            loop_name: "each".to_string(),
        });
    }

    #[tokio::test]
    async fn test_copy_back_writes_rows() {
        /// Doubles qty
        #[derive(Debug)]
        struct Double;

        #[async_trait]
        impl crate::action::Work for Double {
            async fn act(&self, ctx: &ExecutionContext, _inv: Invocation<'_>) -> EngineResult<bool> {
                if let Some(Value::Integer(q)) = ctx.get_value("qty") {
                    ctx.set_value("qty", q * 2);
                }
                ctx.set_value("seen", true);
                Ok(true)
            }
        }

        let ctx = ExecutionContext::new("svc").with_sheet("orders", orders());
        let metrics = RunMetrics::new();
        let looped = sheet_loop(
            vec![Action::new(ActionHeader::named("d"), crate::action::Body::Simple(Box::new(Double)))],
            Some(FieldSelection::Named(vec!["qty".to_string(), "seen".to_string()])),
        );
        looped.run(&ctx, Invocation::new(None, false, &metrics)).await.unwrap();
        let sheet = ctx.sheet("orders").unwrap();
        assert_eq!(sheet.column_value("qty", 2), Some(&Value::Integer(6)));
        assert_eq!(sheet.column_value("seen", 0), Some(&Value::Boolean(true)));
        assert!(!ctx.has_value("qty"));
    }

    #[tokio::test]
    async fn test_copy_back_into_short_rows_of_loaded_sheet() {
        let sheet: Sheet = serde_json::from_str(r#"{"columns": ["id", "qty"], "rows": [["a"], ["b"]]}"#).unwrap();
        let ctx = ExecutionContext::new("svc").with_sheet("orders", sheet).with_value("qty", 7);
        let metrics = RunMetrics::new();
        let looped = copying_loop(
            Some(FieldSelection::Named(vec!["id".to_string()])),
            vec![visit(ActionHeader::named("v"))],
            Some(FieldSelection::Named(vec!["qty".to_string()])),
        );
        looped.run(&ctx, Invocation::new(None, false, &metrics)).await.unwrap();
        let sheet = ctx.sheet("orders").unwrap();
        assert_eq!(sheet.column_value("qty", 0), Some(&Value::Integer(7)));
        assert_eq!(sheet.column_value("qty", 1), Some(&Value::Integer(7)));
        assert_eq!(trace_of(&ctx), "ab");
    }

    #[tokio::test]
    async fn test_empty_or_missing_sheet_skips() {
        let ctx = ExecutionContext::new("svc").with_sheet("orders", Sheet::new(["id"]));
        let metrics = RunMetrics::new();
        let looped = sheet_loop(vec![traced("x", true)], None);
        looped.run(&ctx, Invocation::new(None, false, &metrics)).await.unwrap();
        ctx.remove_sheet("orders");
        looped.run(&ctx, Invocation::new(None, false, &metrics)).await.unwrap();
        assert_eq!(trace_of(&ctx), "");
        assert_eq!(metrics.snapshot().loop_passes, 0);
    }

    #[tokio::test]
    async fn test_nested_loop_over_same_sheet_fails() {
        let ctx = ExecutionContext::new("svc").with_sheet("orders", orders());
        let metrics = RunMetrics::new();
        let inner = Action::new(
            ActionHeader::named("inner"),
            crate::action::Body::Container(Box::new(sheet_loop(vec![traced("x", true)], None))),
        );
        let outer = sheet_loop(vec![inner], None);
        let err = outer.run(&ctx, Invocation::new(None, false, &metrics)).await.unwrap_err();
        assert!(matches!(err, EngineError::SheetAlreadyIterating { .. }));
        // the mark is cleared once the outer loop is done
        assert!(ctx.start_iteration("orders").is_ok());
    }

    #[tokio::test]
    async fn test_while_condition() {
        /// Increments n
        #[derive(Debug)]
        struct Incr;

        #[async_trait]
        impl crate::action::Work for Incr {
            async fn act(&self, ctx: &ExecutionContext, _inv: Invocation<'_>) -> EngineResult<bool> {
                let n = match ctx.get_value("n") {
                    Some(Value::Integer(n)) => n,
                    _ => 0,
                };
                ctx.set_value("n", n + 1);
                Ok(true)
            }
        }

        let ctx = ExecutionContext::new("svc").with_value("n", 0);
        let metrics = RunMetrics::new();
        let looped = LoopAction::new(
            "while",
            LoopMode::Condition(Some(Condition::compile("while", "n < 4").unwrap())),
            ActionBlock::new(
                "while",
                vec![Action::new(ActionHeader::named("i"), crate::action::Body::Simple(Box::new(Incr)))],
            ),
        );
        looped.run(&ctx, Invocation::new(None, false, &metrics)).await.unwrap();
        assert_eq!(ctx.get_value("n"), Some(Value::Integer(4)));
        assert_eq!(metrics.snapshot().loop_passes, 4);
    }

    #[tokio::test]
    async fn test_interrupt_ends_unbounded_loop() {
        let ctx = ExecutionContext::new("svc");
        ctx.cancellation_token().cancel();
        let metrics = RunMetrics::new();
        let looped = LoopAction::new(
            "forever",
            LoopMode::Condition(None),
            ActionBlock::new("forever", vec![traced("x", true)]),
        )
        .with_break_on_interrupt(true);
        let signal = looped.run(&ctx, Invocation::new(None, false, &metrics)).await.unwrap();
        assert_eq!(signal, Signal::Continue);
        assert_eq!(metrics.snapshot().loop_passes, 0);
    }

    #[test]
    fn test_star_selects_all() {
        assert_eq!(FieldSelection::from_names(vec!["*".to_string()]), FieldSelection::All);
        assert_eq!(
            FieldSelection::from_names(vec!["a".to_string()]),
            FieldSelection::Named(vec!["a".to_string()])
        );
    }
}
