//! Preparation of declarative definitions into executable actions.
//!
//! A definition is validated first; the first error aborts preparation and
//! warnings are logged. Names are then bound: jump directives become
//! positions, conditions are compiled, message ids are looked up and
//! logic and sub-processors are resolved from the catalog.

use crate::action::{Action, ActionHeader, Body, MessageTemplate, Operand};
use crate::block::{ActionBlock, NestedBlock};
use crate::builtin::{
    AddMessageWork, LogicWork, PublishWork, RemoveValueWork, RenameSheetWork, SetValueWork,
    ValueSource,
};
use crate::catalog::ComponentCatalog;
use crate::db::{DbAction, DbLogicWork, ExecuteSqlWork};
use crate::looping::{FieldSelection, LoopAction, LoopMode};
use crate::parallel::SynchronizeAction;
use crate::processor::{ServiceCall, TransactionProcessor};
use conductor_core::{EngineError, EngineResult, MessageDef, MessageKind, Resources};
use conductor_plan::{ActionKind, ActionSpec, BlockScope, Condition, ProcessorSpec, Severity, Validator};

/// Turns [`ProcessorSpec`]s into [`TransactionProcessor`]s
pub struct Preparer<'a> {
    catalog: &'a ComponentCatalog,
    resources: &'a Resources,
}

impl<'a> Preparer<'a> {
    /// Prepare against registered components and resources
    #[must_use]
    pub fn new(catalog: &'a ComponentCatalog, resources: &'a Resources) -> Self {
        Self { catalog, resources }
    }

    /// Validate and prepare a processor
    ///
    /// # Errors
    ///
    /// Returns the first configuration error of the definition
    pub fn prepare(&self, spec: &ProcessorSpec) -> EngineResult<TransactionProcessor> {
        let report = Validator::new()
            .with_lookup(self.catalog)
            .with_strict_messages(self.catalog.config().strict_messages)
            .validate(spec);
        for note in report.notes() {
            match note.severity {
                Severity::Warning => tracing::warn!(component = %note.component, "{}", note.text),
                _ => tracing::info!(component = %note.component, "{}", note.text),
            }
        }
        if let Some(err) = report.into_first_error() {
            return Err(err);
        }

        let block = self.block(&spec.name, &spec.actions, false)?;
        tracing::debug!(processor = %spec.name, actions = block.len(), "processor prepared");
        Ok(TransactionProcessor::new(&spec.name, block, self.resources.clone())
            .with_db_usage(spec.db_usage)
            .with_schema(spec.schema_name.clone())
            .with_messaging(spec.messaging_usage))
    }

    fn block(&self, owner: &str, specs: &[ActionSpec], in_loop: bool) -> EngineResult<ActionBlock> {
        let scope = BlockScope::build(owner, specs.iter().map(|s| s.header.name.as_deref()), in_loop)?;
        let actions = specs
            .iter()
            .enumerate()
            .map(|(index, spec)| self.action(spec, index, &scope))
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(ActionBlock::new(owner, actions))
    }

    fn action(&self, spec: &ActionSpec, index: usize, scope: &BlockScope) -> EngineResult<Action> {
        let name = spec.display_name(index);
        let mut header = self.header(spec, &name, scope)?;
        let body = match &spec.kind {
            ActionKind::SetValue {
                field_name,
                field_value,
                expression,
            } => {
                let source = match (expression, field_value) {
                    (Some(expression), _) => ValueSource::Expression(Condition::compile(&name, expression)?),
                    (None, Some(value)) => ValueSource::Operand(Operand::parse(value)),
                    (None, None) => ValueSource::Remove,
                };
                simple(SetValueWork::new(field_name, source))
            }
            ActionKind::RemoveValue { field_name } => simple(RemoveValueWork::new(field_name)),
            ActionKind::RenameSheet {
                sheet_name,
                new_sheet_name,
            } => simple(RenameSheetWork::new(sheet_name, new_sheet_name)),
            ActionKind::AddMessage {
                message_id,
                parameters,
            } => simple(AddMessageWork::new(self.template(message_id, parameters)?)),
            ActionKind::Logic { logic_name } => {
                let logic = self.catalog.logic(logic_name).ok_or_else(|| unknown("logic", logic_name))?;
                simple(LogicWork::new(&name, logic))
            }
            ActionKind::DbLogic {
                logic_name,
                db_usage,
                schema_name,
            } => {
                let logic = self
                    .catalog
                    .db_logic(logic_name)
                    .ok_or_else(|| unknown("db logic", logic_name))?;
                simple(
                    DbAction::new(&name, *db_usage, Box::new(DbLogicWork::new(&name, logic)))
                        .with_schema(schema_name.clone())
                        .with_resources(self.resources.clone()),
                )
            }
            ActionKind::ExecuteSql {
                statement,
                parameters,
                input_sheet_name,
                db_usage,
                schema_name,
            } => {
                let work = ExecuteSqlWork::new(statement, parameters.clone(), input_sheet_name.clone());
                simple(
                    DbAction::new(&name, *db_usage, Box::new(work))
                        .with_schema(schema_name.clone())
                        .with_resources(self.resources.clone()),
                )
            }
            ActionKind::ExecuteService { service_name } => {
                simple(ServiceCall::new(self.catalog.require_processor(service_name)?))
            }
            ActionKind::Publish { destination, fields } => simple(PublishWork::new(destination, fields.clone())),
            ActionKind::Block { actions } => {
                let block = self.block(&name, actions, scope.in_loop())?;
                Body::Container(Box::new(NestedBlock::new(block)))
            }
            ActionKind::Loop {
                data_sheet_name,
                columns_to_copy_as_fields,
                fields_to_copy_back_as_columns,
                break_on_interrupt,
                actions,
            } => {
                let body = self.block(&name, actions, true)?;
                let mode = match data_sheet_name {
                    Some(sheet) => LoopMode::Sheet {
                        sheet: sheet.clone(),
                        columns: columns_to_copy_as_fields.clone().map(FieldSelection::from_names),
                        copy_back: fields_to_copy_back_as_columns.clone().map(FieldSelection::from_names),
                    },
                    // without a sheet the condition decides every pass
                    None => LoopMode::Condition(header.condition.take()),
                };
                Body::Container(Box::new(
                    LoopAction::new(&name, mode, body).with_break_on_interrupt(*break_on_interrupt),
                ))
            }
            ActionKind::Synchronize {
                initial_action,
                final_action,
                actions,
            } => {
                let detached = BlockScope::detached(&name, false);
                let children = actions
                    .iter()
                    .enumerate()
                    .map(|(i, child)| self.action(child, i, &detached))
                    .collect::<EngineResult<Vec<_>>>()?;
                let mut parallel = SynchronizeAction::new(&name, children, self.catalog.config().parallel_limit());
                if let Some(initial) = initial_action {
                    parallel = parallel.with_initial(self.action(initial, 0, &detached)?);
                }
                if let Some(last) = final_action {
                    parallel = parallel.with_final(self.action(last, index, scope)?);
                }
                Body::Container(Box::new(parallel))
            }
        };
        Ok(Action::new(header, body))
    }

    fn header(&self, spec: &ActionSpec, name: &str, scope: &BlockScope) -> EngineResult<ActionHeader> {
        let h = &spec.header;
        Ok(ActionHeader {
            name: name.to_string(),
            condition: h
                .execute_on_condition
                .as_deref()
                .map(|source| Condition::compile(name, source))
                .transpose()?,
            rows_in_sheet: h.execute_if_rows_in_sheet.clone(),
            no_rows_in_sheet: h.execute_if_no_rows_in_sheet.clone(),
            success_message: h
                .success_message
                .as_deref()
                .map(|id| self.template(id, &h.success_message_parameters))
                .transpose()?,
            failure_message: h
                .failure_message
                .as_deref()
                .map(|id| self.template(id, &h.failure_message_parameters))
                .transpose()?,
            success_jump: scope.resolve_opt(name, h.on_success_jump_to.as_deref())?,
            failure_jump: scope.resolve_opt(name, h.on_failure_jump_to.as_deref())?,
            stop_on_error: h.stop_if_message_is_error,
            post_processing: h.requires_post_processing(),
            log_timing: self.catalog.config().log_action_timing,
        })
    }

    fn template(&self, id: &str, params: &[String]) -> EngineResult<MessageTemplate> {
        let def = match self.catalog.message(id) {
            Some(def) => def.clone(),
            None if self.catalog.config().strict_messages => return Err(unknown("message", id)),
            None => MessageDef::new(id, MessageKind::Warning, id),
        };
        Ok(MessageTemplate::new(def, params.to_vec()))
    }
}

fn simple(work: impl crate::action::Work + 'static) -> Body {
    Body::Simple(Box::new(work))
}

fn unknown(kind: &str, name: &str) -> EngineError {
    EngineError::UnknownComponent {
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::FnLogic;
    use conductor_core::{ExecutionContext, Signal};
    use conductor_plan::EngineConfig;

    fn catalog() -> ComponentCatalog {
        let mut catalog = ComponentCatalog::new();
        catalog.register_logic("yes", FnLogic::new(|_: &ExecutionContext| Ok(true)));
        catalog.add_message(MessageDef::new("oops", MessageKind::Error, "oops {0}"));
        catalog
    }

    #[test]
    fn test_duplicate_names_fail_preparation() {
        let spec = ProcessorSpec::new(
            "svc",
            vec![ActionSpec::logic("yes").named("a"), ActionSpec::logic("yes").named("a")],
        );
        let err = Preparer::new(&catalog(), &Resources::new()).prepare(&spec).unwrap_err();
        assert_eq!(
            err,
            EngineError::DuplicateActionName {
                block: "svc".to_string(),
                name: "a".to_string(),
                position: 2,
            }
        );
    }

    #[test]
    fn test_jumps_are_bound_to_positions() {
        let spec = ProcessorSpec::new(
            "svc",
            vec![
                ActionSpec::logic("yes").named("a").on_success("c"),
                ActionSpec::logic("yes").named("b"),
                ActionSpec::logic("yes").named("c").on_failure("_stop"),
            ],
        );
        let processor = Preparer::new(&catalog(), &Resources::new()).prepare(&spec).unwrap();
        let actions = processor.block().actions();
        assert_eq!(actions[0].header().success_jump, Some(Signal::JumpTo(2)));
        assert_eq!(actions[2].header().failure_jump, Some(Signal::Stop));
        assert!(!actions[1].header().requires_post_processing());
    }

    #[test]
    fn test_unknown_logic_is_rejected() {
        let spec = ProcessorSpec::new("svc", vec![ActionSpec::logic("missing")]);
        let err = Preparer::new(&catalog(), &Resources::new()).prepare(&spec).unwrap_err();
        assert!(matches!(err, EngineError::UnknownComponent { .. }));
    }

    #[test]
    fn test_lenient_messages_fall_back_to_warning() {
        let catalog = catalog().with_config(EngineConfig::new().with_strict_messages(false));
        let spec = ProcessorSpec::new(
            "svc",
            vec![ActionSpec::logic("yes").with_success_message("not_there", &[])],
        );
        let processor = Preparer::new(&catalog, &Resources::new()).prepare(&spec).unwrap();
        let template = processor.block().actions()[0].header().success_message.clone().unwrap();
        assert_eq!(template.kind(), MessageKind::Warning);

        let strict = catalog.with_config(EngineConfig::new());
        assert!(Preparer::new(&strict, &Resources::new()).prepare(&spec).is_err());
    }

    #[test]
    fn test_parallel_children_cannot_jump_to_siblings() {
        let spec = ProcessorSpec::new(
            "svc",
            vec![ActionSpec::synchronize(vec![
                ActionSpec::logic("yes").named("a").on_success("b"),
                ActionSpec::logic("yes").named("b"),
            ])],
        );
        let err = Preparer::new(&catalog(), &Resources::new()).prepare(&spec).unwrap_err();
        assert!(matches!(err, EngineError::JumpTargetNotFound { .. }));
    }

    #[test]
    fn test_next_loop_outside_loop_is_rejected() {
        let spec = ProcessorSpec::new("svc", vec![ActionSpec::logic("yes").on_success("_next")]);
        let err = Preparer::new(&catalog(), &Resources::new()).prepare(&spec).unwrap_err();
        assert!(matches!(err, EngineError::NextLoopOutsideLoop { .. }));
    }
}
