//! Conductor CLI
//!
//! Validates definition files and runs processors against simulated
//! resources, printing the run report, the resulting context and the
//! resource ledger as JSON.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, eyre, WrapErr};
use color_eyre::Result;
use conductor_core::{DbHandle, ExecutionContext, Sheet, Value};
use conductor_plan::{DefinitionSet, Severity, Validator};
use conductor_runtime::{ComponentCatalog, FnDbLogic, FnLogic};
use conductor_sim::{FailureModel, FailurePlan, SimResources};
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "conductor")]
#[command(about = "Conductor - declarative action and transaction engine", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a definition file and report every problem found
    Validate {
        /// Path to definition file
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Run a processor against simulated resources
    Run {
        /// Path to definition file
        #[arg(short, long)]
        file: PathBuf,
        /// Path to input file with initial fields and sheets
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Processor to run, the last one in the file by default
        #[arg(short, long)]
        processor: Option<String>,
        /// Seed for random resource failures
        #[arg(long)]
        fail_seed: Option<u64>,
        /// Probability of each resource operation failing
        #[arg(long, default_value_t = 0.0)]
        fail_probability: f64,
    },
}

/// Initial data of a run
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RunInput {
    fields: IndexMap<String, Value>,
    sheets: IndexMap<String, Sheet>,
}

impl RunInput {
    fn into_context(self, service: &str) -> ExecutionContext {
        let ctx = ExecutionContext::new(service);
        for (name, value) in self.fields {
            ctx.set_value(&name, value);
        }
        for (name, sheet) in self.sheets {
            ctx.put_sheet(&name, sheet);
        }
        ctx
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "conductor=info,conductor_runtime=info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_definitions(path: &Path) -> Result<DefinitionSet> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("reading definitions from {}", path.display()))?;
    DefinitionSet::from_json(&text).wrap_err_with(|| format!("parsing {}", path.display()))
}

/// Logic every definition file may refer to
fn standard_catalog() -> ComponentCatalog {
    let mut catalog = ComponentCatalog::new();
    catalog.register_logic("succeed", FnLogic::new(|_: &ExecutionContext| Ok(true)));
    catalog.register_logic("fail", FnLogic::new(|_: &ExecutionContext| Ok(false)));
    catalog.register_logic(
        "has_value",
        FnLogic::new(|ctx: &ExecutionContext| {
            let field = ctx.get_value("field_name").map(|v| v.to_string()).unwrap_or_default();
            Ok(ctx.has_value(&field))
        }),
    );
    catalog.register_db_logic(
        "can_update",
        FnDbLogic::new(|_: &ExecutionContext, handle: &dyn DbHandle| Ok(handle.access_type().updates_db())),
    );
    catalog
}

fn validate(path: &Path) -> Result<()> {
    let set = load_definitions(path)?;
    let mut catalog = standard_catalog().with_config(set.config.clone());
    for message in &set.messages {
        catalog.add_message(message.clone());
    }
    let resources = SimResources::new().resources();
    let mut errors = 0;
    for spec in &set.processors {
        let report = Validator::new()
            .with_lookup(&catalog)
            .with_strict_messages(catalog.config().strict_messages)
            .validate(spec);
        for message in &report.messages {
            println!("{}: {}: {}", message.severity, message.component, message.text);
        }
        errors += report.count(Severity::Error);
        if !report.has_errors() {
            // later processors may call this one
            catalog.prepare(spec, &resources)?;
        }
    }
    if errors > 0 {
        bail!("{} error(s) in {}", errors, path.display());
    }
    println!("{} processor(s) ok", set.processors.len());
    Ok(())
}

async fn run(
    path: &Path,
    input: Option<&Path>,
    processor: Option<&str>,
    failures: FailurePlan,
) -> Result<()> {
    let set = load_definitions(path)?;
    let sim = SimResources::with_failures(failures);
    let mut catalog = standard_catalog();
    catalog.load_definitions(&set, &sim.resources())?;

    let name = match processor {
        Some(name) => name.to_string(),
        None => set
            .processors
            .last()
            .map(|p| p.name.clone())
            .ok_or_else(|| eyre!("{} defines no processors", path.display()))?,
    };
    let processor = catalog.require_processor(&name)?;

    let input = match input {
        Some(file) => {
            let text = std::fs::read_to_string(file)
                .wrap_err_with(|| format!("reading input from {}", file.display()))?;
            serde_json::from_str::<RunInput>(&text).wrap_err_with(|| format!("parsing {}", file.display()))?
        }
        None => RunInput::default(),
    };
    let ctx = input.into_context(&name);

    let token = ctx.cancellation_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt requested");
            token.cancel();
        }
    });

    let outcome = processor.execute(&ctx).await;
    let output = serde_json::json!({
        "report": outcome.as_ref().ok(),
        "error": outcome.as_ref().err().map(ToString::to_string),
        "fields": ctx.fields_snapshot(),
        "sheets": ctx.sheet_names().into_iter().map(|s| (s.clone(), ctx.sheet(&s))).collect::<IndexMap<_, _>>(),
        "messages": ctx.messages(),
        "ledger": sim.ledger().events(),
        "injected_failures": sim.failures().injected(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    outcome?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Commands::Validate { file } => validate(&file),
        Commands::Run {
            file,
            input,
            processor,
            fail_seed,
            fail_probability,
        } => {
            let failures = match fail_seed {
                Some(seed) => FailurePlan::random(FailureModel::new(seed, fail_probability)),
                None => FailurePlan::none(),
            };
            run(&file, input.as_deref(), processor.as_deref(), failures).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_into_context() {
        let input: RunInput = serde_json::from_str(
            r#"{"fields": {"id": 3, "name": "x"}, "sheets": {"lines": {"columns": ["n"], "rows": [[1], [2]]}}}"#,
        )
        .unwrap();
        let ctx = input.into_context("svc");
        assert_eq!(ctx.get_value("id"), Some(Value::Integer(3)));
        assert_eq!(ctx.nbr_rows_in_sheet("lines"), 2);
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::parse_from(["conductor", "run", "--file", "defs.json", "--fail-seed", "7"]);
        match cli.command {
            Commands::Run { fail_seed, processor, .. } => {
                assert_eq!(fail_seed, Some(7));
                assert!(processor.is_none());
            }
            Commands::Validate { .. } => panic!("expected run"),
        }
    }

    #[tokio::test]
    async fn test_standard_catalog_runs_definitions() {
        let json = r#"{
            "processors": [{
                "name": "svc",
                "db_usage": "read_write",
                "actions": [
                    {"type": "db_logic", "logic_name": "can_update", "db_usage": "read_only", "on_failure_jump_to": "_stop"},
                    {"type": "set_value", "field_name": "done", "field_value": "true"}
                ]
            }]
        }"#;
        let set = DefinitionSet::from_json(json).unwrap();
        let sim = SimResources::new();
        let mut catalog = standard_catalog();
        catalog.load_definitions(&set, &sim.resources()).unwrap();
        let ctx = ExecutionContext::new("svc");
        catalog.require_processor("svc").unwrap().execute(&ctx).await.unwrap();
        assert_eq!(ctx.get_value("done"), Some(Value::Boolean(true)));
        assert_eq!(sim.ledger().commits(), 1);
    }
}
