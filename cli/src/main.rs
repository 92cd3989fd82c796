//! Canopy command-line front end.
//!
//! Loads assignment and definition exports from disk, compiles them into
//! rules, and writes the rules, the generated baseline, and any per-definition
//! failures as one JSON document.
//!
//! Usage:
//!   canopy compile --assignments assignments.json --definitions definitions.json
//!   canopy compile --assignments a.json --definitions d.json --config canopy.toml --strict
//!   canopy classify "[parameters('adminPassword')]" --secure adminPassword

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use canopy_compiler::{AssignmentVisitor, CompilationContext, DefinitionStore};
use canopy_contracts::{
    document::PolicyAssignment,
    error::{CanopyError, CanopyResult},
    options::CompilerOptions,
};
use canopy_expr::{ExpressionClassifier, TokenClassifier};

// ── CLI definition ────────────────────────────────────────────────────────────

/// Canopy: compile cloud policy assignments into offline rules.
#[derive(Parser)]
#[command(
    name = "canopy",
    about = "Compile policy assignments into normalized rules",
    long_about = "Compiles policy assignments and their definitions and initiatives into\n\
                  rules with target types, applicability and compliance predicates, and\n\
                  a baseline listing every generated rule."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile assignments into rules, a baseline, and a failure report.
    Compile(CompileArgs),
    /// Classify one parameter value or template expression.
    Classify {
        /// The raw value, e.g. "[parameters('name')]".
        expression: String,
        /// Parameter names to treat as secure.
        #[arg(long = "secure")]
        secure: Vec<String>,
    },
}

#[derive(clap::Args)]
struct CompileArgs {
    /// Assignment export files (an assignment, an array, or a bundle).
    #[arg(long, num_args = 1.., required = true)]
    assignments: Vec<PathBuf>,
    /// Definition and initiative export files.
    #[arg(long, num_args = 1..)]
    definitions: Vec<PathBuf>,
    /// TOML options file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Definition ids to skip, in addition to the config file's list.
    #[arg(long)]
    ignore: Vec<String>,
    /// Keep every assignment-driven variant instead of first-wins.
    #[arg(long)]
    keep_duplicates: bool,
    /// Parameter names whose values must not appear in output.
    #[arg(long = "secure")]
    secure: Vec<String>,
    /// Write the result here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Exit non-zero when any definition failed to compile.
    #[arg(long)]
    strict: bool,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Set RUST_LOG=debug for per-definition output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Compile(args) => run_compile(args),
        Command::Classify { expression, secure } => run_classify(&expression, &secure),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("canopy: {}", e);
            std::process::exit(1);
        }
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// Returns `Ok(false)` when `--strict` was given and failures were recorded.
fn run_compile(args: CompileArgs) -> CanopyResult<bool> {
    let mut options = match &args.config {
        Some(path) => CompilerOptions::from_file(path)?,
        None => CompilerOptions::default(),
    };
    options.ignore.extend(args.ignore);
    options.secure_parameters.extend(args.secure);
    options.keep_duplicates |= args.keep_duplicates;

    let mut store = DefinitionStore::new();
    for path in &args.definitions {
        let added = store.load(&read_json(path)?)?;
        info!(path = %path.display(), documents = added, "definitions loaded");
    }

    let mut assignments = Vec::new();
    for path in &args.assignments {
        let document = read_json(path)?;
        assignments.extend(read_assignments(path, &document, &mut store)?);
    }

    let visitor = AssignmentVisitor::new(Box::new(store));
    let mut ctx = CompilationContext::new(options);
    for assignment in &assignments {
        visitor.visit(&mut ctx, assignment);
    }

    let output = json!({
        "rules": ctx.get_definitions(),
        "baseline": ctx.generate_baseline(),
        "failures": ctx.failures(),
    });
    let text = serde_json::to_string_pretty(&output).map_err(|e| config_error("failed to serialize output", e))?;
    match &args.output {
        Some(path) => std::fs::write(path, text)
            .map_err(|e| config_error(&format!("failed to write '{}'", path.display()), e))?,
        None => println!("{text}"),
    }

    eprintln!(
        "canopy: run {} started {}: {} assignments, {} rules, {} ignored, {} failures",
        ctx.run_id(),
        ctx.started_at().to_rfc3339(),
        assignments.len(),
        ctx.get_definitions().len(),
        ctx.ignored().len(),
        ctx.failures().len(),
    );

    Ok(!(args.strict && !ctx.failures().is_empty()))
}

fn run_classify(expression: &str, secure: &[String]) -> CanopyResult<bool> {
    let classification = TokenClassifier.classify(expression, secure);
    let text =
        serde_json::to_string_pretty(&classification).map_err(|e| config_error("failed to serialize output", e))?;
    println!("{text}");
    Ok(true)
}

// ── Input helpers ─────────────────────────────────────────────────────────────

fn config_error(context: &str, e: impl std::fmt::Display) -> CanopyError {
    CanopyError::ConfigError {
        reason: format!("{context}: {e}"),
    }
}

fn read_json(path: &Path) -> CanopyResult<Value> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| config_error(&format!("failed to read '{}'", path.display()), e))?;
    serde_json::from_str(&contents).map_err(|e| config_error(&format!("'{}' is not valid JSON", path.display()), e))
}

/// Assignments in `document`: a single assignment, an array of them, or a
/// bundle with a top-level `policyAssignments` array.
///
/// Definitions embedded next to the assignments, at the top level or inside
/// each assignment, are added to `store`.
fn read_assignments(
    path: &Path,
    document: &Value,
    store: &mut DefinitionStore,
) -> CanopyResult<Vec<PolicyAssignment>> {
    store.load_embedded(document)?;

    let items: Vec<&Value> = match document {
        Value::Array(items) => items.iter().collect(),
        Value::Object(obj) => match obj
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("policyAssignments"))
            .map(|(_, v)| v)
        {
            Some(Value::Array(items)) => items.iter().collect(),
            _ if obj.contains_key("properties") || obj.contains_key("Properties") => vec![document],
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    let mut assignments = Vec::with_capacity(items.len());
    for item in items {
        if !std::ptr::eq(item, document) {
            store.load_embedded(item)?;
        }
        let assignment = serde_json::from_value(item.clone())
            .map_err(|e| config_error(&format!("invalid assignment in '{}'", path.display()), e))?;
        assignments.push(assignment);
    }
    Ok(assignments)
}
