//! schema-compose CLI
//!
//! Command-line interface for merging, composing and inspecting JSON Schemas.

use std::path::Path;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use schema_compose::{
    branch_label, discriminator_config, lint, load_schema_auto, merge_all_of, parse_pointer,
    select_pointer, BranchDetectionResult, BranchDetector, ConditionalComposer, DefaultExtractor,
    Discriminator, DocumentId, EvaluationTracker, FileStatus, RefResolver, Severity,
    ValidatorCache,
};

#[derive(Parser)]
#[command(name = "schema-compose")]
#[command(about = "Merge, compose and inspect JSON Schema composition keywords")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge the allOf branches of a schema and report conflicts
    Merge {
        /// Schema source: file path or URL (http:// or https://)
        schema: String,

        /// JSON Pointer to the schema holding the allOf (default: root)
        #[arg(long, default_value = "")]
        pointer: String,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Compute the effective schema for a value (if/then/else, dependencies, allOf)
    Compose {
        /// Schema source: file path or URL
        schema: String,

        /// Value document
        value: String,

        #[arg(long, default_value = "")]
        pointer: String,

        #[arg(long)]
        pretty: bool,
    },

    /// List the value's keys the schema accounts for
    Evaluated {
        schema: String,

        value: String,

        #[arg(long, default_value = "")]
        pointer: String,
    },

    /// Detect which oneOf/anyOf branch a value belongs to
    Detect {
        schema: String,

        value: String,

        #[arg(long, default_value = "")]
        pointer: String,

        /// Skip the validator and use structural matching only
        #[arg(long)]
        heuristic: bool,
    },

    /// Print the default value a schema suggests
    Defaults {
        schema: String,

        #[arg(long, default_value = "")]
        pointer: String,
    },

    /// Lint schema files for composition problems
    Lint {
        /// File or directory to lint
        path: String,

        /// Output format: text (default) or json
        #[arg(long, default_value = "text")]
        format: String,

        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,

        /// Suppress progress output, only show errors
        #[arg(long, short)]
        quiet: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Merge {
            schema,
            pointer,
            pretty,
        } => run_merge(&schema, &pointer, pretty),
        Commands::Compose {
            schema,
            value,
            pointer,
            pretty,
        } => run_compose(&schema, &value, &pointer, pretty),
        Commands::Evaluated {
            schema,
            value,
            pointer,
        } => run_evaluated(&schema, &value, &pointer),
        Commands::Detect {
            schema,
            value,
            pointer,
            heuristic,
        } => run_detect(&schema, &value, &pointer, heuristic),
        Commands::Defaults { schema, pointer } => run_defaults(&schema, &pointer),
        Commands::Lint {
            path,
            format,
            strict,
            quiet,
        } => run_lint(Path::new(&path), &format, strict, quiet),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

/// A loaded schema document and the node a command works on.
struct Target {
    resolver: RefResolver,
    doc: DocumentId,
    root: Value,
    node: Value,
    /// Where `node` sits in the document; `None` when the pointer lands on a `$ref`.
    location: Option<String>,
    base_path: Vec<String>,
}

impl Target {
    /// Location of a keyword of the selected node, e.g. its `allOf` array.
    fn keyword_location(&self, keyword: &str) -> Option<String> {
        self.location
            .as_ref()
            .map(|location| format!("{}/{}", location, keyword))
    }
}

fn load_target(source: &str, pointer: &str) -> Result<Target, u8> {
    let root = load_document(source)?;
    let selected = select_pointer(&root, pointer)
        .map_err(|e| {
            eprintln!("Error: {}", e);
            e.exit_code() as u8
        })?
        .clone();

    let mut resolver = RefResolver::new();
    let doc = resolver.load_document(root.clone());
    let node = resolver.resolve_schema(doc, &selected);
    let location = selected.get("$ref").is_none().then(|| pointer.to_string());

    Ok(Target {
        resolver,
        doc,
        root,
        node,
        location,
        base_path: parse_pointer(pointer),
    })
}

fn load_document(source: &str) -> Result<Value, u8> {
    load_schema_auto(source).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })
}

fn emit<T: Serialize>(output: &T, pretty: bool) -> Result<(), u8> {
    let json = if pretty {
        serde_json::to_string_pretty(output)
    } else {
        serde_json::to_string(output)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;
    println!("{}", json);
    Ok(())
}

fn run_merge(schema_source: &str, pointer: &str, pretty: bool) -> Result<(), u8> {
    let target = load_target(schema_source, pointer)?;
    let Some(Value::Array(branches)) = target.node.get("allOf") else {
        eprintln!("Error: no allOf at {}", display_pointer(pointer));
        return Err(2);
    };

    let location = target.keyword_location("allOf");
    let branches: Vec<Value> = branches
        .iter()
        .enumerate()
        .map(|(i, b)| {
            target
                .resolver
                .resolve_item(target.doc, location.as_deref(), i, b)
                .schema
        })
        .collect();
    let result = merge_all_of(&branches, &target.base_path);

    emit(&result, pretty)?;
    if result.conflicts.is_empty() {
        Ok(())
    } else {
        Err(1)
    }
}

fn run_compose(
    schema_source: &str,
    value_source: &str,
    pointer: &str,
    pretty: bool,
) -> Result<(), u8> {
    let target = load_target(schema_source, pointer)?;
    let value = load_document(value_source)?;

    let cache = ValidatorCache::default();
    let validator = cache.bind(target.doc, &target.root);
    let composed = ConditionalComposer::new(&validator)
        .with_refs(&target.resolver, target.doc)
        .compose(&target.node, &value, &target.base_path);

    emit(&composed, pretty)?;
    if composed.conflicts.is_empty() {
        Ok(())
    } else {
        Err(1)
    }
}

fn run_evaluated(schema_source: &str, value_source: &str, pointer: &str) -> Result<(), u8> {
    let target = load_target(schema_source, pointer)?;
    let value = load_document(value_source)?;

    let cache = ValidatorCache::default();
    let validator = cache.bind(target.doc, &target.root);
    let keys = EvaluationTracker::new(&validator)
        .with_refs(&target.resolver, target.doc)
        .evaluated(&target.node, &value);

    emit(&keys, false)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DetectOutput<'a> {
    keyword: &'a str,
    #[serde(flatten)]
    result: BranchDetectionResult,
    labels: Vec<String>,
}

fn run_detect(
    schema_source: &str,
    value_source: &str,
    pointer: &str,
    heuristic: bool,
) -> Result<(), u8> {
    let target = load_target(schema_source, pointer)?;
    let value = load_document(value_source)?;

    let union = ["oneOf", "anyOf"]
        .into_iter()
        .find_map(|k| Some((k, target.node.get(k)?.as_array()?)));
    let Some((keyword, branches)) = union else {
        eprintln!("Error: no oneOf or anyOf at {}", display_pointer(pointer));
        return Err(2);
    };

    let location = target.keyword_location(keyword);
    let cache = ValidatorCache::default();
    let validator = cache.bind(target.doc, &target.root);
    let mut detector = BranchDetector::new().with_refs(&target.resolver, target.doc);
    if let Some(location) = location.as_deref() {
        detector = detector.at(location);
    }
    if !heuristic {
        detector = detector.with_validator(&validator);
    }

    let by_discriminator = discriminator_config(&target.node).and_then(|config| {
        let mut discriminator = Discriminator::new(&config).with_refs(&target.resolver, target.doc);
        if let Some(location) = location.as_deref() {
            discriminator = discriminator.at(location);
        }
        discriminator.select_one_of_branch(branches, &value)
    });

    let result = match by_discriminator {
        Some(index) => BranchDetectionResult::from_matches(vec![index]),
        None => detector.detect(branches, &value),
    };

    let labels = branches
        .iter()
        .enumerate()
        .map(|(i, b)| branch_label(&detector.resolve_branch(i, b), i, None))
        .collect();
    let unique = result.matching_branch.is_some();

    emit(
        &DetectOutput {
            keyword,
            result,
            labels,
        },
        false,
    )?;
    if unique {
        Ok(())
    } else {
        Err(1)
    }
}

fn run_defaults(schema_source: &str, pointer: &str) -> Result<(), u8> {
    let target = load_target(schema_source, pointer)?;
    let extracted = DefaultExtractor::new()
        .with_refs(&target.resolver, target.doc)
        .extract(&target.node);

    match extracted {
        Some(value) => emit(&value, false),
        None => {
            emit(&Value::Null, false)?;
            Err(1)
        }
    }
}

fn run_lint(path: &Path, format: &str, strict: bool, quiet: bool) -> Result<(), u8> {
    if !path.exists() {
        eprintln!("Error: path not found: {}", path.display());
        return Err(2);
    }
    if format != "text" && format != "json" {
        eprintln!("Error: unknown format \"{}\": expected text or json", format);
        return Err(2);
    }

    let result = lint(path, strict);

    if format == "json" {
        emit(&result, true)?;
    } else {
        if !quiet {
            println!("Linting {} ...\n", path.display());
        }

        for file_result in &result.results {
            let status_icon = match file_result.status {
                FileStatus::Ok => "\x1b[32m✓\x1b[0m",
                FileStatus::Warning => "\x1b[33m⚠\x1b[0m",
                FileStatus::Error => "\x1b[31m✗\x1b[0m",
            };

            if !quiet || file_result.status != FileStatus::Ok {
                println!("  {} {}", status_icon, file_result.file.display());
            }

            for diag in &file_result.diagnostics {
                let (color, label) = match diag.severity {
                    Severity::Error => ("\x1b[31m", "error"),
                    Severity::Warning => ("\x1b[33m", "warning"),
                };
                if !quiet || diag.severity == Severity::Error {
                    println!(
                        "    {}{}[{}]\x1b[0m: {} - {}",
                        color, label, diag.code, diag.path, diag.message
                    );
                }
            }
        }

        println!();
        if result.is_ok() {
            println!(
                "\x1b[32m✓ {} files checked, all passed\x1b[0m",
                result.files_checked
            );
        } else {
            println!(
                "\x1b[31m✗ {} files checked: {} passed, {} failed ({} errors, {} warnings)\x1b[0m",
                result.files_checked, result.passed, result.failed, result.errors, result.warnings
            );
        }
    }

    if result.is_ok() {
        Ok(())
    } else {
        Err(1)
    }
}

fn display_pointer(pointer: &str) -> &str {
    if pointer.is_empty() {
        "the root"
    } else {
        pointer
    }
}
