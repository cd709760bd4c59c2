use crate::catalog::RouterCatalog;
use crate::config::Config;
use crate::engine::Analyzer;
use crate::openapi_builder::OpenApiBuilder;
use crate::parser::SourceParser;
use crate::recognizer::{annotate, PatternRecognizer};
use crate::resolver::SourceResolver;
use crate::scanner::SourceScanner;
use crate::serializer::{emit, serialize, OutputFormat};
use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use std::path::PathBuf;

/// Infer an OpenAPI document from the router setup of a Rust web project
#[derive(Parser, Debug)]
#[command(name = "openapi-infer")]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to the Rust project directory
    #[arg(value_name = "PROJECT_PATH")]
    pub project_path: PathBuf,

    /// Output format (yaml or json)
    #[arg(short = 'f', long = "format", value_enum, default_value = "yaml")]
    pub output_format: OutputFormat,

    /// Output file path (if not specified, outputs to stdout)
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output_path: Option<PathBuf>,

    /// Configuration file (defaults to .openapi-infer.yaml in the project directory)
    #[arg(short = 'c', long = "config", value_name = "CONFIG")]
    pub config_path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

/// What a run produced, for the closing summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub files_scanned: usize,
    pub scopes: usize,
    pub operations: usize,
    pub components: usize,
    /// Facts the analysis could not resolve and skipped
    pub skipped: usize,
}

/// Validate and log already-parsed arguments
pub fn validate_args(args: CliArgs) -> Result<CliArgs> {
    debug!("Parsed arguments: {:?}", args);
    if !args.project_path.exists() {
        anyhow::bail!(
            "Project path does not exist: {}",
            args.project_path.display()
        );
    }
    if !args.project_path.is_dir() {
        anyhow::bail!(
            "Project path is not a directory: {}",
            args.project_path.display()
        );
    }

    info!("Project path: {}", args.project_path.display());
    info!("Output format: {:?}", args.output_format);
    match &args.output_path {
        Some(output) => info!("Output file: {}", output.display()),
        None => info!("Output: stdout"),
    }
    Ok(args)
}

/// Runs the whole pipeline: scan, parse, lower, resolve the router catalog, analyse,
/// recognise handler bodies, assemble and serialize.
pub fn run(args: &CliArgs) -> Result<RunSummary> {
    let root = &args.project_path;
    let config = match &args.config_path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => Config::load(root).context("Failed to load project configuration")?,
    };

    info!("Scanning project directory...");
    let scan_result = SourceScanner::new(root.clone())
        .with_exclude(&config.exclude)
        .scan()
        .context("Failed to scan project directory")?;
    info!("Found {} Rust files", scan_result.rust_files.len());
    if scan_result.rust_files.is_empty() {
        anyhow::bail!("No Rust files found in {}", root.display());
    }

    info!("Parsing Rust files...");
    let parsed_files = SourceParser::new(root.clone())
        .parse_files(&scan_result.rust_files)
        .context("Project does not parse; no analysis was run")?;

    info!("Resolving program...");
    let program = SourceResolver::resolve(&parsed_files);
    let catalog = RouterCatalog::resolve(&config.router_definitions, &program)
        .context("No configured router type is used by this project")?;

    info!("Tracking router values...");
    let mut analysis = Analyzer::new(&program, &catalog, &config).analyze();
    annotate(
        &mut analysis.tree,
        &program,
        &config,
        &PatternRecognizer::new(&config),
    );
    if analysis.tree.operation_count() == 0 {
        warn!("No routes found in the project");
    }

    info!("Building OpenAPI document...");
    let document = OpenApiBuilder::new(&program, &config)
        .build(&mut analysis.tree)
        .context("Failed to assemble the OpenAPI document")?;

    let content = serialize(&document, args.output_format)?;
    emit(&content, args.output_path.as_deref()).context("Failed to write output")?;
    if let Some(output_path) = &args.output_path {
        info!("Wrote OpenAPI document to {}", output_path.display());
    }

    let summary = RunSummary {
        files_scanned: scan_result.rust_files.len(),
        scopes: analysis.tree.len(),
        operations: analysis.tree.operation_count(),
        components: document
            .components
            .as_ref()
            .map_or(0, |c| c.schemas.len()),
        skipped: analysis.diagnostics.len(),
    };
    info!("Generation complete!");
    info!("Summary:");
    info!("  - Files scanned: {}", summary.files_scanned);
    info!("  - Router scopes: {}", summary.scopes);
    info!("  - Operations: {}", summary.operations);
    info!("  - Schema components: {}", summary.components);
    info!("  - Skipped facts: {}", summary.skipped);
    Ok(summary)
}
