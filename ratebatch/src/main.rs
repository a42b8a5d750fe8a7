//! ratebatch CLI Application
//!
//! Runs an external command or HTTP call once per input line under the
//! concurrency and rate limits of ratebatch-lib, then prints one result per
//! line as text, JSON or CSV.

mod input;
mod operation;
mod ui;

use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::Parser;
use input::{parse_items, read_items_from_file, Item};
use operation::{ExecOperation, HttpOperation, Operation};
use ratebatch_lib::{
    load_env_config, parse_duration_string, BatchConfig, BatchProcessor, BatchSummary,
    CancelToken, ConfigManager, EnvConfig, ItemResult, OperationErrorKind, OutputConfig,
    SilentReporter, TracingReporter,
};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::io::IsTerminal;
use std::process;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

/// CLI arguments for ratebatch
#[derive(Parser, Debug)]
#[command(name = "ratebatch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run a command or HTTP call per input line under concurrency and rate limits")]
#[command(
    long_about = "Run a command or HTTP call once per input line, never exceeding a concurrency cap or a per-window rate limit.\n\nInput lines are ID<TAB>PAYLOAD. Failures stay with their item; every input line gets exactly one result."
)]
#[command(styles = STYLES)]
pub struct Args {
    /// Input file with one item per line (reads stdin if omitted)
    #[arg(short = 'f', long = "file", value_name = "FILE", help_heading = "Input")]
    pub file: Option<String>,

    /// Separator between id and payload (default: TAB)
    #[arg(long = "delimiter", value_name = "CHAR", help_heading = "Input")]
    pub delimiter: Option<String>,

    /// Command to run per item; the payload is written to its stdin
    #[arg(long = "exec", value_name = "COMMAND", help_heading = "Operation")]
    pub exec: Option<String>,

    /// Endpoint to POST each item to as JSON {"id", "payload"}
    #[arg(long = "url", value_name = "URL", help_heading = "Operation")]
    pub url: Option<String>,

    /// Max operations running at once (default: 250)
    #[arg(short = 'c', long = "concurrency", help_heading = "Limits")]
    pub concurrency: Option<usize>,

    /// Max operations started per window (default: 500)
    #[arg(short = 'r', long = "rate-limit", help_heading = "Limits")]
    pub rate_limit: Option<usize>,

    /// Rate-limit window, e.g. 60s, 2m, 500ms (default: 60s)
    #[arg(short = 'w', long = "window", value_name = "DURATION", help_heading = "Limits")]
    pub window: Option<String>,

    /// Per-item timeout, e.g. 30s
    #[arg(long = "timeout", value_name = "DURATION", help_heading = "Limits")]
    pub timeout: Option<String>,

    /// How often to report remaining work (default: 60s)
    #[arg(long = "progress-interval", value_name = "DURATION", help_heading = "Limits")]
    pub progress_interval: Option<String>,

    /// Output results in JSON format
    #[arg(short = 'j', long = "json", help_heading = "Output Format")]
    pub json: bool,

    /// Output results in CSV format
    #[arg(long = "csv", help_heading = "Output Format")]
    pub csv: bool,

    /// Exit with status 1 if any item did not succeed
    #[arg(long = "strict", help_heading = "Output Format")]
    pub strict: bool,

    /// Use specific config file instead of automatic discovery
    #[arg(long = "config", value_name = "FILE", help_heading = "Configuration")]
    pub config: Option<String>,

    /// Verbose logging
    #[arg(short = 'v', long = "verbose", help_heading = "Configuration")]
    pub verbose: bool,

    /// Suppress progress output
    #[arg(short = 'q', long = "quiet", help_heading = "Configuration")]
    pub quiet: bool,
}

/// Conventional exit status for a process stopped by SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
    Csv,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = validate_args(&args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    init_logging(&args);

    match run_batch(args).await {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

/// Validate command line arguments
fn validate_args(args: &Args) -> Result<(), String> {
    match (&args.exec, &args.url) {
        (None, None) => return Err("Specify an operation with --exec or --url".to_string()),
        (Some(_), Some(_)) => return Err("Cannot use --exec and --url together".to_string()),
        _ => {}
    }

    if args.json && args.csv {
        return Err("Cannot specify both --json and --csv".to_string());
    }

    if let Some(delimiter) = &args.delimiter {
        if delimiter.chars().count() != 1 {
            return Err(format!(
                "--delimiter must be a single character, got '{}'",
                delimiter
            ));
        }
    }

    if args.verbose && args.quiet {
        return Err("Cannot use --verbose and --quiet together".to_string());
    }

    Ok(())
}

fn init_logging(args: &Args) {
    let default_directive = if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn,ratebatch=info"
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run_batch(args: Args) -> Result<i32, Box<dyn std::error::Error>> {
    let env_config = load_env_config();
    if env_config.has_output_format_conflict() {
        warn!("Both RB_JSON and RB_CSV are set, using JSON");
    }

    let (config, output_config) = build_config(&args, &env_config)?;
    let format = resolve_format(&args, &env_config, output_config.as_ref());
    let operation = build_operation(&args)?;
    let items = load_items(&args, &env_config)?;

    // Results come back in completion order; print them in input order.
    let input_order: HashMap<String, usize> = items
        .iter()
        .enumerate()
        .map(|(idx, item)| (item.id.clone(), idx))
        .collect();

    let processor = BatchProcessor::new(config.clone())?;
    let processor = if args.quiet {
        processor.with_reporter(SilentReporter)
    } else if let Some(console_reporter) = ui::ConsoleReporter::new() {
        processor.with_reporter(console_reporter)
    } else {
        processor.with_reporter(TracingReporter)
    };

    if args.verbose && format == OutputFormat::Text {
        ui::print_header(items.len(), &config, &operation.describe());
    }
    debug!(items = items.len(), operation = %operation.describe(), "Input loaded");

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if watch_interrupts(tokio::signal::ctrl_c, trigger).await {
            eprintln!("Interrupted again, aborting");
            process::exit(INTERRUPTED_EXIT_CODE);
        }
    });

    let operation = Arc::new(operation);
    let start_time = Instant::now();

    let mut results = processor
        .run_until(
            items,
            move |record| {
                let operation = operation.clone();
                async move { operation.call(record).await }
            },
            cancel,
        )
        .await?;

    let duration = start_time.elapsed();
    ui::ConsoleReporter::clear();

    results.sort_by_key(|r| input_order.get(&r.id).copied().unwrap_or(usize::MAX));
    let summary = BatchSummary::from_results(&results);

    match format {
        OutputFormat::Json => {
            let pretty = output_config
                .as_ref()
                .and_then(|o| o.json_pretty)
                .unwrap_or(true);
            display_json_results(&results, pretty)?;
        }
        OutputFormat::Csv => {
            let headers = output_config
                .as_ref()
                .and_then(|o| o.csv_headers)
                .unwrap_or(true);
            display_csv_results(&results, headers);
        }
        OutputFormat::Text => display_text_results(&results, &summary, duration),
    }

    if args.strict && !summary.all_succeeded() {
        Ok(1)
    } else {
        Ok(0)
    }
}

/// Cancel the batch on the first interrupt.
///
/// Returns `true` if a second interrupt arrives, meaning the user wants out
/// without waiting for in-flight items.
async fn watch_interrupts<S, Fut>(mut next_interrupt: S, cancel: CancelToken) -> bool
where
    S: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if next_interrupt().await.is_err() {
        return false;
    }
    warn!("Interrupt received, letting in-flight items finish (Ctrl-C again to abort)");
    cancel.cancel();

    next_interrupt().await.is_ok()
}

/// Build BatchConfig from CLI arguments with config file integration.
///
/// Precedence order (highest to lowest):
/// 1. CLI arguments (explicit user input)
/// 2. Environment variables (RB_*)
/// 3. Local config file (./ratebatch.toml)
/// 4. Global config file (~/.ratebatch.toml)
/// 5. XDG config file (~/.config/ratebatch/config.toml)
/// 6. Built-in defaults
fn build_config(
    args: &Args,
    env_config: &EnvConfig,
) -> Result<(BatchConfig, Option<OutputConfig>), Box<dyn std::error::Error>> {
    let config_manager = ConfigManager::new(args.verbose);

    let file_config = match args.config.as_ref().or(env_config.config.as_ref()) {
        Some(path) => {
            debug!(path = %path, "Using explicit config file");
            config_manager
                .load_file(path)
                .map_err(|e| format!("Failed to load config file '{}': {}", path, e))?
        }
        None => config_manager.discover_and_load().unwrap_or_default(),
    };

    let config = file_config.apply_to(BatchConfig::default())?;
    let config = env_config.apply_to(config);
    let config = apply_cli_args_to_config(config, args)?;

    Ok((config, file_config.output))
}

/// Apply CLI arguments to config (highest precedence).
fn apply_cli_args_to_config(
    mut config: BatchConfig,
    args: &Args,
) -> Result<BatchConfig, Box<dyn std::error::Error>> {
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(rate_limit) = args.rate_limit {
        config.rate_limit = rate_limit;
    }
    if let Some(window) = &args.window {
        config.window = parse_cli_duration("--window", window)?;
    }
    if let Some(interval) = &args.progress_interval {
        config.progress_interval = parse_cli_duration("--progress-interval", interval)?;
    }
    if let Some(timeout) = &args.timeout {
        config.item_timeout = Some(parse_cli_duration("--timeout", timeout)?);
    }
    Ok(config)
}

fn parse_cli_duration(flag: &str, value: &str) -> Result<std::time::Duration, String> {
    parse_duration_string(value).ok_or_else(|| {
        format!(
            "Invalid {} '{}'. Use a positive duration like '500ms', '5s', '2m'",
            flag, value
        )
    })
}

fn resolve_format(args: &Args, env_config: &EnvConfig, output: Option<&OutputConfig>) -> OutputFormat {
    if args.json {
        return OutputFormat::Json;
    }
    if args.csv {
        return OutputFormat::Csv;
    }
    if env_config.json == Some(true) {
        return OutputFormat::Json;
    }
    if env_config.csv == Some(true) {
        return OutputFormat::Csv;
    }
    match output.and_then(|o| o.default_format.as_deref()) {
        Some("json") => OutputFormat::Json,
        Some("csv") => OutputFormat::Csv,
        _ => OutputFormat::Text,
    }
}

fn build_operation(args: &Args) -> Result<Operation, String> {
    match (&args.exec, &args.url) {
        (Some(command), _) => Ok(Operation::Exec(ExecOperation::parse(command)?)),
        (None, Some(url)) => Ok(Operation::Http(HttpOperation::new(url)?)),
        (None, None) => Err("Specify an operation with --exec or --url".to_string()),
    }
}

fn load_items(args: &Args, env_config: &EnvConfig) -> Result<Vec<Item>, Box<dyn std::error::Error>> {
    let delimiter = args
        .delimiter
        .as_deref()
        .and_then(|d| d.chars().next())
        .unwrap_or('\t');

    match args.file.as_ref().or(env_config.file.as_ref()) {
        Some(path) => read_items_from_file(path, delimiter),
        None => {
            let stdin = std::io::stdin();
            if stdin.is_terminal() {
                return Err("No input: pass --file or pipe items on stdin".into());
            }
            parse_items(stdin.lock(), delimiter)
        }
    }
}

/// One output row, flattened for JSON.
#[derive(Debug, Serialize)]
struct OutputRecord<'a> {
    id: &'a str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<OperationErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

impl<'a> From<&'a ItemResult<String, String>> for OutputRecord<'a> {
    fn from(result: &'a ItemResult<String, String>) -> Self {
        match &result.outcome {
            Ok(value) => Self {
                id: &result.id,
                status: "succeeded",
                value: Some(value.as_str()),
                error_kind: None,
                error: None,
            },
            Err(e) => Self {
                id: &result.id,
                status: status_label(e.kind),
                value: None,
                error_kind: Some(e.kind),
                error: Some(e.message.as_str()),
            },
        }
    }
}

fn status_label(kind: OperationErrorKind) -> &'static str {
    match kind {
        OperationErrorKind::Cancelled => "cancelled",
        _ => "failed",
    }
}

/// Display results in JSON format
fn display_json_results(
    results: &[ItemResult<String, String>],
    pretty: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let records: Vec<OutputRecord> = results.iter().map(OutputRecord::from).collect();
    let json = if pretty {
        serde_json::to_string_pretty(&records)?
    } else {
        serde_json::to_string(&records)?
    };
    println!("{}", json);
    Ok(())
}

/// Display results in CSV format
fn display_csv_results(results: &[ItemResult<String, String>], headers: bool) {
    if headers {
        println!("id,status,value,error");
    }

    for result in results {
        let record = OutputRecord::from(result);
        println!(
            "{},{},{},{}",
            csv_field(record.id),
            record.status,
            csv_field(record.value.unwrap_or("")),
            csv_field(record.error.unwrap_or("")),
        );
    }
}

/// Display results in human-readable text format
fn display_text_results(
    results: &[ItemResult<String, String>],
    summary: &BatchSummary,
    duration: std::time::Duration,
) {
    for result in results {
        ui::print_result(result);
    }

    if results.len() > 1 {
        println!();
        ui::print_summary(summary, duration);
    }
}

/// Quote a CSV field when it contains a separator, quote or newline.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
