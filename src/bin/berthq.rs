//! berthq CLI - Command-line interface for berthq
//!
//! Commands:
//! - label: Turn raw position reports or port logs into waiting-time labels
//! - features: Clip, enrich and fold-split labeled rows into a training set
//! - folds: Draw temporal folds over labeled rows
//! - query: Serve online features for a live arrival
//! - doctor: Diagnose configuration and artifacts

use clap::{Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use berthq::pipeline::{label_positions, prepare_training_set};
use berthq::types::{LabeledRow, PortLogEntry, RawPositionRecord};
use berthq::{
    labels_from_port_log, temporal_folds, BerthConfig, HistoryIndex, LineupVessel, LiveQuery,
    OnlineFeatures, BERTHQ_VERSION,
};

/// berthq - Causal queue state and waiting-time features for vessel berthing
#[derive(Parser)]
#[command(name = "berthq")]
#[command(version = BERTHQ_VERSION)]
#[command(about = "Label vessel waiting times and derive leakage-free features", long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Turn raw position reports or port logs into waiting-time labels
    Label {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long)]
        output: PathBuf,

        /// Configuration file (TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// What the input records are
        #[arg(long, default_value = "positions")]
        source: LabelSource,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Write the run summary to this file
        #[arg(long)]
        summary: Option<PathBuf>,
    },

    /// Clip, enrich and fold-split labeled rows into a training set
    Features {
        /// Labeled rows (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Feature rows output (use - for stdout)
        #[arg(short, long)]
        output: PathBuf,

        /// Configuration file (TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Save the history index for online serving
        #[arg(long)]
        save_index: Option<PathBuf>,

        /// Save the folds as JSON
        #[arg(long)]
        save_folds: Option<PathBuf>,
    },

    /// Draw temporal folds over labeled rows without clipping
    Folds {
        /// Labeled rows (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Number of folds
        #[arg(long, default_value = "5")]
        n_splits: usize,

        /// Days excluded between train and validation
        #[arg(long, default_value = "7")]
        gap_days: i64,
    },

    /// Serve online features for a live arrival
    Query {
        /// History index produced by `features --save-index`
        #[arg(long)]
        index: PathBuf,

        /// Configuration file (TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Query JSON (use - for stdin)
        #[arg(short, long)]
        query: PathBuf,

        /// Current lineup of the terminal as a JSON array
        #[arg(long)]
        lineup: Option<PathBuf>,
    },

    /// Diagnose configuration and artifacts
    Doctor {
        /// Check a configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Check a history index file
        #[arg(long)]
        index: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum LabelSource {
    /// AIS position reports
    Positions,
    /// Port authority arrival/berthing log
    PortLog,
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), BerthCliError> {
    match cli.command {
        Commands::Label {
            input,
            output,
            config,
            source,
            input_format,
            output_format,
            summary,
        } => cmd_label(
            &input,
            &output,
            &config,
            source,
            input_format,
            output_format,
            summary.as_deref(),
        ),

        Commands::Features {
            input,
            output,
            config,
            input_format,
            output_format,
            save_index,
            save_folds,
        } => cmd_features(
            &input,
            &output,
            &config,
            input_format,
            output_format,
            save_index.as_deref(),
            save_folds.as_deref(),
        ),

        Commands::Folds {
            input,
            input_format,
            n_splits,
            gap_days,
        } => cmd_folds(&input, input_format, n_splits, gap_days),

        Commands::Query {
            index,
            config,
            query,
            lineup,
        } => cmd_query(&index, &config, &query, lineup.as_deref()),

        Commands::Doctor {
            config,
            index,
            json,
        } => cmd_doctor(config.as_deref(), index.as_deref(), json),
    }
}

fn cmd_label(
    input: &Path,
    output: &Path,
    config_path: &Path,
    source: LabelSource,
    input_format: InputFormat,
    output_format: OutputFormat,
    summary_path: Option<&Path>,
) -> Result<(), BerthCliError> {
    let config = BerthConfig::from_file(config_path)?;
    let input_data = read_input(input)?;

    let (rows, summary_json) = match source {
        LabelSource::Positions => {
            let raw: Vec<RawPositionRecord> = parse_records(&input_data, &input_format)?;
            if raw.is_empty() {
                return Err(BerthCliError::NoRecords);
            }
            let (rows, summary) = label_positions(&raw, &config)?;
            (rows, serde_json::to_string_pretty(&summary)?)
        }
        LabelSource::PortLog => {
            let entries: Vec<PortLogEntry> = parse_records(&input_data, &input_format)?;
            if entries.is_empty() {
                return Err(BerthCliError::NoRecords);
            }
            let (rows, summary) = labels_from_port_log(&entries);
            (rows, serde_json::to_string_pretty(&summary)?)
        }
    };

    if let Some(path) = summary_path {
        fs::write(path, summary_json)?;
    }

    write_output(output, &format_output(&rows, &output_format)?)
}

fn cmd_features(
    input: &Path,
    output: &Path,
    config_path: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    save_index: Option<&Path>,
    save_folds: Option<&Path>,
) -> Result<(), BerthCliError> {
    let config = BerthConfig::from_file(config_path)?;
    let rows: Vec<LabeledRow> = parse_records(&read_input(input)?, &input_format)?;
    if rows.is_empty() {
        return Err(BerthCliError::NoRecords);
    }

    let set = prepare_training_set(rows, &config)?;

    if let Some(path) = save_index {
        fs::write(path, set.index.to_json()?)?;
    }
    if let Some(path) = save_folds {
        fs::write(path, serde_json::to_string_pretty(&set.folds)?)?;
    }

    write_output(output, &format_output(&set.rows, &output_format)?)
}

fn cmd_folds(
    input: &Path,
    input_format: InputFormat,
    n_splits: usize,
    gap_days: i64,
) -> Result<(), BerthCliError> {
    let mut rows: Vec<LabeledRow> = parse_records(&read_input(input)?, &input_format)?;
    if rows.is_empty() {
        return Err(BerthCliError::NoRecords);
    }
    rows.sort_by_key(|row| row.arrival_time());

    let folds = temporal_folds(&rows, |row| row.arrival_time(), n_splits, gap_days)?;
    println!("{}", serde_json::to_string_pretty(&folds)?);
    Ok(())
}

fn cmd_query(
    index_path: &Path,
    config_path: &Path,
    query_path: &Path,
    lineup_path: Option<&Path>,
) -> Result<(), BerthCliError> {
    let config = BerthConfig::from_file(config_path)?;
    let index = HistoryIndex::from_json(&fs::read_to_string(index_path)?)?;
    let query: LiveQuery = serde_json::from_str(&read_input(query_path)?)?;
    let lineup: Vec<LineupVessel> = match lineup_path {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => Vec::new(),
    };

    let features = OnlineFeatures::query(&index, &lineup, &query, &config)?;
    println!("{}", serde_json::to_string(&features)?);
    Ok(())
}

fn cmd_doctor(
    config_path: Option<&Path>,
    index_path: Option<&Path>,
    json: bool,
) -> Result<(), BerthCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "berthq_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("berthq version {}", BERTHQ_VERSION),
    });

    if let Some(path) = config_path {
        let check = match BerthConfig::from_file(path) {
            Ok(config) if config.terminals.is_empty() => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Warning,
                message: "Configuration is valid but defines no terminals".to_string(),
            },
            Ok(config) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "Configuration valid ({} terminals, {} folds, {}-day gap)",
                    config.terminals.len(),
                    config.splitter.n_splits,
                    config.splitter.gap_days
                ),
            },
            Err(e) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            },
        };
        checks.push(check);
    }

    if let Some(path) = index_path {
        let check = if !path.exists() {
            DoctorCheck {
                name: "index".to_string(),
                status: CheckStatus::Warning,
                message: "History index file does not exist".to_string(),
            }
        } else {
            match fs::read_to_string(path) {
                Ok(content) => match HistoryIndex::from_json(&content) {
                    Ok(index) => DoctorCheck {
                        name: "index".to_string(),
                        status: CheckStatus::Ok,
                        message: format!(
                            "History index valid ({} ports, {} terminals)",
                            index.port_count(),
                            index.terminal_count()
                        ),
                    },
                    Err(e) => DoctorCheck {
                        name: "index".to_string(),
                        status: CheckStatus::Error,
                        message: format!("Invalid history index JSON: {}", e),
                    },
                },
                Err(e) => DoctorCheck {
                    name: "index".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot read history index: {}", e),
                },
            }
        };
        checks.push(check);
    }

    // Check stdin is available (for piped input)
    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (ready for - inputs)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        version: BERTHQ_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("berthq Doctor Report");
        println!("====================");
        println!("Version: {}", report.version);
        println!();
        for check in &report.checks {
            let marker = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("{} {}: {}", marker, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(BerthCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// I/O helpers

fn read_input(path: &Path) -> Result<String, BerthCliError> {
    if path.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn write_output(path: &Path, data: &str) -> Result<(), BerthCliError> {
    if path.to_string_lossy() == "-" {
        print!("{}", data);
    } else {
        fs::write(path, data)?;
    }
    Ok(())
}

fn parse_records<T: DeserializeOwned>(
    data: &str,
    format: &InputFormat,
) -> Result<Vec<T>, BerthCliError> {
    match format {
        InputFormat::Json => Ok(serde_json::from_str(data)?),
        InputFormat::Ndjson => data
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line.trim()).map_err(|e| {
                    BerthCliError::ParseError(format!("line {}: {}", i + 1, e))
                })
            })
            .collect(),
    }
}

fn format_output<T: Serialize>(records: &[T], format: &OutputFormat) -> Result<String, BerthCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut output = String::new();
            for record in records {
                output.push_str(&serde_json::to_string(record)?);
                output.push('\n');
            }
            Ok(output)
        }
        OutputFormat::Json => Ok(serde_json::to_string(records)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(records)?),
    }
}

// Error types

#[derive(Debug)]
enum BerthCliError {
    Io(io::Error),
    Compute(berthq::ComputeError),
    Json(serde_json::Error),
    NoRecords,
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for BerthCliError {
    fn from(e: io::Error) -> Self {
        BerthCliError::Io(e)
    }
}

impl From<berthq::ComputeError> for BerthCliError {
    fn from(e: berthq::ComputeError) -> Self {
        BerthCliError::Compute(e)
    }
}

impl From<serde_json::Error> for BerthCliError {
    fn from(e: serde_json::Error) -> Self {
        BerthCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<BerthCliError> for CliError {
    fn from(e: BerthCliError) -> Self {
        use berthq::ComputeError;

        match e {
            BerthCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            BerthCliError::Compute(e) => {
                let (code, hint) = match &e {
                    ComputeError::ConfigError(_) => {
                        ("CONFIG_ERROR", "Run 'berthq doctor --config <file>' for details")
                    }
                    ComputeError::SplitUnavailable(_) => {
                        ("SPLIT_UNAVAILABLE", "Provide a longer history or reduce n_splits/gap_days")
                    }
                    ComputeError::NoLabeledRows(_) => {
                        ("NO_LABELED_ROWS", "Label more berthings before training")
                    }
                    ComputeError::UnknownTerminal(_) => {
                        ("UNKNOWN_TERMINAL", "Add the terminal to the configuration file")
                    }
                    _ => ("COMPUTE_ERROR", "Check input records and parameters"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            BerthCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            BerthCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No records found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            BerthCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            BerthCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Check input format".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
