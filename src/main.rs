//! Purpose: `ciftikit` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Every command prints exactly one JSON document on stdout on success.
//! Invariants: Non-interactive errors and notices are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `to_exit_code`.
//! Invariants: Output files are only written through `CiftiMatrix` writers (locked).
#![allow(clippy::result_large_err)]
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod command_dispatch;
mod matrix_info_json;

use ciftikit::core::matrix::{CacheMode, CiftiMatrix, CreateOptions};
use ciftikit::notice::{Notice, notice_json};
use ciftikit::{Error, ErrorKind, to_exit_code};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Internal)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                let message = clap_error_summary(&err);
                let hint = clap_error_hint(&err);
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(message)
                        .with_hint(hint),
                    ColorMode::Auto,
                ));
            }
        },
    };

    init_tracing();
    let color_mode = cli.color;
    command_dispatch::dispatch_command(cli.command, color_mode)
        .map_err(add_file_access_hint)
        .map_err(add_mismatch_hint)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

#[derive(Parser)]
#[command(
    name = "ciftikit",
    version,
    about = "Stream CIFTI-2 connectivity matrices with bounded memory",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"Matrices are float32 rows inside a NIFTI-2 file; the CIFTI XML says what
each row and column index means (vertices, voxels, parcels, labels, timepoints).
"#,
    after_help = r#"EXAMPLES
  $ ciftikit info sub01.dtseries.nii
  $ ciftikit average group.dscalar.nii sub01.dscalar.nii sub02.dscalar.nii
  $ ciftikit transpose conn.dconn.nii conn_t.dconn.nii --mem-limit 512

LOGGING
  RUST_LOG=debug shows algorithm phases and transpose passes on stderr."#,
    arg_required_else_help = true,
    disable_help_subcommand = false
)]
struct Cli {
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Describe a CIFTI file",
        long_about = "Print dimensions, intent, byte order, and both mapping models as JSON.",
        after_help = r#"EXAMPLES
  $ ciftikit info sub01.dtseries.nii"#
    )]
    Info {
        #[arg(help = "CIFTI file", value_hint = ValueHint::FilePath)]
        file: PathBuf,
    },
    #[command(
        about = "Average matrices with identical mappings",
        long_about = r#"Average inputs row by row into OUTPUT.

All inputs must have the same row and column mappings. Weights are normalized
by their sum; inputs weighted zero are never read."#,
        after_help = r#"EXAMPLES
  $ ciftikit average mean.dscalar.nii a.dscalar.nii b.dscalar.nii
  $ ciftikit average mean.dscalar.nii a.dscalar.nii b.dscalar.nii --weights 3,1"#
    )]
    Average {
        #[arg(help = "Output file", value_hint = ValueHint::FilePath)]
        output: PathBuf,
        #[arg(required = true, help = "Input files", value_hint = ValueHint::FilePath)]
        inputs: Vec<PathBuf>,
        #[arg(long, value_delimiter = ',', help = "One weight per input (comma-separated)")]
        weights: Option<Vec<f64>>,
        #[arg(long, help = "Hold the output matrix in memory and write it at the end")]
        in_memory: bool,
    },
    #[command(
        about = "Correlate matching rows of two matrices",
        long_about = r#"Write one value per row: the Pearson correlation of row i of A with row i of B.

A and B must have matching row mappings and equal row lengths. Rows with zero
variance produce NaN."#,
        after_help = r#"EXAMPLES
  $ ciftikit correlate run1.dtseries.nii run2.dtseries.nii r.dscalar.nii --fisher-z"#
    )]
    Correlate {
        #[arg(help = "First input", value_hint = ValueHint::FilePath)]
        a: PathBuf,
        #[arg(help = "Second input", value_hint = ValueHint::FilePath)]
        b: PathBuf,
        #[arg(help = "Output file", value_hint = ValueHint::FilePath)]
        output: PathBuf,
        #[arg(long, help = "Apply the Fisher z-transform to each correlation")]
        fisher_z: bool,
        #[arg(long, help = "Do not subtract row means before correlating")]
        no_demean: bool,
    },
    #[command(
        name = "roi-average",
        about = "Average dense rows selected by an ROI",
        long_about = r#"Average every row selected by the ROI (value > 0) across all inputs.

Each column of the dense ROI file is a separate ROI and gets its own output
column; --roi-column restricts this to one. Structures missing from an input
are skipped with a notice. The output has one row per input column."#,
        after_help = r#"EXAMPLES
  $ ciftikit roi-average motor.nii --cifti a.dtseries.nii --cifti b.dtseries.nii --roi motor.dscalar.nii"#
    )]
    RoiAverage {
        #[arg(help = "Output file", value_hint = ValueHint::FilePath)]
        output: PathBuf,
        #[arg(long = "cifti", required = true, help = "Dense input file (repeatable)", value_hint = ValueHint::FilePath)]
        inputs: Vec<PathBuf>,
        #[arg(long, help = "Dense file holding the ROI", value_hint = ValueHint::FilePath)]
        roi: PathBuf,
        #[arg(long, help = "Use only this column of the ROI file")]
        roi_column: Option<usize>,
    },
    #[command(
        about = "Transpose a matrix with a memory limit",
        long_about = r#"Swap rows and columns (and their mappings).

With --mem-limit, only as many output rows as fit are held in memory and the
input is re-read once per chunk."#,
        after_help = r#"EXAMPLES
  $ ciftikit transpose conn.dconn.nii conn_t.dconn.nii --mem-limit 512"#
    )]
    Transpose {
        #[arg(help = "Input file", value_hint = ValueHint::FilePath)]
        input: PathBuf,
        #[arg(help = "Output file", value_hint = ValueHint::FilePath)]
        output: PathBuf,
        #[arg(long, value_name = "MiB", help = "Memory for resident output rows, in MiB")]
        mem_limit: Option<u64>,
    },
    #[command(
        name = "label-remap",
        about = "Change label keys and rewrite the cells that use them",
        long_about = r#"Remap label keys in a label file.

Keys displaced by a remap target get the smallest unused key, reported as a notice.
The unassigned label keeps its identity."#,
        after_help = r#"EXAMPLES
  $ ciftikit label-remap parc.dlabel.nii out.dlabel.nii --pair 3:5 --pair 5:8
  $ ciftikit label-remap parc.dlabel.nii out.dlabel.nii --remap-file keys.txt --map 0"#
    )]
    LabelRemap {
        #[arg(help = "Input label file", value_hint = ValueHint::FilePath)]
        input: PathBuf,
        #[arg(help = "Output file", value_hint = ValueHint::FilePath)]
        output: PathBuf,
        #[arg(
            long,
            conflicts_with = "pairs",
            required_unless_present = "pairs",
            help = "Text file with one `old new` pair per line",
            value_hint = ValueHint::FilePath
        )]
        remap_file: Option<PathBuf>,
        #[arg(long = "pair", value_name = "OLD:NEW", help = "Remap one key (repeatable)")]
        pairs: Vec<String>,
        #[arg(long, value_name = "IDX", help = "Only remap this label map")]
        map: Option<usize>,
    },
    #[command(
        about = "Generate shell completions",
        after_help = r#"EXAMPLES
  $ ciftikit completion bash > ~/.local/share/bash-completion/completions/ciftikit
  $ ciftikit completion zsh > ~/.zfunc/_ciftikit"#
    )]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Opens every input; the handles are released together on any exit path.
fn open_inputs(paths: &[PathBuf]) -> Result<Vec<CiftiMatrix>, Error> {
    paths
        .iter()
        .map(|path| CiftiMatrix::open(path, CacheMode::OnDisk))
        .collect()
}

fn create_output(path: &Path, in_memory: bool) -> Result<CiftiMatrix, Error> {
    let mode = if in_memory {
        CacheMode::InMemory
    } else {
        CacheMode::OnDisk
    };
    CiftiMatrix::create(path, CreateOptions::new(mode))
}

fn parse_pair(input: &str) -> Result<(i32, i32), Error> {
    let parsed = input
        .split_once(':')
        .and_then(|(old, new)| {
            old.trim()
                .parse::<i32>()
                .ok()
                .zip(new.trim().parse::<i32>().ok())
        });
    parsed.ok_or_else(|| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid remap pair '{input}'"))
            .with_hint("Use OLD:NEW with integer keys, for example `--pair 3:5`.")
    })
}

fn mem_limit_bytes(mib: u64) -> Result<u64, Error> {
    if mib == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--mem-limit must be at least 1 MiB"));
    }
    mib.checked_mul(1024 * 1024).ok_or_else(|| {
        Error::new(ErrorKind::Usage).with_message(format!("--mem-limit {mib} MiB is too large"))
    })
}

fn report_json<T: serde::Serialize>(report: &T) -> Result<Value, Error> {
    serde_json::to_value(report).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode report")
            .with_source(err)
    })
}

fn add_file_access_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::FileAccess || err.hint().is_some() {
        return err;
    }
    err.with_hint("Check that the path exists, is readable, and is not open in another ciftikit writer.")
}

fn add_mismatch_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::MappingTypeMismatch | ErrorKind::StructureMismatch => {
            err.with_hint("Compare the files with `ciftikit info`; their mappings must agree.")
        }
        ErrorKind::Format => {
            err.with_hint("The file is not a valid CIFTI-2 matrix (NIFTI-2, float32, version 2 XML).")
        }
        _ => err,
    }
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with RUST_LOG=debug and share command/context if it persists.",
    )
}

fn emit_json(value: Value) {
    let pretty = io::stdout().is_terminal();
    let json = if pretty {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn emit_notice(notice: &Notice, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        let label = colorize_label("notice:", color_mode.use_color(is_tty), AnsiColor::Yellow);
        eprintln!("{label} {} (file: {})", notice.message, notice.file);
        return;
    }

    let value = notice_json(notice);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"notice\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::FileAccess => "file access failed".to_string(),
        ErrorKind::Format => "malformed CIFTI file".to_string(),
        ErrorKind::DimensionMismatch => "dimension mismatch".to_string(),
        ErrorKind::MappingTypeMismatch => "mapping type mismatch".to_string(),
        ErrorKind::StructureMismatch => "structure mismatch".to_string(),
        ErrorKind::DuplicateOrMissingInput => "duplicate or missing input".to_string(),
        ErrorKind::EmptyResult => "empty result".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(row) = err.row() {
        inner.insert("row".to_string(), json!(row));
    }
    if let Some(key) = err.key() {
        inner.insert("key".to_string(), json!(key));
    }
    if let Some(offset) = err.offset() {
        inner.insert("offset".to_string(), json!(offset));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    ));

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(path) = err.path() {
        lines.push(format!(
            "{} {}",
            colorize_label("path:", use_color, AnsiColor::Yellow),
            path.display()
        ));
    }
    if let Some(row) = err.row() {
        lines.push(format!(
            "{} {row}",
            colorize_label("row:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(key) = err.key() {
        lines.push(format!(
            "{} {key}",
            colorize_label("key:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(offset) = err.offset() {
        lines.push(format!(
            "{} {offset}",
            colorize_label("offset:", use_color, AnsiColor::Yellow)
        ));
    }

    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);

    let Some(usage) = usage else {
        return "Try `ciftikit --help`.".to_string();
    };

    let tokens: Vec<&str> = usage.split_whitespace().collect();
    let Some(pos) = tokens.iter().position(|t| *t == "ciftikit") else {
        return "Try `ciftikit --help`.".to_string();
    };

    let parts: Vec<&str> = tokens
        .iter()
        .skip(pos + 1)
        .take_while(|token| !(token.starts_with('-') || token.starts_with('<') || token.starts_with('[')))
        .copied()
        .collect();

    if parts.is_empty() {
        return "Try `ciftikit --help`.".to_string();
    }
    format!("Try `ciftikit {} --help`.", parts.join(" "))
}
