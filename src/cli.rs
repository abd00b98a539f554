//! Command-line interface definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use docpool::component::ComponentKind;
use docpool::settings::parse_port_range;
use std::path::PathBuf;

/// Analyze, render and convert documents in isolated worker processes.
#[derive(Parser, Debug)]
#[command(name = "docpool")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors and results.
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    pub quiet: bool,

    /// Disable colored output.
    #[arg(long, env = "NO_COLOR", global = true)]
    pub no_color: bool,

    /// Worker processes allowed at once (0 runs every job in this process).
    #[arg(long, env = "DOCPOOL_MAX_PROCESSES", global = true)]
    pub max_processes: Option<usize>,

    /// Port range for worker channels, as low-high.
    #[arg(long, env = "DOCPOOL_PORT_RANGE", value_parser = parse_port_range, global = true)]
    pub port_range: Option<(u16, u16)>,

    /// Milliseconds to wait for a worker to start listening.
    #[arg(long, env = "DOCPOOL_READY_TIMEOUT_MS", global = true)]
    pub ready_timeout_ms: Option<u64>,

    /// Job setting as key=value (repeatable).
    #[arg(short = 's', long = "set", value_name = "KEY=VALUE", global = true)]
    pub settings: Vec<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Report findings for a document.
    Analyze(AnalyzeArgs),

    /// Render pages of a document to PGM images.
    Render(RenderArgs),

    /// Convert a document to another format.
    Convert(ConvertArgs),

    /// Serve one job as a worker process (started by the dispatcher).
    #[command(hide = true)]
    InternalWorker(WorkerArgs),
}

/// Arguments for the analyze command.
#[derive(Parser, Debug)]
pub struct AnalyzeArgs {
    /// Document to analyze.
    pub file: PathBuf,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = OutputFormatArg::Plain)]
    pub format: OutputFormatArg,
}

/// Arguments for the render command.
#[derive(Parser, Debug)]
pub struct RenderArgs {
    /// Document to render.
    pub file: PathBuf,

    /// First page (1-based).
    #[arg(long, default_value_t = 1)]
    pub first: u32,

    /// Last page (defaults to the last page of the document).
    #[arg(long)]
    pub last: Option<u32>,

    /// Directory for the rendered pages.
    #[arg(short, long, default_value = ".")]
    pub out: PathBuf,
}

/// Arguments for the convert command.
#[derive(Parser, Debug)]
pub struct ConvertArgs {
    /// Document to convert.
    pub file: PathBuf,

    /// Target format (shorthand for `-s output_format=...`).
    #[arg(long, value_enum)]
    pub to: Option<ConvertFormat>,

    /// Write to this file instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the hidden worker entry point.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Component to export.
    #[arg(long)]
    pub kind: ComponentKind,

    /// Memory ceiling in MiB.
    #[arg(long)]
    pub max_memory: Option<u64>,
}

/// Output format argument.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormatArg {
    /// One finding per line.
    #[default]
    Plain,
    /// JSON lines.
    Json,
}

/// Conversion target.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConvertFormat {
    Text,
    Html,
    Markdown,
}

impl ConvertFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Html => "html",
            Self::Markdown => "markdown",
        }
    }
}

/// Verbosity level for output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Errors and results only.
    Quiet,
    /// Default: warnings too.
    Normal,
    /// -v: worker lifecycle.
    Info,
    /// -vv: dispatch state transitions.
    Debug,
}

impl Cli {
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            return Verbosity::Quiet;
        }
        match self.verbose {
            0 => Verbosity::Normal,
            1 => Verbosity::Info,
            _ => Verbosity::Debug,
        }
    }
}
