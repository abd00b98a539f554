//! docpool - document jobs in isolated worker processes.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr, Stream::Stdout};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use cli::{Cli, Commands, OutputFormatArg, Verbosity};
use docpool::component::{Analyzer, Converter, Renderer};
use docpool::document::WorkItem;
use docpool::logging::{self, LogConfig};
use docpool::pool::{await_exit_barrier, run_worker_main};
use docpool::result::Severity;
use docpool::settings::{JobSettings, PoolConfig, keys};

/// How long to wait for launched workers to exit before returning.
const EXIT_BARRIER_TIMEOUT: Duration = Duration::from_secs(30);

/// Program entry point: parses CLI arguments, runs the selected command, and
/// prints the error chain on failure.
///
/// Worker processes enter through the hidden `internal-worker` command and
/// never return from it.
fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        owo_colors::set_override(false);
    }
    init_logging(&cli);

    let result = match &cli.command {
        Commands::Analyze(args) => cmd_analyze(&cli, args),
        Commands::Render(args) => cmd_render(&cli, args),
        Commands::Convert(args) => cmd_convert(&cli, args),
        Commands::InternalWorker(args) => run_worker_main(args.kind, args.max_memory),
    };

    let stragglers = await_exit_barrier(EXIT_BARRIER_TIMEOUT);
    if stragglers > 0 {
        tracing::warn!(stragglers, "Workers still running at exit");
    }

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

fn init_logging(cli: &Cli) {
    let config = match cli.command {
        Commands::InternalWorker(_) => LogConfig::for_worker(),
        _ => LogConfig::for_cli(),
    };
    let config = match cli.verbosity() {
        Verbosity::Quiet => config.with_filter("error".to_string()),
        Verbosity::Normal => config,
        Verbosity::Info => config.with_filter("docpool=info".to_string()),
        Verbosity::Debug => config.with_filter("docpool=debug".to_string()),
    };
    logging::init(config.with_env_overrides());
}

/// Pool configuration: environment first, then CLI flags.
fn pool_config(cli: &Cli) -> Result<PoolConfig> {
    let mut config = PoolConfig::new()
        .with_env_overrides()
        .context("Invalid pool configuration in environment")?;

    if let Some(max) = cli.max_processes {
        config = config.with_max_process_count(max);
    }
    if let Some((low, high)) = cli.port_range {
        config = config.with_port_range(low, high);
    }
    if let Some(ms) = cli.ready_timeout_ms {
        config = config.with_ready_timeout(Duration::from_millis(ms));
    }
    config.validate()?;
    Ok(config)
}

fn job_settings(cli: &Cli) -> Result<JobSettings> {
    let mut settings = JobSettings::new();
    for pair in &cli.settings {
        settings.set_pair(pair)?;
    }
    Ok(settings)
}

fn load(path: &Path) -> Result<WorkItem> {
    WorkItem::from_path(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn cmd_analyze(cli: &Cli, args: &cli::AnalyzeArgs) -> Result<()> {
    use docpool::component::Capability;

    let item = load(&args.file)?;
    let analyzer = Analyzer::with_config(pool_config(cli)?);
    analyzer.copy_settings(job_settings(cli)?);

    let findings = analyzer.analyze(&item)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    for finding in findings.records() {
        match args.format {
            OutputFormatArg::Json => writeln!(out, "{}", serde_json::to_string(finding)?)?,
            OutputFormatArg::Plain => {
                let severity = format!("{:?}", finding.severity).to_lowercase();
                let severity = match finding.severity {
                    Severity::Error => severity
                        .if_supports_color(Stdout, |t| t.red())
                        .to_string(),
                    Severity::Warning => severity
                        .if_supports_color(Stdout, |t| t.yellow())
                        .to_string(),
                    Severity::Info => severity
                        .if_supports_color(Stdout, |t| t.dimmed())
                        .to_string(),
                };
                writeln!(
                    out,
                    "{}:{}:{} {} [{}] {}",
                    item.name, finding.page, finding.line, severity, finding.code, finding.message
                )?;
            }
        }
    }

    if cli.verbosity() >= Verbosity::Info {
        let stats = analyzer.dispatcher().stats();
        eprintln!(
            "{} findings, {} worker launches",
            findings.len(),
            stats.launches
        );
    }
    Ok(())
}

fn cmd_render(cli: &Cli, args: &cli::RenderArgs) -> Result<()> {
    use docpool::component::Capability;

    let item = load(&args.file)?;
    let last = args.last.unwrap_or_else(|| item.page_count());
    if !args.out.is_dir() {
        std::fs::create_dir_all(&args.out)
            .with_context(|| format!("Failed to create {}", args.out.display()))?;
    }

    let renderer = Renderer::with_config(pool_config(cli)?);
    renderer.copy_settings(job_settings(cli)?);
    let pages = renderer.render(&item, args.first, last)?;

    let stem = args
        .file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "page".to_string());
    for page in pages.records() {
        let path = args.out.join(format!("{}-{:03}.pgm", stem, page.page));
        std::fs::write(&path, page.to_pgm())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("{}", path.display());
    }
    Ok(())
}

fn cmd_convert(cli: &Cli, args: &cli::ConvertArgs) -> Result<()> {
    use docpool::component::Capability;

    let item = load(&args.file)?;
    let mut settings = job_settings(cli)?;
    if let Some(format) = args.to {
        settings.set(keys::OUTPUT_FORMAT, format.as_str());
    }

    let converter = Converter::with_config(pool_config(cli)?);
    converter.copy_settings(settings);
    let bytes = converter.convert(&item)?;

    match &args.output {
        Some(path) => std::fs::write(path, &bytes)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => std::io::stdout().write_all(&bytes)?,
    }
    Ok(())
}
