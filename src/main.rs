use clap::{ArgAction, Parser, Subcommand};
use diagsweep::{Analyzer, Config, OutputFormat, RemediationLevel, Reporter, RunOptions, SweepError};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "diagsweep")]
#[command(about = "Collect, fix and report compiler diagnostics across a monorepo")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan every build unit in a workspace
    Scan {
        /// Workspace root
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// Configuration file (defaults to <root>/diagsweep.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Automated remediation to apply
        #[arg(long = "fix", value_enum, default_value_t = RemediationLevel::None)]
        remediation: RemediationLevel,

        /// Only count diagnostics with these codes (comma separated)
        #[arg(long, value_delimiter = ',')]
        codes: Vec<String>,

        /// Only count diagnostics in matching files (substring or glob, comma separated)
        #[arg(long, value_delimiter = ',')]
        files: Vec<String>,

        /// Report format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Write the report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Scan units concurrently (default unless disabled in config)
        #[arg(long, conflicts_with = "sequential")]
        parallel: bool,

        /// Scan one unit at a time
        #[arg(long)]
        sequential: bool,

        /// Report what remediation would run without running it
        #[arg(long)]
        dry_run: bool,

        /// Rescan every unit instead of reusing cached reports (fresh reports are still cached)
        #[arg(long)]
        no_cache: bool,

        /// Upper bound on concurrently scanned units
        #[arg(long)]
        max_workers: Option<usize>,

        /// Do not attach source snippets to diagnostics
        #[arg(long)]
        no_snippets: bool,

        /// Ask the configured language model for extra fix suggestions
        #[arg(long)]
        suggest_ai: bool,
    },
    /// Generate a documented configuration file
    Config {
        /// Output path for the config file
        #[arg(short, long, default_value = "diagsweep.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Scan {
            root,
            config,
            remediation,
            codes,
            files,
            format,
            output,
            parallel,
            sequential,
            dry_run,
            no_cache,
            max_workers,
            no_snippets,
            suggest_ai,
        } => {
            let options = RunOptions {
                root,
                remediation,
                error_codes: codes,
                file_filters: files,
                format,
                output,
                dry_run,
                suggest_ai,
            };
            let overrides = ConfigOverrides {
                parallel: if sequential { Some(false) } else if parallel { Some(true) } else { None },
                no_cache,
                max_workers,
                no_snippets,
            };
            scan(config, overrides, options).await
        }
        Commands::Config { output } => generate_config(output).map(|_| ExitCode::SUCCESS),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            let code = e
                .downcast_ref::<SweepError>()
                .map(SweepError::exit_code)
                .unwrap_or(2);
            ExitCode::from(code)
        }
    }
}

struct ConfigOverrides {
    parallel: Option<bool>,
    no_cache: bool,
    max_workers: Option<usize>,
    no_snippets: bool,
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

async fn scan(
    config_path: Option<PathBuf>,
    overrides: ConfigOverrides,
    options: RunOptions,
) -> anyhow::Result<ExitCode> {
    let mut config = match config_path {
        Some(path) => Config::from_file(&path)?,
        None => Config::load(&options.root)?,
    };
    if let Some(parallel) = overrides.parallel {
        config.execution.parallel = parallel;
    }
    if overrides.no_cache {
        config.cache.reuse = false;
    }
    if let Some(max_workers) = overrides.max_workers {
        config.execution.max_workers = Some(max_workers);
    }
    if overrides.no_snippets {
        config.attach_snippets = false;
    }

    let format = options.format;
    let output = options.output.clone();
    let analyzer = Analyzer::new(config, options.clone());

    let cancel = analyzer.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current chunk");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let outcome = analyzer.execute().await?;

    let reporter = Reporter::new();
    let report = reporter.generate_report(&outcome, &options);
    reporter.export_report(&report, format, output.as_deref())?;
    if let Some(path) = &output {
        info!("Report written to {}", path.display());
    }

    info!(
        "Finished in {:.2}s: {} total, {} fixed, {} remaining",
        outcome.duration.as_secs_f64(),
        outcome.report.total_errors,
        outcome.report.fixed_errors,
        outcome.report.remaining_errors
    );

    Ok(ExitCode::from(outcome.exit_code()))
}

fn generate_config(config_path: PathBuf) -> anyhow::Result<()> {
    println!("📝 Generating configuration file: {}", config_path.display());

    std::fs::write(&config_path, Config::create_documented_config())?;

    println!("✅ Configuration file created successfully!");
    println!("💡 Edit the file to customize checker, remediation and cache settings.");

    Ok(())
}
