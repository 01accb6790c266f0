use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use forge::config::{self, Config};
use forge::{
    BuildInspector, BuildParams, BuildRecord, BuildStore, ConfigurationRecord, ConfigureParams,
    Error,
};

/// Forge - records toolchain, diagnostics and targets of cmake builds
#[derive(Parser)]
#[command(name = "forge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Build history database
    #[arg(long, env = "FORGE_DATABASE")]
    database: Option<PathBuf>,

    /// cmake executable
    #[arg(long, env = "FORGE_CMAKE")]
    cmake: Option<String>,

    /// Print a summary after the tool finishes
    #[arg(long, global = true)]
    summary: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configure step
    Configure(ConfigureArgs),
    /// Run the build step against an existing build directory
    Build(BuildArgs),
    /// Configure, then build
    Run {
        #[command(flatten)]
        configure: ConfigureArgs,
        /// Target to build (repeatable)
        #[arg(long = "target")]
        targets: Vec<String>,
        /// Parallel build jobs
        #[arg(short = 'j', long = "parallel")]
        parallel_jobs: Option<u32>,
    },
    /// Show recent builds
    History {
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
        /// Restrict to one project
        #[arg(long)]
        project: Option<String>,
        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show aggregate build statistics
    Stats {
        /// Restrict to one project
        #[arg(long)]
        project: Option<String>,
    },
}

#[derive(Args)]
struct ConfigureArgs {
    /// Source directory
    #[arg(short = 'S', long, default_value = ".")]
    source_dir: PathBuf,
    /// Build directory
    #[arg(short = 'B', long, default_value = "build")]
    build_dir: PathBuf,
    /// Generator, e.g. Ninja
    #[arg(short = 'G', long)]
    generator: Option<String>,
    /// CMAKE_BUILD_TYPE
    #[arg(long)]
    build_type: Option<String>,
    /// Extra arguments passed to cmake after `--`
    #[arg(last = true)]
    cmake_args: Vec<String>,
}

#[derive(Args)]
struct BuildArgs {
    /// Build directory
    #[arg(short = 'B', long, default_value = "build")]
    build_dir: PathBuf,
    /// Target to build (repeatable)
    #[arg(long = "target")]
    targets: Vec<String>,
    /// Parallel build jobs
    #[arg(short = 'j', long = "parallel")]
    parallel_jobs: Option<u32>,
}

impl From<ConfigureArgs> for ConfigureParams {
    fn from(args: ConfigureArgs) -> Self {
        ConfigureParams {
            source_dir: args.source_dir,
            build_dir: args.build_dir,
            generator: args.generator,
            build_type: args.build_type,
            cmake_args: args.cmake_args,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load().unwrap_or_default();
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(database) = &cli.database {
        config.database_path = database.clone();
    }
    if let Some(cmake) = &cli.cmake {
        config.cmake_command = cmake.clone();
    }

    init_logging(&config.log_level)?;

    let code = match cli.command {
        Commands::Configure(args) => {
            run_tool(&config, cli.summary, Action::Configure(args.into()))?
        }
        Commands::Build(args) => run_tool(
            &config,
            cli.summary,
            Action::Build(BuildParams {
                build_dir: args.build_dir,
                targets: args.targets,
                parallel_jobs: args.parallel_jobs,
            }),
        )?,
        Commands::Run {
            configure,
            targets,
            parallel_jobs,
        } => {
            let build = BuildParams {
                build_dir: configure.build_dir.clone(),
                targets,
                parallel_jobs,
            };
            run_tool(&config, cli.summary, Action::Run(configure.into(), build))?
        }
        Commands::History {
            limit,
            project,
            json,
        } => {
            show_history(&config, limit, project.as_deref(), json)?;
            0
        }
        Commands::Stats { project } => {
            show_stats(&config, project.as_deref())?;
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let log_dir = config::data_dir();
    std::fs::create_dir_all(&log_dir)?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("forge.log"))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(log_file),
        )
        .init();

    info!("Forge starting");
    Ok(())
}

enum Action {
    Configure(ConfigureParams),
    Build(BuildParams),
    Run(ConfigureParams, BuildParams),
}

type Outcome = (Option<ConfigurationRecord>, Option<BuildRecord>);

/// Run one inspector action and map its outcome to a process exit code
fn run_tool(config: &Config, summary: bool, action: Action) -> Result<i32> {
    let mut inspector =
        BuildInspector::from_config(config).context("Failed to open build store")?;

    let runtime = tokio::runtime::Runtime::new()?;
    let outcome: forge::Result<Outcome> = runtime.block_on(async {
        match action {
            Action::Configure(params) => inspector
                .run_configure(&params)
                .await
                .map(|c| (Some(c), None)),
            Action::Build(params) => inspector.run_build(&params).await.map(|b| (None, Some(b))),
            Action::Run(configure, build) => inspector
                .run(&configure, &build)
                .await
                .map(|(c, b)| (Some(c), Some(b))),
        }
    });

    match outcome {
        Ok((configuration, build)) => {
            if summary {
                print_summary(configuration.as_ref(), build.as_ref());
            }
            Ok(0)
        }
        Err(e) => {
            error!("{}", e);
            if summary {
                match &e {
                    Error::ConfigurationFailed(record) => print_summary(Some(&**record), None),
                    Error::BuildFailed(record) => print_summary(None, Some(&**record)),
                    _ => {}
                }
            }
            // The tool's own output already explains a failed step
            if !matches!(e, Error::ConfigurationFailed(_) | Error::BuildFailed(_)) {
                eprintln!("forge: {}", e);
            }
            Ok(e.exit_code())
        }
    }
}

fn print_summary(configuration: Option<&ConfigurationRecord>, build: Option<&BuildRecord>) {
    if let Some(c) = configuration {
        eprintln!(
            "forge: configure #{} {} in {:.2}s ({} / {} / cmake {})",
            c.id.unwrap_or_default(),
            if c.success { "succeeded" } else { "failed" },
            c.duration_secs,
            c.generator,
            c.compiler_cxx,
            c.cmake_version,
        );
    }
    if let Some(b) = build {
        eprintln!(
            "forge: build #{} {} in {:.2}s, {} warnings, {} errors, {} targets",
            b.id.unwrap_or_default(),
            if b.success { "succeeded" } else { "failed" },
            b.duration_secs,
            b.warnings_count(),
            b.errors_count(),
            b.targets_built.len(),
        );
    }
}

fn show_history(config: &Config, limit: usize, project: Option<&str>, json: bool) -> Result<()> {
    let store = BuildStore::open(&config.database_path, &config.store)
        .context("Failed to open build store")?;
    let builds = store.get_recent_builds(limit, project)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&builds)?);
        return Ok(());
    }

    for b in &builds {
        println!(
            "#{:<5} {}  {:<20} {:<7} exit={:<4} {:>8.2}s  W:{:<4} E:{:<4} targets:{}",
            b.id.unwrap_or_default(),
            b.timestamp.format("%Y-%m-%d %H:%M:%S"),
            b.project_name,
            if b.success { "ok" } else { "FAILED" },
            b.exit_code,
            b.duration_secs,
            b.warnings_count(),
            b.errors_count(),
            b.targets_built.len(),
        );
    }
    Ok(())
}

fn show_stats(config: &Config, project: Option<&str>) -> Result<()> {
    let store = BuildStore::open(&config.database_path, &config.store)
        .context("Failed to open build store")?;
    let stats = store.get_build_statistics(project)?;

    println!("Builds:        {}", stats.total);
    println!("Successful:    {}", stats.successful);
    println!("Failed:        {}", stats.failed);
    println!("Success rate:  {:.1}%", stats.success_rate);
    println!("Avg duration:  {:.2}s", stats.avg_duration_secs);
    println!("Warnings:      {}", stats.total_warnings);
    println!("Errors:        {}", stats.total_errors);
    Ok(())
}
