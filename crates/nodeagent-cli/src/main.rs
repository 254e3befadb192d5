mod commands;

use clap::{Parser, Subcommand};
use commands::{EXIT_CONFIG_ERROR, EXIT_NOT_ROOT};
use nodeagent_core::{install_signal_handler, AgentConfig, ShutdownSignal, DEFAULT_CONFIG_FILE};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "nodeagent",
    version,
    about = "Converges a Kubernetes node to the components of its cluster version"
)]
struct Cli {
    /// Path to the agent configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Converge the node, then watch it for upgrade requests (default).
    Run,
    /// Converge the node once and exit.
    Converge,
    /// Show the installed component versions.
    Versions,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("NODEAGENT_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let config = match AgentConfig::load_or_default(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let command = cli.command.unwrap_or(Commands::Run);
    if matches!(command, Commands::Run | Commands::Converge)
        && nodeagent_runtime::effective_uid() != 0
    {
        eprintln!("error: nodeagent must be run as root");
        return ExitCode::from(EXIT_NOT_ROOT);
    }

    let shutdown = ShutdownSignal::new();
    install_signal_handler(&shutdown);

    let result = match command {
        Commands::Run => commands::run::run(&config, &shutdown),
        Commands::Converge => commands::converge::run(&config, &shutdown, cli.json),
        Commands::Versions => commands::versions::run(&config, cli.json),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(failure) => {
            eprintln!("error: {failure}");
            ExitCode::from(failure.code)
        }
    }
}
