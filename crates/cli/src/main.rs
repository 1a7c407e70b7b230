//! servechat CLI: the main entry point.
//!
//! Commands:
//! - `ask`      : Send one message through the tool-calling loop
//! - `serve`    : Start the HTTP API
//! - `feedback` : Attach a rating to a recorded trace
//! - `config`   : Print the effective configuration

use clap::{Parser, Subcommand};
use servechat_telemetry::Rating;
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "servechat",
    about = "Tool-calling chat over a model serving endpoint",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ~/.servechat/config.toml)
    #[arg(short, long, global = true, env = "SERVECHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a single message and print the answer plus the transcript
    Ask {
        /// The user message
        #[arg(short, long)]
        message: String,

        /// Print machine-readable JSON instead of text
        #[arg(long)]
        json: bool,

        /// Override agent.max_iterations
        #[arg(long)]
        max_iterations: Option<usize>,
    },

    /// Start the HTTP API server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Record feedback for a trace in the trace file
    Feedback {
        /// Trace id printed by `ask` or returned by the API
        #[arg(long)]
        trace_id: String,

        /// up / down, a number, or free text
        #[arg(long)]
        rating: Rating,

        /// Optional comment
        #[arg(long)]
        comment: Option<String>,

        /// Assessment name
        #[arg(long, default_value = "user_feedback")]
        name: String,
    },

    /// Print the effective configuration as TOML (secrets redacted)
    Config,
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    // Logs go to stderr so `ask --json` output stays parseable
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Ask {
            message,
            json,
            max_iterations,
        } => commands::ask::run(config, message, json, max_iterations).await?,
        Commands::Serve { port } => commands::serve::run(config, port).await?,
        Commands::Feedback {
            trace_id,
            rating,
            comment,
            name,
        } => commands::feedback::run(&config, &trace_id, &name, rating, comment)?,
        Commands::Config => commands::config_cmd::show(&config)?,
    }

    Ok(())
}
