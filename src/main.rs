mod chat;
mod cli;
mod color;
mod config;
mod prober;
mod providers;
mod registry;
mod resolver;
mod server;
mod session;
mod utils;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use cli::{
    complete::complete_cmd, list::list_cmd, probe::probe_cmd, serve::serve_cmd, ColorMode,
};
use tracing_subscriber::EnvFilter;

#[derive(
    Parser, Default, Clone, Copy, ValueEnum, strum_macros::Display, strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum RequestedColorMode {
    #[default]
    Auto,
    On,
    Off,
}

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(
    about = "A gateway that routes chat completions across many free providers",
    version = "0.0.1-alpha.1"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    /// Read the configuration from the specified file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true, default_value_t = RequestedColorMode::default())]
    color: RequestedColorMode,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the completion API (the default)
    Serve(ServeArgs),
    /// List the providers or models of the directory
    List(ListArgs),
    /// Probe every eligible provider once and report which are live
    Probe(ProbeArgs),
    /// Complete a single prompt, streaming the reply
    Complete(CompleteArgs),
}

#[derive(Parser, Default)]
pub(crate) struct ServeArgs {
    /// Listen on the specified address instead of the configured one
    #[arg(short, long)]
    bind: Option<String>,
}

#[derive(Parser, Default)]
pub(crate) struct CompleteArgs {
    /// Request the specified model
    #[arg(short, long)]
    model: Option<String>,
    /// Request the specified provider
    #[arg(short, long)]
    provider: Option<String>,
    /// Specify the prompt, read from standard input when absent
    prompt: Option<String>,
}

/// Possible listings
#[derive(Subcommand)]
pub(crate) enum ListObject {
    /// Providers, in registration order
    Providers,
    /// Models, in preference order
    Models,
}

/// Output formats
#[derive(
    Parser, ValueEnum, Default, Clone, Copy, strum_macros::Display, strum_macros::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum ListingFormat {
    /// Format the output as a table
    #[default]
    Table,
    /// Format the output as JSON
    Json,
    /// Format the output as a table without a header
    HeaderlessTable,
}

#[derive(Parser)]
pub(crate) struct ListArgs {
    /// Output the listing with the specified format
    #[arg(short, long, default_value_t = ListingFormat::default())]
    format: ListingFormat,
    /// List the specified object
    #[command(subcommand)]
    object: ListObject,
}

#[derive(Parser, Default)]
pub(crate) struct ProbeArgs {
    /// Output the results with the specified format
    #[arg(short, long, default_value_t = ListingFormat::default())]
    format: ListingFormat,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to standard error so completions can be piped
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    color::configure_color(ColorMode::resolve_auto(cli.color));

    let config = match config::read_config(cli.config.clone()) {
        Ok(config) => config,
        Err(err) => die!("{}", err),
    };

    match &cli.command {
        Some(Commands::Serve(args)) => serve_cmd(&config, args).await,
        Some(Commands::List(args)) => list_cmd(&config, args).await,
        Some(Commands::Probe(args)) => probe_cmd(&config, args).await,
        Some(Commands::Complete(args)) => complete_cmd(&config, args).await,
        None => serve_cmd(&config, &ServeArgs::default()).await,
    }
}
