use clap::{Parser, Subcommand};
use metals_schema::*;
use tracing::Level;

mod commands;

use commands::init::InitArgs;
use commands::recent::RecentArgs;
use commands::Store;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default $HOME/.metals/metals.toml is used
    #[clap(short, long)]
    config: Option<String>,

    /// Backend to run against, overriding the configured one: sqlite or mongodb
    #[clap(short, long, global = true)]
    backend: Option<Backend>,

    /// Print debug information
    #[clap(long, global = true)]
    debug: bool,

    /// Output format: table, markdown, json, json-pretty, json-line, psv
    #[clap(short, long, global = true, default_value = "table")]
    format: OutputFormat,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the prices collection, its indexes and the recent_prices view.
    Init(InitArgs),

    /// Compare the persisted schema with the expected layout.
    Status,

    /// List the most recent price records.
    Recent(RecentArgs),

    /// Show record counts and schema status.
    Stats,

    /// Show the effective configuration.
    Config,
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = MetalsConfig::new(&cli.config)?;
    let backend = cli.backend.unwrap_or(config.backend);

    if let Commands::Config = cli.command {
        return commands::config::run(&config, &cli.config, backend, cli.format);
    }

    let store = Store::open(&config, backend).await?;

    match cli.command {
        Commands::Init(args) => commands::init::run(&store, args, cli.format).await,
        Commands::Status => commands::status::run(&store, cli.format).await,
        Commands::Recent(args) => commands::recent::run(&store, args, cli.format).await,
        Commands::Stats => commands::stats::run(&store, cli.format).await,
        Commands::Config => Ok(()),
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if cli.debug {
        tracing_subscriber::fmt()
            // filter spans/events with level TRACE or higher.
            .with_max_level(Level::INFO)
            .init();
    }

    if let Err(e) = run(cli).await {
        eprintln!("ERROR: {:#}", e);
        std::process::exit(1);
    }
}
