use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use shopfloor::config::ShopfloorConfig;
use shopfloor::domain::PathStep;

mod cmd;

#[derive(Parser)]
#[command(name = "shopfloor")]
#[command(version, about = "Production tracking for garment work orders")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Server URL for client commands. Overrides [client] base_url.
    #[arg(long, global = true)]
    pub url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create .shopfloor/ with a default config and database
    Init,
    /// Run the REST + SSE server
    Serve {
        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (CORS permissive for a UI on another origin)
        #[arg(long)]
        dev: bool,
    },
    /// Follow live updates and print collection counts and notices
    Watch,
    /// Manage work orders
    Orders {
        #[command(subcommand)]
        command: OrdersCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum OrdersCommands {
    /// List work orders with their current step
    List,
    /// Create a work order
    Create {
        /// Order name
        name: String,

        /// Number of pieces
        #[arg(short, long)]
        quantity: u32,

        /// Product description
        #[arg(long, default_value = "")]
        product: String,

        /// Path step, in order: machine:<label>:<machine-type-id> or
        /// jobwork:<label>:<job-work-id>
        #[arg(long = "step", required = true, value_parser = cmd::orders::parse_step)]
        steps: Vec<PathStep>,
    },
    /// Complete the current step and start the next one
    Advance { id: String },
    /// Move back to the previous step
    Retreat { id: String },
    /// Put the running step on hold
    Hold { id: String },
    /// Resume a held step
    Resume { id: String },
    /// Record pieces done on the current step
    Progress { id: String, done: u32 },
    /// Split batches off an order, e.g. `split <id> 30 30`
    Split {
        id: String,
        #[arg(required = true)]
        batches: Vec<u32>,
    },
    /// Delete a work order
    Delete { id: String },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default shopfloor.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let mut config = ShopfloorConfig::load(&project_dir)?;
    if let Some(url) = &cli.url {
        config.toml.client.base_url = url.clone();
    }
    shopfloor::logging::init(&config.toml.logging, cli.verbose);
    for warning in &config.env_warnings {
        tracing::warn!("{}", warning);
    }

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Serve {
            host,
            port,
            db_path,
            dev,
        } => {
            cmd::cmd_serve(&config, host.clone(), *port, db_path.clone(), *dev).await?;
        }
        Commands::Watch => cmd::cmd_watch(&config).await?,
        Commands::Orders { command } => cmd::cmd_orders(&config, command.clone()).await?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}
