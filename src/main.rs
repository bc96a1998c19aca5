use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use coinwatch::cli::setup::setup;
use coinwatch::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for coinwatch::AppCommand {
    fn from(cmd: Commands) -> coinwatch::AppCommand {
        match cmd {
            Commands::Watch { forecast } => coinwatch::AppCommand::Watch { forecast },
            Commands::Forecast { asset_id } => coinwatch::AppCommand::Forecast { asset_id },
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Show live asset prices, refreshed on an interval
    Watch {
        /// Asset id (e.g. "bitcoin") to forecast once it is listed
        #[arg(short, long)]
        forecast: Option<String>,
    },
    /// Forecast the next days of prices for one asset
    Forecast {
        /// Asset id, e.g. "bitcoin"
        asset_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => setup(),
        Some(cmd) => coinwatch::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
