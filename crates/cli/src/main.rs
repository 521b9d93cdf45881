use clap::{Parser, Subcommand};

mod commands;

use commands::{ConfigArgs, InitDbArgs, ScanArgs};

#[derive(Parser)]
#[command(name = "anchor-risk")]
#[command(about = "Position-risk engine for a leveraged perpetual-swap book", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every policy loop until Ctrl+C
    Run(ConfigArgs),
    /// Run one cycle of a single component and print its decisions as JSON
    Scan(ScanArgs),
    /// Create the database and write the market config row
    InitDb(InitDbArgs),
    /// Print the merged engine configuration
    ShowConfig(ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => commands::run_engine(args).await?,
        Commands::Scan(args) => commands::run_scan(args).await?,
        Commands::InitDb(args) => commands::run_init_db(args).await?,
        Commands::ShowConfig(args) => commands::show_config(&args)?,
    }

    Ok(())
}
