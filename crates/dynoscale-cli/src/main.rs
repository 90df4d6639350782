use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "dynoscale",
    about = "Dynoscale — queue-driven dyno autoscaling",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Path to dynoscale.toml
    #[arg(short, long, global = true, default_value = "dynoscale.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and print the resolved processes
    Check,
    /// Print the shared scaling record of each process
    Show {
        /// Only show this process type
        #[arg(short, long)]
        process: Option<String>,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Delete the shared scaling record of a process.
    ///
    /// Use this to abandon a stuck quietdown; the next update starts from
    /// a clean slate.
    Clear {
        /// Process type whose record is removed
        #[arg(short, long)]
        process: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dynoscale=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = dynoscale::AutoscaleConfig::from_file(&cli.config)?;

    match cli.command {
        Commands::Check => commands::check::check(&config),
        Commands::Show { process, format } => {
            commands::state::show(&config, process.as_deref(), &format).await
        }
        Commands::Clear { process } => commands::state::clear(&config, &process).await,
    }
}
