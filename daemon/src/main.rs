use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

mod config;
mod daemon;
mod telemetry;

use config::{DaemonConfig, MirrorArgs};
use daemon::MirrorDaemon;

#[derive(Parser)]
#[command(name = "replica-daemon")]
#[command(about = "Periodic one-way directory mirroring")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    mirror: MirrorArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or create configuration
    Config {
        #[command(subcommand)]
        action: ConfigActions,
    },
}

#[derive(Subcommand)]
enum ConfigActions {
    /// Validate configuration file and flags
    Validate,
    /// Show the effective configuration
    Show,
    /// Generate an example configuration
    Generate {
        /// Output path for configuration
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None => run_daemon(cli.config.as_ref(), &cli.mirror).await,
        Some(Commands::Config { action }) => {
            telemetry::init_basic_logging(cli.mirror.log_level.as_deref().unwrap_or("warn"))?;
            match action {
                ConfigActions::Validate => validate_config(cli.config.as_ref(), &cli.mirror).await,
                ConfigActions::Show => show_config(cli.config.as_ref(), &cli.mirror).await,
                ConfigActions::Generate { output } => generate_config(output.as_ref()).await,
            }
        }
    }
}

async fn load_config(config_path: Option<&PathBuf>, args: &MirrorArgs) -> Result<DaemonConfig> {
    let mut config = match config_path {
        Some(path) => DaemonConfig::load(path).await?,
        None => DaemonConfig::default(),
    };
    config.apply_args(args);
    Ok(config)
}

async fn run_daemon(config_path: Option<&PathBuf>, args: &MirrorArgs) -> Result<()> {
    let config = load_config(config_path, args).await?;
    let mut settings = config.resolve()?;
    settings.once = args.once;

    let _guard = telemetry::initialize_logging(&settings.log_file_path, &settings.log_level, settings.console)?;
    if let Some(path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }

    MirrorDaemon::new(settings).run().await?;
    Ok(())
}

async fn validate_config(config_path: Option<&PathBuf>, args: &MirrorArgs) -> Result<()> {
    let config = load_config(config_path, args).await?;

    match config.resolve() {
        Ok(settings) => {
            println!("✓ Configuration is valid");
            println!("Source: {}", settings.source.display());
            println!("Replica: {}", settings.replica.display());
            println!("Log file: {}", settings.log_file_path.display());
            println!("Sync interval: {}s", settings.interval.as_secs());
            Ok(())
        }
        Err(e) => {
            println!("✗ Configuration validation failed: {}", e);
            Err(e)
        }
    }
}

async fn show_config(config_path: Option<&PathBuf>, args: &MirrorArgs) -> Result<()> {
    let config = load_config(config_path, args).await?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

async fn generate_config(output_path: Option<&PathBuf>) -> Result<()> {
    let config = DaemonConfig::example();

    if let Some(path) = output_path {
        config.save(path).await?;
        println!("Configuration generated at {}", path.display());
    } else {
        println!("{}", toml::to_string_pretty(&config)?);
    }

    Ok(())
}
