#![cfg(not(tarpaulin_include))]

use clap::{Parser, Subcommand};
use log::error;
use std::path::PathBuf;

use secure_entry::app;
use secure_entry::config::{AppConfig, DEFAULT_CONFIG_FILE};
use secure_entry::login::hash_password;

#[derive(Parser)]
#[command(name = "secure-entry", version, about = "Login-gated data entry into dated spreadsheet worksheets")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Listen address, overrides `bind` from the configuration
    #[arg(short, long)]
    bind: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the web server (default)
    Serve,
    /// Print an argon2 hash for a `[[users]]` entry
    HashPassword { password: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::HashPassword { password } => {
            println!("{}", hash_password(&password)?);
            Ok(())
        }
        Command::Serve => {
            let mut config = AppConfig::load(&cli.config).inspect_err(|e| {
                error!("{}: {}", cli.config.display(), e);
            })?;
            if let Some(bind) = cli.bind {
                config.bind = bind;
            }
            app::run(config).await
        }
    }
}
