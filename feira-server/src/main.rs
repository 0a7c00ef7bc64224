#![cfg_attr(not(test), forbid(unsafe_code))]
#![allow(missing_docs)]

//! Command-line entry point for the Feira chat server.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use server::server as app;
use shared::config::server::Config;
use tracing::info;

/// Feira chat server
#[derive(Debug, Parser)]
#[command(name = "feira-server")]
#[command(about = "Realtime chat for the Feira marketplace", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind, overriding the configuration file and environment
        #[arg(long, short)]
        port: Option<u16>,

        /// Configuration file (YAML, JSON or TOML)
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Apply the database bootstrap scripts and exit
    Bootstrap {
        /// Configuration file (YAML, JSON or TOML)
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

fn load(config: Option<&PathBuf>, port: Option<u16>) -> anyhow::Result<Config> {
    Config::load_config(config.map(PathBuf::as_path), port).context("failed to load configuration")
}

async fn run_app(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve { port, config } => {
            let config = load(config.as_ref(), port)?;
            app::run(config).await
        }
        Commands::Bootstrap { config } => {
            let config = load(config.as_ref(), None)?;
            app::initialize_tracing(&config);
            app::prepare_database(&config.db).await?;
            info!(path = %config.db.bootstrap_path.display(), "database bootstrap complete");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    run_app(Cli::parse()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serial_test::serial;
    use shared::config::server::StoreBackend;
    use std::io::Write;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_accepts_optional_port_and_config() {
        let cli = Cli::try_parse_from(["feira-server", "serve", "--port", "9090", "-c", "feira.yaml"])
            .unwrap();
        match cli.command {
            Commands::Serve { port, config } => {
                assert_eq!(port, Some(9090));
                assert_eq!(config, Some(PathBuf::from("feira.yaml")));
            }
            Commands::Bootstrap { .. } => panic!("expected serve"),
        }

        let bare = Cli::try_parse_from(["feira-server", "serve"]).unwrap();
        assert!(matches!(
            bare.command,
            Commands::Serve {
                port: None,
                config: None
            }
        ));
    }

    #[test]
    fn bootstrap_subcommand_parses() {
        let cli = Cli::try_parse_from(["feira-server", "bootstrap"]).unwrap();
        assert!(matches!(cli.command, Commands::Bootstrap { config: None }));
    }

    #[test]
    #[serial]
    fn load_layers_file_then_environment_then_port() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "server:\n  port: 7001\ndb:\n  backend: postgres").unwrap();
        unsafe {
            std::env::set_var("FEIRA_DB_BACKEND", "memory");
        }
        let config = load(Some(&file.path().to_path_buf()), Some(7002));
        unsafe {
            std::env::remove_var("FEIRA_DB_BACKEND");
        }

        let config = config.unwrap();
        assert_eq!(config.db.backend, StoreBackend::Memory);
        assert_eq!(config.server.port, 7002);
    }

    #[test]
    #[serial]
    fn load_reports_missing_files_with_context() {
        let err = load(Some(&PathBuf::from("/nonexistent/feira.yaml")), None).unwrap_err();
        assert_eq!(err.to_string(), "failed to load configuration");
    }
}
