pub mod cli;
pub mod env_config;
pub mod settings;

use crate::domain::model::ExportFormat;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use env_config::{AgentConfig, ConfigPaths, LlmProvider};
pub use settings::Settings;

#[derive(Debug, Clone, Parser)]
#[command(name = "fin-agent")]
#[command(
    about = "Fin-Agent: A financial analysis AI agent powered by LLMs (DeepSeek/OpenAI) and Tushare data."
)]
#[command(disable_version_flag = true)]
#[command(after_help = "Examples:
  fin-agent                          # Start interactive mode
  fin-agent ask \"How did 000001.SZ trade this week?\"
  fin-agent portfolio show           # Value your holdings at live prices
  fin-agent --clear-token            # Clear configuration
  fin-agent --upgrade                # Upgrade to latest version")]
pub struct CliConfig {
    #[arg(short = 'v', long = "version", help = "Show version number and exit")]
    pub version: bool,

    #[arg(long, help = "Clear the existing configuration token and exit")]
    pub clear_token: bool,

    #[arg(long, help = "Upgrade fin-agent to the latest version")]
    pub upgrade: bool,

    #[arg(long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Use this directory instead of the default config location")]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Start the interactive chat session (default)
    Chat,
    /// Ask a single question and exit
    Ask {
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },
    /// Manage the local portfolio
    Portfolio {
        #[command(subcommand)]
        action: PortfolioCommand,
    },
    /// Inspect or change the stored configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum PortfolioCommand {
    /// Show holdings valued at the latest prices
    Show,
    /// Record a purchase
    Buy {
        ts_code: String,
        amount: i64,
        price: f64,
    },
    /// Record a sale
    Sell {
        ts_code: String,
        amount: i64,
        price: f64,
    },
    /// Remove every position and the trade history
    Clear,
    /// Write positions to a file
    Export {
        #[arg(long, default_value = "csv")]
        format: ExportFormat,
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum ConfigCommand {
    /// Run the setup wizard
    Setup,
    /// Print the effective configuration with secrets masked
    Show,
    /// Delete the stored configuration
    Clear,
    /// Print the configuration directory
    Path,
}

impl CliConfig {
    pub fn config_paths(&self) -> ConfigPaths {
        match &self.config_dir {
            Some(dir) => ConfigPaths::new(dir.clone()),
            None => ConfigPaths::default_location(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_arguments_starts_chat() {
        let cli = CliConfig::try_parse_from(["fin-agent"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.version && !cli.clear_token && !cli.upgrade);
    }

    #[test]
    fn test_short_v_is_version() {
        let cli = CliConfig::try_parse_from(["fin-agent", "-v"]).unwrap();
        assert!(cli.version);
    }

    #[test]
    fn test_ask_joins_words() {
        let cli = CliConfig::try_parse_from(["fin-agent", "ask", "price", "of", "000001.SZ"]).unwrap();
        match cli.command {
            Some(Command::Ask { question }) => assert_eq!(question.join(" "), "price of 000001.SZ"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_portfolio_export_format() {
        let cli = CliConfig::try_parse_from([
            "fin-agent",
            "portfolio",
            "export",
            "--format",
            "json",
            "-o",
            "out.json",
            "--verbose",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Some(Command::Portfolio {
                action: PortfolioCommand::Export { format, output },
            }) => {
                assert_eq!(format, ExportFormat::Json);
                assert_eq!(output, PathBuf::from("out.json"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_config_dir_override() {
        let cli = CliConfig::try_parse_from(["fin-agent", "--config-dir", "/tmp/fa"]).unwrap();
        assert_eq!(cli.config_paths().env_file(), PathBuf::from("/tmp/fa/.env"));
    }
}
