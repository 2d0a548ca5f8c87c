pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod upgrade;
pub mod utils;

pub use adapters::{create_llm, OpenAiCompatibleClient, TushareClient};
pub use config::{cli::LocalStorage, AgentConfig, CliConfig, ConfigPaths, Settings};
pub use crate::core::{agent::FinAgent, portfolio::PortfolioManager, tools::ToolRegistry};
pub use utils::error::{FinAgentError, Result};

use std::sync::Arc;
use utils::validation::Validate;

/// Wires config, settings and storage into a ready-to-run agent.
pub async fn build_agent(
    config: &AgentConfig,
    settings: &Settings,
    storage: LocalStorage,
) -> Result<FinAgent<LocalStorage>> {
    config.validate()?;
    settings.validate()?;

    let llm = create_llm(config, settings)?;
    let market = Arc::new(TushareClient::from_config(config, settings)?);
    let portfolio = PortfolioManager::load(storage).await;
    let tools = ToolRegistry::new(market, portfolio, settings.defaults.clone());

    Ok(FinAgent::new(llm, tools, &settings.agent))
}
