use clap::Parser;
use colored::Colorize;
use fin_agent::config::{env_config, Command, ConfigCommand, PortfolioCommand};
use fin_agent::core::portfolio::render_report;
use fin_agent::upgrade::upgrade_package;
use fin_agent::utils::error::{ErrorCategory, ErrorSeverity};
use fin_agent::utils::logger;
use fin_agent::utils::version::current_version;
use fin_agent::{
    build_agent, AgentConfig, CliConfig, ConfigPaths, FinAgent, FinAgentError, LocalStorage,
    PortfolioManager, Result, Settings, TushareClient,
};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() {
    let cli = CliConfig::parse();

    logger::init_cli_logger(cli.verbose);
    tracing::debug!("CLI config: {:?}", cli);

    if cli.version {
        println!("fin-agent version {}", current_version());
        return;
    }

    let paths = cli.config_paths();

    let result = if cli.clear_token {
        clear_config(&paths)
    } else if cli.upgrade {
        run_upgrade(&paths)
    } else {
        match cli.command.clone().unwrap_or(Command::Chat) {
            Command::Chat => start_chat(&paths).await,
            Command::Ask { question } => ask_once(&paths, &question.join(" ")).await,
            Command::Portfolio { action } => portfolio_command(&paths, action).await,
            Command::Config { action } => config_command(&paths, action),
        }
    };

    if let Err(e) = result {
        tracing::error!(
            "fin-agent failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        eprintln!("{}", format!("Error: {}", e.user_friendly_message()).red());
        eprintln!("💡 {}", e.recovery_suggestion());

        let exit_code = match e.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        };
        if exit_code > 0 {
            std::process::exit(exit_code);
        }
    }
}

fn clear_config(paths: &ConfigPaths) -> Result<()> {
    println!("{}", "Clearing configuration...".yellow());
    if env_config::clear(paths)? {
        println!("{}", "Configuration cleared successfully.".green());
    } else {
        println!("No stored configuration found at {}", paths.env_file().display());
    }
    Ok(())
}

fn run_upgrade(paths: &ConfigPaths) -> Result<()> {
    println!("{}", format!("Current version: {}", current_version()).cyan());
    println!("{}", "Upgrading fin-agent with cargo...".yellow());

    let outcome = upgrade_package(paths)?;
    println!(
        "{}",
        format!("Upgraded to version: {}", outcome.installed).green()
    );

    if outcome.config_reset_required {
        println!(
            "{}",
            format!(
                "Major configuration update detected (v{} -> v{}).",
                outcome.previous, outcome.installed
            )
            .yellow()
        );
        if outcome.config_cleared {
            println!(
                "{}",
                "Configuration cleared. Please restart the agent to re-configure.".green()
            );
        } else {
            println!("No stored configuration to clear. Restart the agent to configure it.");
        }
    } else {
        println!(
            "{}",
            "Upgrade complete. No configuration reset needed.".green()
        );
        println!("Please restart the agent to use the new version.");
    }
    Ok(())
}

async fn init_agent(paths: &ConfigPaths, settings: &Settings) -> Result<FinAgent<LocalStorage>> {
    let config = AgentConfig::load(paths)?;
    build_agent(&config, settings, LocalStorage::new(paths.config_dir())).await
}

async fn start_chat(paths: &ConfigPaths) -> Result<()> {
    println!(
        "{}",
        format!("Welcome to Fin-Agent (v{})!", current_version()).green()
    );
    println!("Initializing...");

    // settings problems are not something the .env wizard can fix
    let settings = Settings::load(paths.settings_file())?;

    let mut agent = match init_agent(paths, &settings).await {
        Ok(agent) => agent,
        Err(e) if e.category() == ErrorCategory::Configuration => {
            if e.is_missing_config() {
                println!(
                    "{}",
                    "Configuration missing or incomplete. Starting setup...".yellow()
                );
            } else {
                println!("{}", format!("Configuration Error: {}", e).red());
                println!("{}", "Running setup...".yellow());
            }

            match setup_and_build(paths, &settings).await {
                Ok(agent) => agent,
                Err(setup_error) => {
                    println!("{}", format!("Setup failed: {}", setup_error).red());
                    return Ok(());
                }
            }
        }
        Err(e) => return Err(e),
    };

    run_chat_loop(&mut agent).await
}

async fn setup_and_build(
    paths: &ConfigPaths,
    settings: &Settings,
) -> Result<FinAgent<LocalStorage>> {
    let config = {
        let stdin = std::io::stdin();
        let mut input = stdin.lock();
        let mut output = std::io::stdout();
        env_config::run_setup(paths, &mut input, &mut output)?
    };
    build_agent(&config, settings, LocalStorage::new(paths.config_dir())).await
}

async fn run_chat_loop(agent: &mut FinAgent<LocalStorage>) -> Result<()> {
    println!("{}", "Agent initialized successfully.".green());
    println!("Type 'exit' or 'quit' to end the session.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("\n{}", "You: ".green());
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!("\nGoodbye!");
            break;
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            println!("Goodbye!");
            break;
        }

        let outcome = tokio::select! {
            result = agent.run(input) => Some(result),
            _ = tokio::signal::ctrl_c() => None,
        };

        match outcome {
            Some(Ok(response)) => println!("\n{}{}", "Agent: ".cyan(), response),
            Some(Err(e)) => {
                tracing::warn!("Query failed: {}", e);
                println!("\n{}", format!("Error: {}", e.user_friendly_message()).red());
            }
            None => {
                println!("\nGoodbye!");
                break;
            }
        }
    }

    Ok(())
}

async fn ask_once(paths: &ConfigPaths, question: &str) -> Result<()> {
    let settings = Settings::load(paths.settings_file())?;
    let mut agent = init_agent(paths, &settings).await?;
    let answer = agent.run(question).await?;
    println!("\n{}{}", "Agent: ".cyan(), answer);
    Ok(())
}

async fn portfolio_command(paths: &ConfigPaths, action: PortfolioCommand) -> Result<()> {
    let mut portfolio = PortfolioManager::load(LocalStorage::new(paths.config_dir())).await;

    match action {
        PortfolioCommand::Show => {
            let config = AgentConfig::load(paths)?;
            let settings = Settings::load(paths.settings_file())?;
            let market = TushareClient::from_config(&config, &settings)?;
            match portfolio.status(&market).await {
                Some(report) => print!("{}", render_report(&report)),
                None => println!("Portfolio is empty."),
            }
        }
        PortfolioCommand::Buy {
            ts_code,
            amount,
            price,
        } => {
            let message = portfolio.add_position(&ts_code, amount, price).await?;
            println!("{}", message.green());
        }
        PortfolioCommand::Sell {
            ts_code,
            amount,
            price,
        } => {
            let message = portfolio.remove_position(&ts_code, amount, price).await?;
            println!("{}", message.green());
        }
        PortfolioCommand::Clear => {
            let message = portfolio.clear().await?;
            println!("{}", message.green());
        }
        PortfolioCommand::Export { format, output } => {
            let content = portfolio.export(format)?;
            tokio::fs::write(&output, content).await?;
            println!("Portfolio exported to {}", output.display());
        }
    }
    Ok(())
}

fn config_command(paths: &ConfigPaths, action: ConfigCommand) -> Result<()> {
    match action {
        ConfigCommand::Setup => {
            let stdin = std::io::stdin();
            let mut input = stdin.lock();
            let mut output = std::io::stdout();
            env_config::run_setup(paths, &mut input, &mut output)?;
        }
        ConfigCommand::Show => {
            let config = AgentConfig::load(paths)?;
            for (key, value) in config.masked_summary() {
                println!("{:<20} {}", key, value);
            }
            println!("{:<20} {}", "PORTFOLIO_FILE", paths.portfolio_file().display());
            let missing = config.missing_keys();
            if !missing.is_empty() {
                println!(
                    "{}",
                    FinAgentError::MissingConfigError { fields: missing }
                        .to_string()
                        .yellow()
                );
            }
        }
        ConfigCommand::Clear => clear_config(paths)?,
        ConfigCommand::Path => println!("{}", paths.config_dir().display()),
    }
    Ok(())
}
