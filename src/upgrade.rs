use crate::config::{env_config, ConfigPaths};
use crate::utils::error::{FinAgentError, Result};
use crate::utils::version::{current_version, installed_version_from_list, needs_config_reset};
use std::process::Command;

pub const PACKAGE_NAME: &str = "fin-agent";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeOutcome {
    pub previous: String,
    pub installed: String,
    /// The upgrade crossed a version whose `.env` layout is incompatible.
    pub config_reset_required: bool,
    /// A stored `.env` existed and was removed.
    pub config_cleared: bool,
}

/// Reinstalls the latest release with cargo and resets the config when the upgrade crosses the reset version.
pub fn upgrade_package(paths: &ConfigPaths) -> Result<UpgradeOutcome> {
    let previous = current_version().to_string();
    tracing::info!("Upgrading {} from v{}", PACKAGE_NAME, previous);

    let status = Command::new("cargo")
        .args(["install", PACKAGE_NAME, "--force"])
        .status()
        .map_err(|e| FinAgentError::UpgradeError {
            message: format!("could not run cargo: {}", e),
        })?;
    if !status.success() {
        return Err(FinAgentError::UpgradeError {
            message: format!(
                "cargo install exited with {}. Please check your network connection or permissions.",
                status
            ),
        });
    }

    let listing = Command::new("cargo").args(["install", "--list"]).output()?;
    let listing = String::from_utf8_lossy(&listing.stdout);
    let installed = installed_version_from_list(&listing, PACKAGE_NAME).ok_or_else(|| {
        FinAgentError::UpgradeError {
            message: "could not determine new version after upgrade".to_string(),
        }
    })?;

    finish_upgrade(paths, previous, installed)
}

fn finish_upgrade(
    paths: &ConfigPaths,
    previous: String,
    installed: String,
) -> Result<UpgradeOutcome> {
    let config_reset_required = needs_config_reset(&previous, &installed);
    let config_cleared = config_reset_required && env_config::clear(paths)?;

    Ok(UpgradeOutcome {
        previous,
        installed,
        config_reset_required,
        config_cleared,
    })
}
