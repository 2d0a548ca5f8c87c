use crate::utils::error::{FinAgentError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Optional tunables from `settings.toml` in the config directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub defaults: DefaultsSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Upper bound on LLM round-trips for one question.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Characters of each tool result echoed to the terminal.
    #[serde(default = "default_display_truncate")]
    pub display_truncate: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultsSettings {
    #[serde(default = "default_price_lookback_days")]
    pub price_lookback_days: i64,
    #[serde(default = "default_income_lookback_days")]
    pub income_lookback_days: i64,
}

fn default_max_steps() -> usize {
    10
}

fn default_display_truncate() -> usize {
    200
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_price_lookback_days() -> i64 {
    30
}

fn default_income_lookback_days() -> i64 {
    730
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            display_truncate: default_display_truncate(),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl Default for DefaultsSettings {
    fn default() -> Self {
        Self {
            price_lookback_days: default_price_lookback_days(),
            income_lookback_days: default_income_lookback_days(),
        }
    }
}

impl Settings {
    /// Loads the file when present; a missing file yields the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("No settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    /// `load_or_default` followed by validation. Call this before building the agent so a bad
    /// settings file is reported on its own instead of as a credentials problem.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = Self::load_or_default(path)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(FinAgentError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| FinAgentError::ConfigValidationError {
            field: "settings.toml".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` with the environment value; unknown variables are left as written.
    fn substitute_env_vars(content: &str) -> String {
        let re = Regex::new(r"\$\{([^}]+)\}").expect("static regex");

        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .into_owned()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_seconds)
    }
}

impl Validate for Settings {
    fn validate(&self) -> Result<()> {
        validation::validate_positive_number("agent.max_steps", self.agent.max_steps, 1)?;
        validation::validate_range("http.timeout_seconds", self.http.timeout_seconds, 1, 600)?;
        validation::validate_range(
            "defaults.price_lookback_days",
            self.defaults.price_lookback_days,
            1,
            3650,
        )?;
        validation::validate_range(
            "defaults.income_lookback_days",
            self.defaults.income_lookback_days,
            1,
            3650,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings = Settings::from_toml_str(
            r#"
[agent]
max_steps = 4
"#,
        )
        .unwrap();

        assert_eq!(settings.agent.max_steps, 4);
        assert_eq!(settings.agent.display_truncate, 200);
        assert_eq!(settings.http.timeout_seconds, 30);
        assert_eq!(settings.defaults.income_lookback_days, 730);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("FIN_AGENT_TEST_TIMEOUT", "45");

        let settings = Settings::from_toml_str(
            r#"
[http]
timeout_seconds = ${FIN_AGENT_TEST_TIMEOUT}
"#,
        )
        .unwrap();
        assert_eq!(settings.http.timeout_seconds, 45);

        std::env::remove_var("FIN_AGENT_TEST_TIMEOUT");
    }

    #[test]
    fn test_validation_rejects_zero_steps() {
        let settings = Settings::from_toml_str("[agent]\nmax_steps = 0\n").unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = Settings::from_toml_str("[agent\nmax_steps = 1").unwrap_err();
        assert!(matches!(err, FinAgentError::ConfigValidationError { .. }));
    }

    #[test]
    fn test_load_or_default() {
        let missing = Settings::load_or_default("/nonexistent/fin-agent/settings.toml").unwrap();
        assert_eq!(missing, Settings::default());

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[defaults]\nprice_lookback_days = 90\n")
            .unwrap();
        let loaded = Settings::load_or_default(temp_file.path()).unwrap();
        assert_eq!(loaded.defaults.price_lookback_days, 90);
    }

    #[test]
    fn test_load_validates_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[agent]\nmax_steps = 0\n").unwrap();

        let err = Settings::load(temp_file.path()).unwrap_err();
        assert!(err.to_string().contains("agent.max_steps"));
        assert!(!err.is_missing_config());

        let missing = Settings::load("/nonexistent/fin-agent/settings.toml").unwrap();
        assert_eq!(missing, Settings::default());
    }
}
