use crate::utils::error::{FinAgentError, Result};
use crate::utils::validation::{self, Validate};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const APP_NAME: &str = "fin-agent";

pub const DEFAULT_DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEFAULT_DEEPSEEK_MODEL: &str = "deepseek-chat";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TUSHARE_API_URL: &str = "http://api.tushare.pro";
pub const DEFAULT_REALTIME_QUOTE_URL: &str = "http://hq.sinajs.cn";

/// Where fin-agent keeps its `.env`, `settings.toml` and `portfolio.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    config_dir: PathBuf,
}

impl ConfigPaths {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// `%APPDATA%\fin-agent` on Windows, `$XDG_CONFIG_HOME/fin-agent` (or `~/.config/fin-agent`) elsewhere.
    pub fn default_location() -> Self {
        let base = if cfg!(windows) {
            dirs::config_dir().or_else(dirs::home_dir)
        } else {
            std::env::var_os("XDG_CONFIG_HOME")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        };
        Self::new(base.unwrap_or_else(|| PathBuf::from(".")).join(APP_NAME))
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn env_file(&self) -> PathBuf {
        self.config_dir.join(".env")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("settings.toml")
    }

    pub fn portfolio_file(&self) -> PathBuf {
        self.config_dir.join("portfolio.json")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    DeepSeek,
    OpenAi,
    /// Any OpenAI-compatible server, typically self-hosted; the API key is optional.
    Local,
}

impl FromStr for LlmProvider {
    type Err = FinAgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deepseek" => Ok(Self::DeepSeek),
            "openai" => Ok(Self::OpenAi),
            "local" => Ok(Self::Local),
            other => Err(FinAgentError::InvalidConfigValueError {
                field: "LLM_PROVIDER".to_string(),
                value: other.to_string(),
                reason: format!("Unsupported LLM provider: {}", other),
            }),
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DeepSeek => "deepseek",
            Self::OpenAi => "openai",
            Self::Local => "local",
        };
        f.write_str(name)
    }
}

/// Settings read from the process environment and `.env` files.
///
/// Field names map to upper-case variables: `tushare_token` <- `TUSHARE_TOKEN`.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub tushare_token: Option<String>,

    #[serde(default = "default_provider")]
    pub llm_provider: String,

    pub deepseek_api_key: Option<String>,

    #[serde(default = "default_deepseek_base_url")]
    pub deepseek_base_url: String,

    #[serde(default = "default_deepseek_model")]
    pub deepseek_model: String,

    pub openai_api_key: Option<String>,

    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    #[serde(default = "default_openai_model")]
    pub openai_model: String,

    #[serde(default = "default_tushare_api_url")]
    pub tushare_api_url: String,

    #[serde(default = "default_realtime_quote_url")]
    pub realtime_quote_url: String,
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_deepseek_base_url() -> String {
    DEFAULT_DEEPSEEK_BASE_URL.to_string()
}

fn default_deepseek_model() -> String {
    DEFAULT_DEEPSEEK_MODEL.to_string()
}

fn default_openai_base_url() -> String {
    DEFAULT_OPENAI_BASE_URL.to_string()
}

fn default_openai_model() -> String {
    DEFAULT_OPENAI_MODEL.to_string()
}

fn default_tushare_api_url() -> String {
    DEFAULT_TUSHARE_API_URL.to_string()
}

fn default_realtime_quote_url() -> String {
    DEFAULT_REALTIME_QUOTE_URL.to_string()
}

impl AgentConfig {
    /// Process environment, then `./.env`, then the user's config-dir `.env`; later sources win.
    pub fn load(paths: &ConfigPaths) -> Result<Self> {
        let local_env = std::env::current_dir()?.join(".env");
        Self::load_layered(std::env::vars(), &[local_env, paths.env_file()])
    }

    pub fn load_layered<I>(base: I, env_files: &[PathBuf]) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut vars: BTreeMap<String, String> = base.into_iter().collect();

        for path in env_files.iter().filter(|p| p.is_file()) {
            tracing::debug!("Loading environment from {}", path.display());
            merge_env_file(&mut vars, path)?;
        }

        Self::from_vars(vars)
    }

    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        // blank values count as unset
        let vars = vars.into_iter().filter(|(_, v)| !v.trim().is_empty());
        Ok(envy::from_iter(vars)?)
    }

    pub fn provider(&self) -> Result<LlmProvider> {
        self.llm_provider.parse()
    }

    /// Keys that must be present for the configured provider and are not.
    pub fn missing_keys(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if self.tushare_token.is_none() {
            missing.push("TUSHARE_TOKEN".to_string());
        }
        match self.provider() {
            Ok(LlmProvider::DeepSeek) if self.deepseek_api_key.is_none() => {
                missing.push("DEEPSEEK_API_KEY".to_string());
            }
            Ok(LlmProvider::OpenAi) if self.openai_api_key.is_none() => {
                missing.push("OPENAI_API_KEY".to_string());
            }
            _ => {}
        }
        missing
    }

    /// Redacted view for `fin-agent config show`.
    pub fn masked_summary(&self) -> Vec<(&'static str, String)> {
        vec![
            ("TUSHARE_TOKEN", mask_secret(self.tushare_token.as_deref())),
            ("LLM_PROVIDER", self.llm_provider.clone()),
            ("DEEPSEEK_API_KEY", mask_secret(self.deepseek_api_key.as_deref())),
            ("DEEPSEEK_BASE_URL", self.deepseek_base_url.clone()),
            ("DEEPSEEK_MODEL", self.deepseek_model.clone()),
            ("OPENAI_API_KEY", mask_secret(self.openai_api_key.as_deref())),
            ("OPENAI_BASE_URL", self.openai_base_url.clone()),
            ("OPENAI_MODEL", self.openai_model.clone()),
            ("TUSHARE_API_URL", self.tushare_api_url.clone()),
            ("REALTIME_QUOTE_URL", self.realtime_quote_url.clone()),
        ]
    }
}

impl Validate for AgentConfig {
    fn validate(&self) -> Result<()> {
        let missing = self.missing_keys();
        if !missing.is_empty() {
            return Err(FinAgentError::MissingConfigError { fields: missing });
        }

        match self.provider()? {
            LlmProvider::DeepSeek => {
                validation::validate_url("DEEPSEEK_BASE_URL", &self.deepseek_base_url)?;
                validation::validate_non_empty_string("DEEPSEEK_MODEL", &self.deepseek_model)?;
            }
            LlmProvider::OpenAi | LlmProvider::Local => {
                validation::validate_url("OPENAI_BASE_URL", &self.openai_base_url)?;
                validation::validate_non_empty_string("OPENAI_MODEL", &self.openai_model)?;
            }
        }

        validation::validate_url("TUSHARE_API_URL", &self.tushare_api_url)?;
        validation::validate_url("REALTIME_QUOTE_URL", &self.realtime_quote_url)?;
        Ok(())
    }
}

fn merge_env_file(vars: &mut BTreeMap<String, String>, path: &Path) -> Result<()> {
    let to_config_error = |e: dotenvy::Error| FinAgentError::ConfigValidationError {
        field: path.display().to_string(),
        message: e.to_string(),
    };

    for item in dotenvy::from_path_iter(path).map_err(to_config_error)? {
        let (key, value) = item.map_err(to_config_error)?;
        vars.insert(key, value);
    }
    Ok(())
}

fn mask_secret(value: Option<&str>) -> String {
    match value {
        None => "(not set)".to_string(),
        Some(v) if v.chars().count() <= 8 => "****".to_string(),
        Some(v) => {
            let head: String = v.chars().take(4).collect();
            format!("{}****", head)
        }
    }
}

/// Interactive first-run wizard. Overwrites `<config dir>/.env` and returns the resulting config.
pub fn run_setup<R: BufRead, W: Write>(
    paths: &ConfigPaths,
    input: &mut R,
    output: &mut W,
) -> Result<AgentConfig> {
    writeln!(output, "Configuration missing. Starting setup wizard...")?;

    let tushare_token = prompt(input, output, "Enter your Tushare Token: ")?;
    let provider_answer = prompt(
        input,
        output,
        "Choose LLM provider [deepseek/openai/local] (default: deepseek): ",
    )?;
    let provider: LlmProvider = if provider_answer.is_empty() {
        LlmProvider::DeepSeek
    } else {
        provider_answer.parse()?
    };

    let mut entries: Vec<(&str, String)> = vec![
        ("TUSHARE_TOKEN", tushare_token),
        ("LLM_PROVIDER", provider.to_string()),
    ];

    match provider {
        LlmProvider::DeepSeek => {
            let key = prompt(input, output, "Enter your DeepSeek API Key: ")?;
            entries.push(("DEEPSEEK_API_KEY", key));
            entries.push(("DEEPSEEK_BASE_URL", DEFAULT_DEEPSEEK_BASE_URL.to_string()));
            entries.push(("DEEPSEEK_MODEL", DEFAULT_DEEPSEEK_MODEL.to_string()));
        }
        LlmProvider::OpenAi | LlmProvider::Local => {
            let key = prompt(input, output, "Enter your API Key (leave empty if none): ")?;
            let base_url = prompt_or_default(
                input,
                output,
                "Enter the API base URL",
                DEFAULT_OPENAI_BASE_URL,
            )?;
            let model = prompt_or_default(input, output, "Enter the model name", DEFAULT_OPENAI_MODEL)?;
            entries.push(("OPENAI_API_KEY", key));
            entries.push(("OPENAI_BASE_URL", base_url));
            entries.push(("OPENAI_MODEL", model));
        }
    }

    std::fs::create_dir_all(paths.config_dir())?;
    let env_file = paths.env_file();
    let content: String = entries
        .iter()
        .map(|(k, v)| format!("{}={}\n", k, v))
        .collect();
    std::fs::write(&env_file, content)?;

    writeln!(output, "Configuration saved to {}", env_file.display())?;
    tracing::info!("Wrote configuration to {}", env_file.display());

    let written = entries.into_iter().map(|(k, v)| (k.to_string(), v));
    AgentConfig::from_vars(std::env::vars().chain(written))
}

/// Removes the stored `.env`. Returns whether a file was deleted.
pub fn clear(paths: &ConfigPaths) -> Result<bool> {
    let env_file = paths.env_file();
    if !env_file.exists() {
        return Ok(false);
    }
    std::fs::remove_file(&env_file)?;
    tracing::info!("Removed {}", env_file.display());
    Ok(true)
}

fn prompt<R: BufRead, W: Write>(input: &mut R, output: &mut W, label: &str) -> Result<String> {
    write!(output, "{}", label)?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn prompt_or_default<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    label: &str,
    default: &str,
) -> Result<String> {
    let answer = prompt(input, output, &format!("{} (default: {}): ", label, default))?;
    Ok(if answer.is_empty() {
        default.to_string()
    } else {
        answer
    })
}
