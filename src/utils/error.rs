use thiserror::Error;

#[derive(Error, Debug)]
pub enum FinAgentError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Environment parsing error: {0}")]
    EnvError(#[from] envy::Error),

    #[error("Missing environment variables: {}", fields.join(", "))]
    MissingConfigError { fields: Vec<String> },

    #[error("Invalid value for {field} ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Configuration error in {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("LLM request failed: {message}")]
    LlmError { message: String },

    #[error("Market data error: {message}")]
    MarketDataError { message: String },

    #[error("{message}")]
    PortfolioError { message: String },

    #[error("Agent stopped after {steps} steps without a final answer")]
    StepLimitError { steps: usize },

    #[error("Upgrade failed: {message}")]
    UpgradeError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Configuration,
    Data,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl FinAgentError {
    pub fn llm(message: impl Into<String>) -> Self {
        Self::LlmError {
            message: message.into(),
        }
    }

    pub fn market_data(message: impl Into<String>) -> Self {
        Self::MarketDataError {
            message: message.into(),
        }
    }

    pub fn portfolio(message: impl Into<String>) -> Self {
        Self::PortfolioError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::HttpError(_) | Self::LlmError { .. } | Self::MarketDataError { .. } => {
                ErrorCategory::Network
            }
            Self::EnvError(_)
            | Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::ConfigValidationError { .. } => ErrorCategory::Configuration,
            Self::CsvError(_)
            | Self::SerializationError(_)
            | Self::PortfolioError { .. }
            | Self::StepLimitError { .. } => ErrorCategory::Data,
            Self::IoError(_) | Self::UpgradeError { .. } => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::PortfolioError { .. } => ErrorSeverity::Low,
            Self::HttpError(_)
            | Self::LlmError { .. }
            | Self::MarketDataError { .. }
            | Self::StepLimitError { .. } => ErrorSeverity::Medium,
            Self::EnvError(_)
            | Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::ConfigValidationError { .. }
            | Self::CsvError(_)
            | Self::SerializationError(_) => ErrorSeverity::High,
            Self::IoError(_) | Self::UpgradeError { .. } => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Network => {
                "Check your internet connection and API credentials, then try again."
            }
            ErrorCategory::Configuration => {
                "Run `fin-agent --clear-token` and restart to re-run the setup wizard."
            }
            ErrorCategory::Data => "Check the input values and try again.",
            ErrorCategory::System => "Check file permissions in the fin-agent config directory.",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::MissingConfigError { fields } => {
                format!("Configuration incomplete, missing: {}", fields.join(", "))
            }
            Self::HttpError(e) if e.is_timeout() => "The request timed out.".to_string(),
            Self::HttpError(e) if e.is_connect() => "Could not connect to the server.".to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_missing_config(&self) -> bool {
        matches!(self, Self::MissingConfigError { .. })
    }
}

pub type Result<T> = std::result::Result<T, FinAgentError>;
