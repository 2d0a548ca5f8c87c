use crate::domain::model::{ChatMessage, Record, ToolDefinition};
use crate::utils::error::Result;
use async_trait::async_trait;
use serde_json::Value;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// A chat-completions backend able to request tool calls.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Returns the assistant message of the first choice.
    async fn chat(&self, messages: &[ChatMessage], tools: &[ToolDefinition])
        -> Result<ChatMessage>;

    fn model(&self) -> &str;
}

#[async_trait]
pub trait MarketData: Send + Sync {
    /// Calls a Tushare Pro endpoint (`daily`, `income`, ...) and returns its rows.
    async fn query(&self, api_name: &str, params: Value, fields: &str) -> Result<Vec<Record>>;

    /// Latest quote snapshot for a `000001.SZ`-style code.
    async fn realtime_quote(&self, ts_code: &str) -> Result<Vec<Record>>;
}
