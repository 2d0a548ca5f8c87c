// Adapters layer: concrete implementations of the domain ports for external systems.

pub mod llm;
pub mod realtime;
pub mod tushare;

pub use llm::{create_llm, OpenAiCompatibleClient};
pub use tushare::TushareClient;
