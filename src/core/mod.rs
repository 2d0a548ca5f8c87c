pub mod agent;
pub mod portfolio;
pub mod tools;

pub use crate::domain::model::{ChatMessage, Record};
pub use crate::domain::ports::{LlmClient, MarketData, Storage};
pub use crate::utils::error::Result;
