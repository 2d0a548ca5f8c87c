use crate::config::settings::AgentSettings;
use crate::core::tools::ToolRegistry;
use crate::domain::model::ChatMessage;
use crate::domain::ports::{LlmClient, Storage};
use crate::utils::error::{FinAgentError, Result};
use crate::utils::truncate_for_display;
use colored::Colorize;

pub const SYSTEM_PROMPT: &str = "You are a financial assistant powered by DeepSeek and Tushare. \
You help users analyze stocks, check prices, track their portfolio and provide recommendations. \
CRITICAL RULE: every piece of market data (prices, trends, fundamentals) MUST come from the provided tools. \
Never answer market questions from internal knowledge, which may be outdated; fetch the latest data first. \
If the question is time-sensitive ('today', 'recent', 'this week'), call 'get_current_time' first to establish the date. \
For latest or current prices use 'get_realtime_price'. \
For trends and analysis use 'get_daily_price' for historical context. \
For valuation (PE, PB) or market cap use 'get_daily_basic'. \
For financial performance (revenue, profit) use 'get_income_statement'. \
For the user's holdings use 'get_portfolio_status'; record trades only when the user explicitly reports one. \
When analyzing, state the date of the data you are using, \
calculate percentage changes and describe the trend (upward, downward, volatile). \
When you have enough information, answer the user's question directly.";

/// Drives the model/tool loop for one question at a time.
pub struct FinAgent<S: Storage> {
    llm: Box<dyn LlmClient>,
    tools: ToolRegistry<S>,
    history: Vec<ChatMessage>,
    max_steps: usize,
    display_truncate: usize,
    show_progress: bool,
}

impl<S: Storage> FinAgent<S> {
    pub fn new(llm: Box<dyn LlmClient>, tools: ToolRegistry<S>, settings: &AgentSettings) -> Self {
        Self {
            llm,
            tools,
            history: Vec::new(),
            max_steps: settings.max_steps,
            display_truncate: settings.display_truncate,
            show_progress: true,
        }
    }

    /// Toggles the "Calling Tool" / "Tool Result" lines on stdout.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn tools(&self) -> &ToolRegistry<S> {
        &self.tools
    }

    /// Answers one question. The conversation restarts from the system prompt on every call.
    pub async fn run(&mut self, user_input: &str) -> Result<String> {
        self.history = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(user_input),
        ];
        let definitions = self.tools.definitions();

        for step in 1..=self.max_steps {
            tracing::debug!("Agent step {} ({} messages)", step, self.history.len());
            let message = self.llm.chat(&self.history, &definitions).await?;

            if !message.has_tool_calls() {
                let answer = message.content.clone().unwrap_or_default();
                self.history.push(message);
                return Ok(answer);
            }

            let calls = message.tool_calls().to_vec();
            self.history.push(message);
            self.progress(&"Thinking... (Process Tool Calls)".yellow().to_string());

            for call in calls {
                let name = &call.function.name;
                let arguments = &call.function.arguments;
                self.progress(
                    &format!("Calling Tool: {} with args: {}", name, arguments)
                        .cyan()
                        .to_string(),
                );
                tracing::info!("Tool call {} -> {}", call.id, name);

                let result = self.tools.execute(name, arguments).await;

                self.progress(
                    &format!(
                        "Tool Result: {}",
                        truncate_for_display(&result, self.display_truncate)
                    )
                    .blue()
                    .to_string(),
                );
                self.history.push(ChatMessage::tool_result(call.id, result));
            }
        }

        tracing::warn!("Agent hit the step limit of {}", self.max_steps);
        Err(FinAgentError::StepLimitError {
            steps: self.max_steps,
        })
    }

    fn progress(&self, line: &str) {
        if self.show_progress {
            println!("{}", line);
        }
    }
}
