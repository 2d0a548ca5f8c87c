use crate::config::settings::DefaultsSettings;
use crate::core::portfolio::PortfolioManager;
use crate::domain::model::{Record, ToolDefinition};
use crate::domain::ports::{MarketData, Storage};
use crate::utils::validation;
use chrono::{Duration, NaiveDateTime};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

const STOCK_BASIC_FIELDS: &str = "ts_code,symbol,name,area,industry,list_date";
const DAILY_BASIC_FIELDS: &str = "ts_code,trade_date,close,turnover_rate,volume_ratio,pe,pe_ttm,pb,ps,ps_ttm,dv_ratio,total_share,float_share,free_share,total_mv,circ_mv";
const INCOME_FIELDS: &str = "ts_code,ann_date,f_ann_date,end_date,report_type,comp_type,total_revenue,revenue,total_profit,n_income,n_income_attr_p";

/// Handler outcome; both arms end up verbatim in the `tool` message.
type ToolOutput = std::result::Result<String, String>;

/// The functions exposed to the model and their dispatch.
pub struct ToolRegistry<S: Storage> {
    market: Arc<dyn MarketData>,
    portfolio: Mutex<PortfolioManager<S>>,
    defaults: DefaultsSettings,
    clock: Clock,
}

impl<S: Storage> ToolRegistry<S> {
    pub fn new(
        market: Arc<dyn MarketData>,
        portfolio: PortfolioManager<S>,
        defaults: DefaultsSettings,
    ) -> Self {
        Self {
            market,
            portfolio: Mutex::new(portfolio),
            defaults,
            clock: Arc::new(|| chrono::Local::now().naive_local()),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        tool_definitions()
    }

    /// Runs one tool call. Failures come back as `Error: ...` text for the model to read.
    pub async fn execute(&self, name: &str, arguments: &str) -> String {
        let args = match parse_arguments(arguments) {
            Some(args) => args,
            None => return "Error: Invalid JSON arguments.".to_string(),
        };
        let args = ToolArgs { tool: name, map: &args };

        let output = match name {
            "get_current_time" => Ok(self.current_time()),
            "get_stock_basic" => self.stock_basic(&args).await,
            "get_daily_price" => self.daily_price(&args).await,
            "get_realtime_price" => self.realtime_price(&args).await,
            "get_daily_basic" => self.daily_basic(&args).await,
            "get_income_statement" => self.income_statement(&args).await,
            "get_portfolio_status" => self.portfolio_status().await,
            "add_portfolio_position" => self.add_portfolio_position(&args).await,
            "remove_portfolio_position" => self.remove_portfolio_position(&args).await,
            _ => Err(format!("Error: Tool '{}' not found.", name)),
        };

        output.unwrap_or_else(|e| e)
    }

    fn current_time(&self) -> String {
        (self.clock)().format("%Y-%m-%d %H:%M:%S").to_string()
    }

    /// `(start, end)` as YYYYMMDD, defaulting to the last `lookback_days` up to today.
    fn date_window(
        &self,
        args: &ToolArgs<'_>,
        lookback_days: i64,
    ) -> std::result::Result<(String, String), String> {
        let today = (self.clock)().date();
        let start = match args.optional_str("start_date") {
            Some(raw) => normalize_date("start_date", raw)?,
            None => (today - Duration::days(lookback_days)).format("%Y%m%d").to_string(),
        };
        let end = match args.optional_str("end_date") {
            Some(raw) => normalize_date("end_date", raw)?,
            None => today.format("%Y%m%d").to_string(),
        };
        Ok((start, end))
    }

    async fn stock_basic(&self, args: &ToolArgs<'_>) -> ToolOutput {
        let ts_code = args.optional_str("ts_code");
        let name = args.optional_str("name");

        match (ts_code, name) {
            (None, Some(name)) => {
                let params = json!({"exchange": "", "list_status": "L"});
                let rows = self
                    .market
                    .query("stock_basic", params, STOCK_BASIC_FIELDS)
                    .await
                    .map_err(|e| format!("Error fetching stock basic info: {}", e))?;
                let matches: Vec<Record> = rows
                    .into_iter()
                    .filter(|row| row.get_str("name") == Some(name))
                    .collect();
                if matches.is_empty() {
                    return Err(format!("Error: Stock with name '{}' not found.", name));
                }
                records_json(&matches)
            }
            (Some(ts_code), _) => {
                let rows = self
                    .market
                    .query("stock_basic", json!({"ts_code": ts_code}), STOCK_BASIC_FIELDS)
                    .await
                    .map_err(|e| format!("Error fetching stock basic info: {}", e))?;
                if rows.is_empty() {
                    return Err(format!("Error: Stock code '{}' not found.", ts_code));
                }
                records_json(&rows)
            }
            (None, None) => Err("Error: Please provide either ts_code or name.".to_string()),
        }
    }

    async fn daily_price(&self, args: &ToolArgs<'_>) -> ToolOutput {
        let ts_code = args.required_str("ts_code")?;
        let (start, end) = self.date_window(args, self.defaults.price_lookback_days)?;

        let params = json!({"ts_code": ts_code, "start_date": start, "end_date": end});
        let mut rows = self
            .market
            .query("daily", params, "")
            .await
            .map_err(|e| format!("Error fetching daily price: {}", e))?;
        if rows.is_empty() {
            return Ok(format!(
                "No data found for {} between {} and {}.",
                ts_code, start, end
            ));
        }

        sort_desc_by(&mut rows, "trade_date");
        records_json(&rows)
    }

    async fn realtime_price(&self, args: &ToolArgs<'_>) -> ToolOutput {
        let ts_code = args.required_str("ts_code")?;
        let mut rows = self
            .market
            .realtime_quote(ts_code)
            .await
            .map_err(|e| format!("Error fetching realtime price: {}", e))?;
        if rows.is_empty() {
            return Ok(format!("No realtime data found for {}.", ts_code));
        }

        for row in &mut rows {
            row.insert("ts_code", Value::String(ts_code.to_string()));
        }
        records_json(&rows)
    }

    async fn daily_basic(&self, args: &ToolArgs<'_>) -> ToolOutput {
        let ts_code = args.required_str("ts_code")?;
        let (start, end) = self.date_window(args, self.defaults.price_lookback_days)?;

        let params = json!({"ts_code": ts_code, "start_date": start, "end_date": end});
        let mut rows = self
            .market
            .query("daily_basic", params, DAILY_BASIC_FIELDS)
            .await
            .map_err(|e| format!("Error fetching daily basic info: {}", e))?;
        if rows.is_empty() {
            return Ok(format!("No daily basic data found for {}.", ts_code));
        }

        sort_desc_by(&mut rows, "trade_date");
        records_json(&rows)
    }

    async fn income_statement(&self, args: &ToolArgs<'_>) -> ToolOutput {
        let ts_code = args.required_str("ts_code")?;
        let (start, end) = self.date_window(args, self.defaults.income_lookback_days)?;

        let params = json!({"ts_code": ts_code, "start_date": start, "end_date": end});
        let mut rows = self
            .market
            .query("income", params, INCOME_FIELDS)
            .await
            .map_err(|e| format!("Error fetching income statement: {}", e))?;
        if rows.is_empty() {
            return Ok(format!("No income statement data found for {}.", ts_code));
        }

        sort_desc_by(&mut rows, "end_date");
        records_json(&rows)
    }

    async fn portfolio_status(&self) -> ToolOutput {
        let portfolio = self.portfolio.lock().await;
        match portfolio.status(self.market.as_ref()).await {
            Some(report) => serde_json::to_string(&report)
                .map_err(|e| format!("Error rendering portfolio: {}", e)),
            None => Ok("Portfolio is empty.".to_string()),
        }
    }

    async fn add_portfolio_position(&self, args: &ToolArgs<'_>) -> ToolOutput {
        let ts_code = args.required_str("ts_code")?;
        let amount = args.required_i64("amount")?;
        let price = args.required_f64("price")?;

        let mut portfolio = self.portfolio.lock().await;
        portfolio
            .add_position(ts_code, amount, price)
            .await
            .map_err(|e| format!("Error: {}", e))
    }

    async fn remove_portfolio_position(&self, args: &ToolArgs<'_>) -> ToolOutput {
        let ts_code = args.required_str("ts_code")?;
        let amount = args.required_i64("amount")?;
        let price = args.required_f64("price")?;

        let mut portfolio = self.portfolio.lock().await;
        portfolio
            .remove_position(ts_code, amount, price)
            .await
            .map_err(|e| format!("Error: {}", e))
    }
}

/// `""` and `null` mean "no arguments"; anything that is not a JSON object is rejected.
fn parse_arguments(arguments: &str) -> Option<Map<String, Value>> {
    if arguments.trim().is_empty() {
        return Some(Map::new());
    }
    match serde_json::from_str::<Value>(arguments).ok()? {
        Value::Object(map) => Some(map),
        Value::Null => Some(Map::new()),
        _ => None,
    }
}

struct ToolArgs<'a> {
    tool: &'a str,
    map: &'a Map<String, Value>,
}

impl<'a> ToolArgs<'a> {
    fn missing(&self, key: &str) -> String {
        format!(
            "Error: Missing required argument '{}' for tool '{}'.",
            key, self.tool
        )
    }

    fn optional_str(&self, key: &str) -> Option<&'a str> {
        self.map
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn required_str(&self, key: &str) -> std::result::Result<&'a str, String> {
        self.optional_str(key).ok_or_else(|| self.missing(key))
    }

    fn required_f64(&self, key: &str) -> std::result::Result<f64, String> {
        let value = self.map.get(key).ok_or_else(|| self.missing(key))?;
        let parsed = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        parsed
            .filter(|n| n.is_finite())
            .ok_or_else(|| format!("Error: Argument '{}' must be a number.", key))
    }

    fn required_i64(&self, key: &str) -> std::result::Result<i64, String> {
        let number = self.required_f64(key)?;
        if number.fract() != 0.0 {
            return Err(format!("Error: Argument '{}' must be a whole number.", key));
        }
        // i64::MAX as f64 rounds up to 2^63, which is itself out of range
        if number < i64::MIN as f64 || number >= i64::MAX as f64 {
            return Err(format!("Error: Argument '{}' is out of range.", key));
        }
        Ok(number as i64)
    }
}

/// Accepts `YYYYMMDD` as well as `YYYY-MM-DD`, which models often produce.
fn normalize_date(field: &str, raw: &str) -> std::result::Result<String, String> {
    let compact: String = raw.chars().filter(|c| !matches!(c, '-' | '/')).collect();
    validation::validate_trade_date(field, &compact)
        .map(|_| compact)
        .map_err(|_| format!("Error: Invalid {} '{}', expected YYYYMMDD.", field, raw))
}

fn sort_desc_by(rows: &mut [Record], key: &str) {
    rows.sort_by(|a, b| b.get_str(key).cmp(&a.get_str(key)));
}

fn records_json(rows: &[Record]) -> ToolOutput {
    serde_json::to_string(rows).map_err(|e| format!("Error serializing result: {}", e))
}

fn ts_code_property() -> Value {
    json!({"type": "string", "description": "The stock code (e.g., '000001.SZ')."})
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::function(
            "get_current_time",
            "Get the current system date and time. Use this when the user asks about 'today', 'now', or relative dates.",
            json!({"type": "object", "properties": {}, "required": []}),
        ),
        ToolDefinition::function(
            "get_stock_basic",
            "Get basic information about a stock, such as its industry, area, and listing date. You can search by stock name or code.",
            json!({
                "type": "object",
                "properties": {
                    "ts_code": ts_code_property(),
                    "name": {"type": "string", "description": "The stock name (e.g., '平安银行')."}
                },
                "required": []
            }),
        ),
        ToolDefinition::function(
            "get_daily_price",
            "Get historical daily price data for a stock within a date range (Open, High, Low, Close, Vol).",
            json!({
                "type": "object",
                "properties": {
                    "ts_code": ts_code_property(),
                    "start_date": {"type": "string", "description": "Start date in YYYYMMDD format. Defaults to 30 days ago."},
                    "end_date": {"type": "string", "description": "End date in YYYYMMDD format. Defaults to today."}
                },
                "required": ["ts_code"]
            }),
        ),
        ToolDefinition::function(
            "get_realtime_price",
            "Get the latest real-time stock price data (current price, bid/ask, volume, etc.). Use this for the most up-to-date market snapshot.",
            json!({
                "type": "object",
                "properties": {"ts_code": ts_code_property()},
                "required": ["ts_code"]
            }),
        ),
        ToolDefinition::function(
            "get_daily_basic",
            "Get daily basic indicators including PE (Price-to-Earnings), PB (Price-to-Book), Turnover Rate, and Market Value.",
            json!({
                "type": "object",
                "properties": {
                    "ts_code": ts_code_property(),
                    "start_date": {"type": "string", "description": "Start date (YYYYMMDD)."},
                    "end_date": {"type": "string", "description": "End date (YYYYMMDD)."}
                },
                "required": ["ts_code"]
            }),
        ),
        ToolDefinition::function(
            "get_income_statement",
            "Get historical income statement data (Revenue, Net Income) to analyze financial performance.",
            json!({
                "type": "object",
                "properties": {
                    "ts_code": ts_code_property(),
                    "start_date": {"type": "string", "description": "Start date (YYYYMMDD). Defaults to 2 years ago."},
                    "end_date": {"type": "string", "description": "End date (YYYYMMDD)."}
                },
                "required": ["ts_code"]
            }),
        ),
        ToolDefinition::function(
            "get_portfolio_status",
            "Get the user's portfolio holdings valued at real-time prices, with profit and loss per position and in total.",
            json!({"type": "object", "properties": {}, "required": []}),
        ),
        ToolDefinition::function(
            "add_portfolio_position",
            "Record a purchase in the user's portfolio. Only call this when the user explicitly reports a buy.",
            json!({
                "type": "object",
                "properties": {
                    "ts_code": ts_code_property(),
                    "amount": {"type": "integer", "description": "Number of shares bought."},
                    "price": {"type": "number", "description": "Price paid per share."}
                },
                "required": ["ts_code", "amount", "price"]
            }),
        ),
        ToolDefinition::function(
            "remove_portfolio_position",
            "Record a sale from the user's portfolio. Only call this when the user explicitly reports a sell.",
            json!({
                "type": "object",
                "properties": {
                    "ts_code": ts_code_property(),
                    "amount": {"type": "integer", "description": "Number of shares sold."},
                    "price": {"type": "number", "description": "Price received per share."}
                },
                "required": ["ts_code", "amount", "price"]
            }),
        ),
    ]
}
