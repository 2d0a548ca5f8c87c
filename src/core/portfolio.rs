use crate::domain::model::{
    ExportFormat, Holdings, PortfolioReport, Position, PositionReport, TradeAction, Transaction,
};
use crate::domain::ports::{MarketData, Storage};
use crate::utils::error::{FinAgentError, Result};
use serde::Serialize;
use std::fmt::Write as _;

pub const PORTFOLIO_FILE: &str = "portfolio.json";

/// Holdings persisted as JSON through a [`Storage`] backend.
pub struct PortfolioManager<S: Storage> {
    storage: S,
    holdings: Holdings,
}

#[derive(Serialize)]
struct PositionRow<'a> {
    ts_code: &'a str,
    amount: i64,
    cost: f64,
}

impl<S: Storage> PortfolioManager<S> {
    /// A missing or unreadable portfolio file starts an empty portfolio.
    pub async fn load(storage: S) -> Self {
        let holdings = match storage.read_file(PORTFOLIO_FILE).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!("Ignoring corrupt {}: {}", PORTFOLIO_FILE, e);
                Holdings::default()
            }),
            Err(_) => Holdings::default(),
        };
        Self { storage, holdings }
    }

    pub fn holdings(&self) -> &Holdings {
        &self.holdings
    }

    /// Persists `next` and only then makes it the in-memory state.
    async fn commit(&mut self, next: Holdings) -> Result<()> {
        let json = serde_json::to_vec_pretty(&next)?;
        self.storage.write_file(PORTFOLIO_FILE, &json).await?;
        self.holdings = next;
        Ok(())
    }

    /// Buys `amount` shares; an existing position is re-costed at the weighted average.
    pub async fn add_position(&mut self, ts_code: &str, amount: i64, price: f64) -> Result<String> {
        if amount <= 0 || !price.is_finite() || price <= 0.0 {
            return Err(FinAgentError::portfolio("Amount and price must be positive."));
        }
        let trade_value = finite_money(amount as f64 * price)?;

        let mut next = self.holdings.clone();
        let position = match next.positions.get(ts_code) {
            Some(pos) => {
                let total = pos.amount.checked_add(amount).ok_or_else(|| {
                    FinAgentError::portfolio(format!(
                        "Position size for {} would overflow.",
                        ts_code
                    ))
                })?;
                let total_cost = finite_money(pos.amount as f64 * pos.cost + trade_value)?;
                Position {
                    amount: total,
                    cost: total_cost / total as f64,
                }
            }
            None => Position {
                amount,
                cost: price,
            },
        };
        next.positions.insert(ts_code.to_string(), position);

        // cash tracks net flow and may go negative
        next.cash = finite_money(next.cash - trade_value)?;
        next.history.push(transaction(TradeAction::Buy, ts_code, amount, price));
        self.commit(next).await?;

        tracing::info!("Bought {} x {} @ {}", amount, ts_code, price);
        Ok(format!(
            "Successfully added {} shares of {} at {}.",
            amount, ts_code, price
        ))
    }

    pub async fn remove_position(
        &mut self,
        ts_code: &str,
        amount: i64,
        price: f64,
    ) -> Result<String> {
        if amount <= 0 || !price.is_finite() || price < 0.0 {
            return Err(FinAgentError::portfolio(
                "Amount must be positive and price cannot be negative.",
            ));
        }

        let held = match self.holdings.positions.get(ts_code) {
            Some(pos) => pos.amount,
            None => {
                return Err(FinAgentError::portfolio(format!(
                    "You do not hold {}.",
                    ts_code
                )))
            }
        };

        if amount > held {
            return Err(FinAgentError::portfolio(format!(
                "Insufficient shares. You have {}, trying to sell {}.",
                held, amount
            )));
        }

        let proceeds = finite_money(amount as f64 * price)?;
        let mut next = self.holdings.clone();
        next.cash = finite_money(next.cash + proceeds)?;
        if amount == held {
            next.positions.remove(ts_code);
        } else if let Some(pos) = next.positions.get_mut(ts_code) {
            pos.amount -= amount;
        }
        next.history.push(transaction(TradeAction::Sell, ts_code, amount, price));
        self.commit(next).await?;

        tracing::info!("Sold {} x {} @ {}", amount, ts_code, price);
        Ok(format!(
            "Successfully sold {} shares of {} at {}.",
            amount, ts_code, price
        ))
    }

    /// Values every position at its latest quote. Returns `None` for an empty portfolio.
    pub async fn status(&self, quotes: &dyn MarketData) -> Option<PortfolioReport> {
        if self.holdings.positions.is_empty() {
            return None;
        }

        let mut positions = Vec::with_capacity(self.holdings.positions.len());
        let mut total_market_value = 0.0;
        let mut total_cost_value = 0.0;

        for (ts_code, pos) in &self.holdings.positions {
            let live_price = latest_price(quotes, ts_code).await;
            let current_price = live_price.unwrap_or(pos.cost);

            let market_value = pos.amount as f64 * current_price;
            let cost_value = pos.amount as f64 * pos.cost;
            let pnl = market_value - cost_value;

            total_market_value += market_value;
            total_cost_value += cost_value;

            positions.push(PositionReport {
                ts_code: ts_code.clone(),
                amount: pos.amount,
                cost: pos.cost,
                current_price,
                price_estimated: live_price.is_none(),
                market_value,
                pnl,
                pnl_pct: percent(pnl, cost_value),
            });
        }

        let total_pnl = total_market_value - total_cost_value;
        Some(PortfolioReport {
            positions,
            total_market_value,
            total_cost_value,
            total_pnl,
            total_pnl_pct: percent(total_pnl, total_cost_value),
            cash: self.holdings.cash,
        })
    }

    pub async fn clear(&mut self) -> Result<String> {
        self.commit(Holdings::default()).await?;
        Ok("Portfolio cleared.".to_string())
    }

    pub fn export(&self, format: ExportFormat) -> Result<String> {
        match format {
            ExportFormat::Json => Ok(serde_json::to_string_pretty(&self.holdings)?),
            ExportFormat::Csv => {
                let mut writer = csv::Writer::from_writer(Vec::new());
                for (ts_code, pos) in &self.holdings.positions {
                    writer.serialize(PositionRow {
                        ts_code,
                        amount: pos.amount,
                        cost: pos.cost,
                    })?;
                }
                let bytes = writer
                    .into_inner()
                    .map_err(|e| FinAgentError::IoError(e.into_error()))?;
                String::from_utf8(bytes).map_err(|e| FinAgentError::portfolio(e.to_string()))
            }
        }
    }
}

fn transaction(action: TradeAction, ts_code: &str, amount: i64, price: f64) -> Transaction {
    Transaction {
        date: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        action,
        ts_code: ts_code.to_string(),
        amount,
        price,
    }
}

/// JSON cannot hold NaN or infinity, so such a value would corrupt the saved file.
fn finite_money(value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(FinAgentError::portfolio("Trade value is out of range."))
    }
}

fn percent(part: f64, whole: f64) -> f64 {
    if whole == 0.0 {
        0.0
    } else {
        part / whole * 100.0
    }
}

/// Live price, or `None` when the feed fails, is empty, or reports a non-positive price.
async fn latest_price(quotes: &dyn MarketData, ts_code: &str) -> Option<f64> {
    match quotes.realtime_quote(ts_code).await {
        Ok(rows) => rows
            .first()
            .and_then(|row| row.get_f64("price"))
            .filter(|price| *price > 0.0),
        Err(e) => {
            tracing::warn!("No live price for {}: {}", ts_code, e);
            None
        }
    }
}

/// Plain-text table for the terminal.
pub fn render_report(report: &PortfolioReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<12} {:>8} {:>10} {:>14} {:>14} {:>12} {:>8}",
        "Code", "Amount", "Cost", "Price", "Market Value", "PnL", "PnL %"
    );
    for pos in &report.positions {
        let price = if pos.price_estimated {
            format!("{:.2} (Est.)", pos.current_price)
        } else {
            format!("{:.2}", pos.current_price)
        };
        let _ = writeln!(
            out,
            "{:<12} {:>8} {:>10.2} {:>14} {:>14.2} {:>12.2} {:>7.2}%",
            pos.ts_code, pos.amount, pos.cost, price, pos.market_value, pos.pnl, pos.pnl_pct
        );
    }
    let _ = writeln!(
        out,
        "Total market value: {:.2}  Total cost: {:.2}  PnL: {:.2} ({:.2}%)  Cash: {:.2}",
        report.total_market_value,
        report.total_cost_value,
        report.total_pnl,
        report.total_pnl_pct,
        report.cash
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Record;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Clone, Default)]
    struct MockStorage {
        files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        fail_writes: Arc<AtomicBool>,
    }

    impl MockStorage {
        async fn get_file(&self, path: &str) -> Option<Vec<u8>> {
            self.files.lock().await.get(path).cloned()
        }
    }

    impl Storage for MockStorage {
        async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
            let files = self.files.lock().await;
            files.get(path).cloned().ok_or_else(|| {
                FinAgentError::IoError(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("File not found: {}", path),
                ))
            })
        }

        async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(FinAgentError::IoError(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "read-only volume",
                )));
            }
            self.files
                .lock()
                .await
                .insert(path.to_string(), data.to_vec());
            Ok(())
        }
    }

    struct FixedQuotes {
        prices: HashMap<String, &'static str>,
    }

    #[async_trait]
    impl MarketData for FixedQuotes {
        async fn query(&self, _api: &str, _params: Value, _fields: &str) -> Result<Vec<Record>> {
            Ok(vec![])
        }

        async fn realtime_quote(&self, ts_code: &str) -> Result<Vec<Record>> {
            match self.prices.get(ts_code) {
                Some(price) => Ok(vec![Record::from_pairs([("price", json!(price))])]),
                None => Err(FinAgentError::market_data("feed unavailable")),
            }
        }
    }

    #[tokio::test]
    async fn test_add_position_averages_cost() {
        let storage = MockStorage::default();
        let mut portfolio = PortfolioManager::load(storage.clone()).await;

        portfolio.add_position("000001.SZ", 100, 10.0).await.unwrap();
        let msg = portfolio.add_position("000001.SZ", 300, 12.0).await.unwrap();
        assert_eq!(msg, "Successfully added 300 shares of 000001.SZ at 12.");

        let pos = &portfolio.holdings().positions["000001.SZ"];
        assert_eq!(pos.amount, 400);
        assert!((pos.cost - 11.5).abs() < 1e-9);
        assert!((portfolio.holdings().cash + 4600.0).abs() < 1e-9);
        assert_eq!(portfolio.holdings().history.len(), 2);
        assert_eq!(portfolio.holdings().history[0].action, TradeAction::Buy);

        let saved = storage.get_file(PORTFOLIO_FILE).await.unwrap();
        let reloaded: Holdings = serde_json::from_slice(&saved).unwrap();
        assert_eq!(&reloaded, portfolio.holdings());
    }

    #[tokio::test]
    async fn test_add_position_rejects_non_positive_values() {
        let mut portfolio = PortfolioManager::load(MockStorage::default()).await;
        let err = portfolio.add_position("000001.SZ", 0, 10.0).await.unwrap_err();
        assert_eq!(err.to_string(), "Amount and price must be positive.");
        assert!(portfolio.add_position("000001.SZ", 10, -1.0).await.is_err());
        assert!(portfolio.holdings().positions.is_empty());
    }

    #[tokio::test]
    async fn test_remove_position_rules() {
        let mut portfolio = PortfolioManager::load(MockStorage::default()).await;

        let err = portfolio.remove_position("600519.SH", 1, 1.0).await.unwrap_err();
        assert_eq!(err.to_string(), "You do not hold 600519.SH.");

        portfolio.add_position("600519.SH", 10, 1700.0).await.unwrap();
        let err = portfolio.remove_position("600519.SH", 11, 1800.0).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Insufficient shares. You have 10, trying to sell 11."
        );

        portfolio.remove_position("600519.SH", 4, 1800.0).await.unwrap();
        assert_eq!(portfolio.holdings().positions["600519.SH"].amount, 6);

        portfolio.remove_position("600519.SH", 6, 1800.0).await.unwrap();
        assert!(portfolio.holdings().positions.is_empty());
        assert!((portfolio.holdings().cash - 1000.0).abs() < 1e-9);
        assert_eq!(portfolio.holdings().history.len(), 3);
    }

    #[tokio::test]
    async fn test_status_values_positions_and_falls_back_to_cost() {
        let mut portfolio = PortfolioManager::load(MockStorage::default()).await;
        portfolio.add_position("000001.SZ", 100, 10.0).await.unwrap();
        portfolio.add_position("600519.SH", 10, 1700.0).await.unwrap();

        let quotes = FixedQuotes {
            prices: HashMap::from([("000001.SZ".to_string(), "11.00")]),
        };
        let report = portfolio.status(&quotes).await.unwrap();

        let ping_an = &report.positions[0];
        assert_eq!(ping_an.ts_code, "000001.SZ");
        assert!(!ping_an.price_estimated);
        assert!((ping_an.market_value - 1100.0).abs() < 1e-9);
        assert!((ping_an.pnl_pct - 10.0).abs() < 1e-9);

        let moutai = &report.positions[1];
        assert!(moutai.price_estimated);
        assert_eq!(moutai.current_price, 1700.0);
        assert_eq!(moutai.pnl, 0.0);

        assert!((report.total_cost_value - 18000.0).abs() < 1e-9);
        assert!((report.total_pnl - 100.0).abs() < 1e-9);

        let text = render_report(&report);
        assert!(text.contains("1700.00 (Est.)"));
    }

    #[tokio::test]
    async fn test_status_empty_portfolio() {
        let portfolio = PortfolioManager::load(MockStorage::default()).await;
        let quotes = FixedQuotes {
            prices: HashMap::new(),
        };
        assert!(portfolio.status(&quotes).await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_loads_empty_and_clear_resets() {
        let storage = MockStorage::default();
        storage
            .write_file(PORTFOLIO_FILE, b"not json at all")
            .await
            .unwrap();

        let mut portfolio = PortfolioManager::load(storage.clone()).await;
        assert!(portfolio.holdings().positions.is_empty());

        portfolio.add_position("000001.SZ", 1, 1.0).await.unwrap();
        assert_eq!(portfolio.clear().await.unwrap(), "Portfolio cleared.");
        assert_eq!(portfolio.holdings(), &Holdings::default());
    }

    #[tokio::test]
    async fn test_export_csv_and_json() {
        let mut portfolio = PortfolioManager::load(MockStorage::default()).await;
        portfolio.add_position("000001.SZ", 100, 10.5).await.unwrap();

        let csv = portfolio.export(ExportFormat::Csv).unwrap();
        assert_eq!(csv, "ts_code,amount,cost\n000001.SZ,100,10.5\n");

        let json = portfolio.export(ExportFormat::Json).unwrap();
        let parsed: Holdings = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.positions["000001.SZ"].amount, 100);
    }

    #[tokio::test]
    async fn test_out_of_range_money_is_rejected_and_file_stays_loadable() {
        let storage = MockStorage::default();
        let mut portfolio = PortfolioManager::load(storage.clone()).await;
        portfolio.add_position("600519.SH", 10, 1700.0).await.unwrap();

        let err = portfolio.add_position("000001.SZ", 10, 1e308).await.unwrap_err();
        assert_eq!(err.to_string(), "Trade value is out of range.");
        assert!(portfolio.add_position("000001.SZ", 10, f64::INFINITY).await.is_err());
        assert!(portfolio.add_position("000001.SZ", 10, f64::NAN).await.is_err());
        assert!(portfolio.remove_position("600519.SH", 1, f64::INFINITY).await.is_err());
        assert!(portfolio.remove_position("600519.SH", 10, 1e308).await.is_err());

        let reloaded = PortfolioManager::load(storage).await;
        assert_eq!(reloaded.holdings().positions.len(), 1);
        assert_eq!(reloaded.holdings().positions["600519.SH"].amount, 10);
        assert!((reloaded.holdings().cash + 17000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_position_size_overflow_is_an_error() {
        let mut portfolio = PortfolioManager::load(MockStorage::default()).await;
        let half = i64::MAX / 2 + 1;

        portfolio.add_position("000001.SZ", half, 1.0).await.unwrap();
        let err = portfolio.add_position("000001.SZ", half, 1.0).await.unwrap_err();
        assert_eq!(err.to_string(), "Position size for 000001.SZ would overflow.");
        assert_eq!(portfolio.holdings().positions["000001.SZ"].amount, half);
        assert_eq!(portfolio.holdings().history.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_save_keeps_previous_state() {
        let storage = MockStorage::default();
        let mut portfolio = PortfolioManager::load(storage.clone()).await;
        portfolio.add_position("000001.SZ", 100, 10.0).await.unwrap();
        let before = portfolio.holdings().clone();

        storage.fail_writes.store(true, Ordering::SeqCst);
        assert!(portfolio.add_position("000001.SZ", 100, 12.0).await.is_err());
        assert!(portfolio.remove_position("000001.SZ", 50, 11.0).await.is_err());
        assert!(portfolio.clear().await.is_err());

        assert_eq!(portfolio.holdings(), &before);
    }

    #[tokio::test]
    async fn test_remove_position_rejects_non_positive_amount() {
        let mut portfolio = PortfolioManager::load(MockStorage::default()).await;
        portfolio.add_position("000001.SZ", 100, 10.0).await.unwrap();

        for amount in [0, -5] {
            let err = portfolio
                .remove_position("000001.SZ", amount, 10.0)
                .await
                .unwrap_err();
            assert_eq!(
                err.to_string(),
                "Amount must be positive and price cannot be negative."
            );
        }
        assert_eq!(portfolio.holdings().positions["000001.SZ"].amount, 100);
    }

    #[tokio::test]
    async fn test_status_zero_quote_falls_back_to_cost() {
        let mut portfolio = PortfolioManager::load(MockStorage::default()).await;
        portfolio.add_position("000001.SZ", 100, 10.0).await.unwrap();
        portfolio.add_position("600519.SH", 10, 1700.0).await.unwrap();

        // suspended stocks report a zero price
        let quotes = FixedQuotes {
            prices: HashMap::from([
                ("000001.SZ".to_string(), "0.00"),
                ("600519.SH".to_string(), "0"),
            ]),
        };
        let report = portfolio.status(&quotes).await.unwrap();

        assert!(report.positions.iter().all(|p| p.price_estimated));
        assert_eq!(report.positions[0].current_price, 10.0);
        assert_eq!(report.positions[1].current_price, 1700.0);
        assert_eq!(report.total_pnl, 0.0);
    }
}
