use crate::adapters::realtime;
use crate::config::{AgentConfig, Settings};
use crate::domain::model::Record;
use crate::domain::ports::MarketData;
use crate::utils::error::{FinAgentError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const QUOTE_REFERER: &str = "https://finance.sina.com.cn";

/// Tushare Pro HTTP API plus the legacy realtime quote feed.
pub struct TushareClient {
    client: Client,
    token: String,
    api_url: String,
    quote_url: String,
}

#[derive(Serialize)]
struct ProRequest<'a> {
    api_name: &'a str,
    token: &'a str,
    params: &'a Value,
    fields: &'a str,
}

#[derive(Deserialize)]
struct ProResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<ProData>,
}

#[derive(Deserialize)]
struct ProData {
    fields: Vec<String>,
    #[serde(default)]
    items: Vec<Vec<Value>>,
}

impl ProData {
    fn into_records(self) -> Vec<Record> {
        let fields = self.fields;
        self.items
            .into_iter()
            .map(|row| Record::from_pairs(fields.iter().cloned().zip(row)))
            .collect()
    }
}

impl TushareClient {
    pub fn new(
        token: impl Into<String>,
        api_url: impl Into<String>,
        quote_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            token: token.into(),
            api_url: api_url.into(),
            quote_url: quote_url.into(),
        })
    }

    pub fn from_config(config: &AgentConfig, settings: &Settings) -> Result<Self> {
        let token = config
            .tushare_token
            .clone()
            .ok_or_else(|| FinAgentError::MissingConfigError {
                fields: vec!["TUSHARE_TOKEN".to_string()],
            })?;
        Self::new(
            token,
            &config.tushare_api_url,
            &config.realtime_quote_url,
            settings.request_timeout(),
        )
    }
}

#[async_trait]
impl MarketData for TushareClient {
    async fn query(&self, api_name: &str, params: Value, fields: &str) -> Result<Vec<Record>> {
        tracing::debug!("Tushare {} params={}", api_name, params);

        let body = ProRequest {
            api_name,
            token: &self.token,
            params: &params,
            fields,
        };
        let response = self.client.post(&self.api_url).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(FinAgentError::market_data(format!(
                "Tushare {} returned HTTP {}",
                api_name,
                response.status()
            )));
        }

        let parsed: ProResponse = response.json().await?;
        if parsed.code != 0 {
            return Err(FinAgentError::market_data(format!(
                "Tushare {} failed (code {}): {}",
                api_name,
                parsed.code,
                parsed.msg.unwrap_or_default()
            )));
        }

        let records = parsed.data.map(ProData::into_records).unwrap_or_default();
        tracing::debug!("Tushare {} returned {} rows", api_name, records.len());
        Ok(records)
    }

    async fn realtime_quote(&self, ts_code: &str) -> Result<Vec<Record>> {
        let symbol = realtime::quote_symbol(ts_code);
        let url = format!("{}/list={}", self.quote_url.trim_end_matches('/'), symbol);
        tracing::debug!("Fetching realtime quote from {}", url);

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::REFERER, QUOTE_REFERER)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FinAgentError::market_data(format!(
                "quote feed returned HTTP {} for {}",
                response.status(),
                symbol
            )));
        }

        let text = response.text().await?;
        Ok(realtime::parse_quotes(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client_for(server: &MockServer) -> TushareClient {
        TushareClient::new(
            "tok",
            server.url("/"),
            server.base_url(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_query_zips_fields_and_items() {
        let server = MockServer::start();
        let api_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/")
                .json_body_partial(r#"{"api_name": "daily", "token": "tok"}"#);
            then.status(200).json_body(json!({
                "request_id": "abc",
                "code": 0,
                "msg": "",
                "data": {
                    "fields": ["ts_code", "trade_date", "close"],
                    "items": [
                        ["000001.SZ", "20240102", 9.39],
                        ["000001.SZ", "20240103", 9.19]
                    ],
                    "has_more": false
                }
            }));
        });

        let client = client_for(&server);
        let rows = client
            .query("daily", json!({"ts_code": "000001.SZ"}), "")
            .await
            .unwrap();

        api_mock.assert();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_str("trade_date"), Some("20240102"));
        assert_eq!(rows[1].get_f64("close"), Some(9.19));
    }

    #[tokio::test]
    async fn test_query_nonzero_code_is_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/");
            then.status(200).json_body(json!({
                "code": 40001,
                "msg": "token invalid",
                "data": null
            }));
        });

        let client = client_for(&server);
        let err = client.query("daily", json!({}), "").await.unwrap_err();
        assert!(matches!(err, FinAgentError::MarketDataError { .. }));
        assert!(err.to_string().contains("token invalid"));
    }

    #[tokio::test]
    async fn test_realtime_quote_uses_exchange_symbol() {
        let server = MockServer::start();
        let quote_mock = server.mock(|when, then| {
            when.method(GET)
                .path("/list=sh600519")
                .header("referer", QUOTE_REFERER);
            then.status(200).body(
                "var hq_str_sh600519=\"贵州茅台,1700.00,1695.50,1712.30,1720.00,1690.00,1712.20,1712.30,12345,2100000000.00,100,1712.20,200,1712.10,300,1712.00,400,1711.90,500,1711.80,100,1712.30,200,1712.40,300,1712.50,400,1712.60,500,1712.70,2024-03-01,15:00:00,00\";\n",
            );
        });

        let client = client_for(&server);
        let rows = client.realtime_quote("600519.SH").await.unwrap();

        quote_mock.assert();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_str("name"), Some("贵州茅台"));
        assert_eq!(rows[0].get_f64("price"), Some(1712.30));
        assert_eq!(rows[0].get_str("time"), Some("15:00:00"));
    }
}
