//! Parsing for the legacy `hq.sinajs.cn` quote feed that Tushare's realtime quotes wrap.

use crate::domain::model::Record;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Column order of the comma-separated quote payload.
pub const QUOTE_COLUMNS: [&str; 32] = [
    "name", "open", "pre_close", "price", "high", "low", "bid", "ask", "volume", "amount", "b1_v",
    "b1_p", "b2_v", "b2_p", "b3_v", "b3_p", "b4_v", "b4_p", "b5_v", "b5_p", "a1_v", "a1_p", "a2_v",
    "a2_p", "a3_v", "a3_p", "a4_v", "a4_p", "a5_v", "a5_p", "date", "time",
];

/// `000001.SZ` -> `sz000001`. Without a suffix the exchange is inferred from the code prefix.
pub fn quote_symbol(ts_code: &str) -> String {
    let (code, suffix) = match ts_code.split_once('.') {
        Some((code, suffix)) => (code, Some(suffix.to_ascii_uppercase())),
        None => (ts_code, None),
    };

    let exchange = match suffix.as_deref() {
        Some("SH") => "sh",
        Some("SZ") => "sz",
        Some("BJ") => "bj",
        _ if code.starts_with(['5', '6', '9']) || code.starts_with("11") || code.starts_with("13") => {
            "sh"
        }
        _ => "sz",
    };

    format!("{}{}", exchange, code)
}

/// One record per non-empty `var hq_str_<symbol>="...";` line.
pub fn parse_quotes(body: &str) -> Vec<Record> {
    static LINE: OnceLock<Regex> = OnceLock::new();
    let re = LINE.get_or_init(|| {
        Regex::new(r#"var hq_str_([a-z]{2})(\w+)="([^"]*)""#).expect("static regex")
    });

    re.captures_iter(body)
        .filter_map(|caps| {
            let payload = caps.get(3)?.as_str();
            if payload.trim().is_empty() {
                return None;
            }

            let mut record = Record::from_pairs(
                QUOTE_COLUMNS
                    .iter()
                    .zip(payload.split(','))
                    .map(|(col, val)| (*col, Value::String(val.trim().to_string()))),
            );
            record.insert("code", Value::String(caps[2].to_string()));
            Some(record)
        })
        .collect()
}
