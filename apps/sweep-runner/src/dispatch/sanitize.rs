//! Response parsing and KPI sanitization.
//!
//! Backtest responses may carry bare `NaN`/`Infinity` tokens, which are not
//! JSON. They are rewritten to strings so the response can be parsed and
//! stored as-is; KPI extraction then maps any non-finite value to an empty
//! cell and records which fields were affected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// KPI columns extracted from each successful response, in column order.
pub const KPI_FIELDS: [&str; 13] = [
    "net_pnl",
    "net_pnl_quote",
    "total_executors",
    "total_executors_with_position",
    "total_volume",
    "total_long",
    "total_short",
    "accuracy",
    "max_drawdown_usd",
    "max_drawdown_pct",
    "sharpe_ratio",
    "profit_factor",
    "trades",
];

const NON_FINITE_TOKENS: [&str; 3] = ["-Infinity", "Infinity", "NaN"];

/// Parse JSON, accepting bare `NaN`, `Infinity`, and `-Infinity`.
pub fn parse_lenient(text: &str) -> serde_json::Result<Value> {
    match serde_json::from_str(text) {
        Ok(value) => Ok(value),
        Err(strict_err) => {
            let rewritten = quote_non_finite(text);
            if rewritten.len() == text.len() {
                return Err(strict_err);
            }
            serde_json::from_str(&rewritten)
        }
    }
}

/// Quote non-finite number tokens that appear outside strings.
fn quote_non_finite(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut in_string = false;
    let mut escaped = false;
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            rest = &rest[c.len_utf8()..];
            continue;
        }

        if c == '"' {
            in_string = true;
            out.push(c);
            rest = &rest[1..];
            continue;
        }

        let token = NON_FINITE_TOKENS.iter().find(|t| {
            rest.starts_with(*t)
                && !rest[t.len()..]
                    .chars()
                    .next()
                    .is_some_and(|n| n.is_ascii_alphanumeric() || n == '_')
        });
        if let Some(token) = token {
            out.push('"');
            out.push_str(token);
            out.push('"');
            rest = &rest[token.len()..];
        } else {
            out.push(c);
            rest = &rest[c.len_utf8()..];
        }
    }

    out
}

/// KPI values for one result, aligned with [`KPI_FIELDS`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KpiRow {
    /// One slot per KPI field; `None` for missing or sanitized values.
    pub values: Vec<Option<f64>>,
    /// Fields whose value was non-finite and has been blanked.
    pub sanitized: Vec<String>,
}

impl KpiRow {
    /// A row with every KPI empty.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            values: vec![None; KPI_FIELDS.len()],
            sanitized: Vec::new(),
        }
    }

    /// Value of a named KPI.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<f64> {
        KPI_FIELDS
            .iter()
            .position(|f| *f == field)
            .and_then(|i| self.values.get(i).copied().flatten())
    }

    /// Whether the run reported no trades (zero or absent).
    #[must_use]
    pub fn has_no_trades(&self) -> bool {
        self.get("trades").is_none_or(|t| t == 0.0)
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Extract KPIs from a response body.
///
/// Reads `results` when it is an object, else the top level.
#[must_use]
pub fn extract_kpis(body: &Value) -> KpiRow {
    let source = match body.get("results") {
        Some(results @ Value::Object(_)) => results,
        _ => body,
    };

    let mut row = KpiRow::empty();
    for (slot, field) in row.values.iter_mut().zip(KPI_FIELDS) {
        match source.get(field).and_then(numeric) {
            Some(v) if v.is_finite() => *slot = Some(v),
            Some(_) => row.sanitized.push(field.to_string()),
            None => {}
        }
    }
    row
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_lenient_rewrites_tokens() {
        let text = r#"{"results": {"net_pnl": NaN, "sharpe_ratio": Infinity, "max_drawdown_pct": -Infinity, "note": "NaN stays"}}"#;
        let value = parse_lenient(text).unwrap();

        assert_eq!(value["results"]["net_pnl"], json!("NaN"));
        assert_eq!(value["results"]["sharpe_ratio"], json!("Infinity"));
        assert_eq!(value["results"]["max_drawdown_pct"], json!("-Infinity"));
        assert_eq!(value["results"]["note"], json!("NaN stays"));
    }

    #[test]
    fn test_parse_lenient_keeps_strict_error() {
        assert!(parse_lenient("<html>502 Bad Gateway</html>").is_err());
    }

    #[test]
    fn test_escaped_quotes_do_not_confuse_scanner() {
        let text = r#"{"msg": "say \"NaN\"", "v": NaN}"#;
        let value = parse_lenient(text).unwrap();
        assert_eq!(value["msg"], json!("say \"NaN\""));
        assert_eq!(value["v"], json!("NaN"));
    }

    #[test]
    fn test_extract_kpis_sanitizes_non_finite() {
        let body = json!({"results": {
            "net_pnl": 0.12,
            "sharpe_ratio": "Infinity",
            "profit_factor": "NaN",
            "total_volume": "1500.5",
            "trades": 42
        }});
        let row = extract_kpis(&body);

        assert_eq!(row.get("net_pnl"), Some(0.12));
        assert_eq!(row.get("total_volume"), Some(1500.5));
        assert_eq!(row.get("sharpe_ratio"), None);
        assert_eq!(row.sanitized, vec!["sharpe_ratio", "profit_factor"]);
        assert!(!row.has_no_trades());
    }

    #[test]
    fn test_extract_kpis_falls_back_to_top_level() {
        let row = extract_kpis(&json!({"net_pnl": -3.5, "trades": 0}));
        assert_eq!(row.get("net_pnl"), Some(-3.5));
        assert!(row.has_no_trades());
        assert!(row.sanitized.is_empty());
    }
}
