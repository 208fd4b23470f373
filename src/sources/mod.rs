//! Quote sources
//!
//! A [`QuoteSource`] enumerates the tradable universe and returns one snapshot per
//! symbol. Snapshots arrive in the exchange's camelCase JSON, where numbers are often
//! strings with thousands separators and depth may be keyed `"1".."5"` or listed.

mod http_quote_source;

pub use http_quote_source::HttpQuoteSource;

use crate::database::models::{DepthLevel, NewQuote};
use crate::database::models::quote::encode_depth;
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Per-symbol fetch failures
///
/// Never fatal to an ingest: the symbol is logged and skipped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceFetchError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Unparseable quote payload: {0}")]
    Parse(String),

    #[error("Symbol not found: {0}")]
    NotFound(String),

    #[error("Symbol delisted: {0}")]
    Delisted(String),
}

impl SourceFetchError {
    /// Returns true if the source says the security no longer trades
    pub fn is_delisted(&self) -> bool {
        matches!(self, SourceFetchError::Delisted(_))
    }
}

/// External market data provider
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Symbols to ingest this run
    async fn list_universe(&self) -> Result<Vec<String>, SourceFetchError>;

    /// Latest snapshot for one symbol
    async fn fetch_quote(&self, symbol: &str) -> Result<QuoteSnapshot, SourceFetchError>;
}

/// Quote as delivered by the source, numbers already normalised
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QuoteSnapshot {
    #[serde(rename = "securityID", default, deserialize_with = "de::text_or_empty")]
    pub security_id: String,

    #[serde(rename = "companyName", default, deserialize_with = "de::opt_text")]
    pub company_name: Option<String>,

    #[serde(rename = "currentValue", default, deserialize_with = "de::price")]
    pub current_value: f64,

    #[serde(rename = "change", default, deserialize_with = "de::price")]
    pub price_change: f64,

    #[serde(rename = "pChange", default, deserialize_with = "de::price")]
    pub percent_change: f64,

    #[serde(rename = "updatedOn", default, deserialize_with = "de::opt_text")]
    pub updated_on: Option<String>,

    #[serde(rename = "scripCode", default, deserialize_with = "de::opt_text")]
    pub scrip_code: Option<String>,

    #[serde(rename = "group", default, deserialize_with = "de::opt_text")]
    pub group_type: Option<String>,

    #[serde(rename = "faceValue", default, deserialize_with = "de::price")]
    pub face_value: f64,

    #[serde(default, deserialize_with = "de::opt_text")]
    pub industry: Option<String>,

    #[serde(rename = "previousClose", default, deserialize_with = "de::price")]
    pub previous_close: f64,

    #[serde(rename = "previousOpen", default, deserialize_with = "de::price")]
    pub previous_open: f64,

    #[serde(rename = "dayHigh", default, deserialize_with = "de::price")]
    pub day_high: f64,

    #[serde(rename = "dayLow", default, deserialize_with = "de::price")]
    pub day_low: f64,

    #[serde(rename = "52weekHigh", default, deserialize_with = "de::price")]
    pub week_52_high: f64,

    #[serde(rename = "52weekLow", default, deserialize_with = "de::price")]
    pub week_52_low: f64,

    #[serde(rename = "weightedAvgPrice", default, deserialize_with = "de::price")]
    pub weighted_avg_price: f64,

    #[serde(rename = "totalTradedValue", default, deserialize_with = "de::opt_text")]
    pub total_traded_value: Option<String>,

    #[serde(rename = "totalTradedQuantity", default, deserialize_with = "de::opt_text")]
    pub total_traded_quantity: Option<String>,

    #[serde(rename = "2WeekAvgQuantity", default, deserialize_with = "de::opt_text")]
    pub two_week_avg_quantity: Option<String>,

    #[serde(rename = "marketCapFull", default, deserialize_with = "de::opt_text")]
    pub market_cap_full: Option<String>,

    #[serde(rename = "marketCapFreeFloat", default, deserialize_with = "de::opt_text")]
    pub market_cap_free_float: Option<String>,

    #[serde(default, deserialize_with = "de::depth")]
    pub buy: Vec<DepthLevel>,

    #[serde(default, deserialize_with = "de::depth")]
    pub sell: Vec<DepthLevel>,
}

impl QuoteSnapshot {
    /// Parse a source payload
    pub fn from_json(raw: &str) -> Result<Self, SourceFetchError> {
        serde_json::from_str(raw).map_err(|e| SourceFetchError::Parse(e.to_string()))
    }
}

impl From<QuoteSnapshot> for NewQuote {
    fn from(snapshot: QuoteSnapshot) -> Self {
        NewQuote {
            security_id: snapshot.security_id,
            company_name: snapshot.company_name,
            current_value: snapshot.current_value,
            price_change: snapshot.price_change,
            percent_change: snapshot.percent_change,
            updated_on: snapshot.updated_on,
            scrip_code: snapshot.scrip_code,
            group_type: snapshot.group_type,
            face_value: snapshot.face_value,
            industry: snapshot.industry,
            previous_close: snapshot.previous_close,
            previous_open: snapshot.previous_open,
            day_high: snapshot.day_high,
            day_low: snapshot.day_low,
            week_52_high: snapshot.week_52_high,
            week_52_low: snapshot.week_52_low,
            weighted_avg_price: snapshot.weighted_avg_price,
            total_traded_value: snapshot.total_traded_value,
            total_traded_quantity: snapshot.total_traded_quantity,
            two_week_avg_quantity: snapshot.two_week_avg_quantity,
            market_cap_full: snapshot.market_cap_full,
            market_cap_free_float: snapshot.market_cap_free_float,
            buy_depth: encode_depth(&snapshot.buy),
            sell_depth: encode_depth(&snapshot.sell),
        }
    }
}

/// Lenient field decoders for exchange payloads
mod de {
    use crate::database::models::{DepthLevel, MAX_DEPTH_LEVELS};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    /// `"1,234.50"`, `1234.5`, `""`, `"-"` and `null` all decode; other text is an error
    pub(super) fn parse_price(value: &Value) -> Result<f64, String> {
        match value {
            Value::Null => Ok(0.0),
            Value::Number(n) => n.as_f64().ok_or_else(|| format!("number out of range: {}", n)),
            Value::String(s) => {
                let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
                if cleaned.is_empty() || cleaned == "-" {
                    return Ok(0.0);
                }
                cleaned
                    .parse::<f64>()
                    .map_err(|_| format!("not a number: {:?}", s))
            }
            other => Err(format!("expected number, got {}", other)),
        }
    }

    pub(super) fn price<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        let value = Value::deserialize(d)?;
        parse_price(&value).map_err(D::Error::custom)
    }

    pub(super) fn opt_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.trim().to_string()),
            other => Some(other.to_string()),
        })
    }

    pub(super) fn text_or_empty<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(opt_text(d)?.unwrap_or_default())
    }

    pub(super) fn depth<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<DepthLevel>, D::Error> {
        let entries: Vec<Value> = match Value::deserialize(d)? {
            Value::Null => Vec::new(),
            Value::Array(items) => items,
            Value::Object(map) => {
                let mut keyed: Vec<(u32, Value)> = map
                    .into_iter()
                    .filter_map(|(k, v)| k.trim().parse::<u32>().ok().map(|rank| (rank, v)))
                    .collect();
                keyed.sort_by_key(|(rank, _)| *rank);
                keyed.into_iter().map(|(_, v)| v).collect()
            }
            other => return Err(D::Error::custom(format!("expected depth levels, got {}", other))),
        };

        entries
            .iter()
            .take(MAX_DEPTH_LEVELS)
            .map(|entry| {
                let price = parse_price(entry.get("price").unwrap_or(&Value::Null));
                let quantity = parse_price(entry.get("quantity").unwrap_or(&Value::Null));
                match (price, quantity) {
                    (Ok(price), Ok(quantity)) => Ok(DepthLevel { price, quantity }),
                    (Err(e), _) | (_, Err(e)) => Err(D::Error::custom(e)),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_normalises_exchange_payload() {
        let payload = json!({
            "securityID": "RELIANCE",
            "companyName": "Reliance Industries Ltd.",
            "currentValue": "2,950.55",
            "change": "-12.40",
            "pChange": "-0.42",
            "group": "A ",
            "faceValue": "10.00",
            "52weekHigh": "3,217.90",
            "2WeekAvgQuantity": 1.23,
            "totalTradedValue": "145.27 Cr.",
            "buy": {
                "2": {"price": "2,950.00", "quantity": "300"},
                "1": {"price": "2,950.50", "quantity": "120"}
            },
            "sell": [
                {"price": 2951.0, "quantity": 80}
            ]
        });

        let snapshot: QuoteSnapshot = serde_json::from_value(payload).unwrap();

        assert_eq!(snapshot.security_id, "RELIANCE");
        assert_eq!(snapshot.current_value, 2950.55);
        assert_eq!(snapshot.price_change, -12.4);
        assert_eq!(snapshot.week_52_high, 3217.9);
        assert_eq!(snapshot.group_type.as_deref(), Some("A"));
        assert_eq!(snapshot.two_week_avg_quantity.as_deref(), Some("1.23"));
        assert_eq!(snapshot.previous_close, 0.0);
        assert_eq!(snapshot.buy[0], DepthLevel { price: 2950.5, quantity: 120.0 });
        assert_eq!(snapshot.buy[1].price, 2950.0);
        assert_eq!(snapshot.sell.len(), 1);
    }

    #[test]
    fn test_depth_beyond_five_levels_is_truncated() {
        let levels: Vec<_> = (1..=7).map(|i| json!({"price": i, "quantity": 1})).collect();
        let snapshot: QuoteSnapshot = serde_json::from_value(json!({
            "securityID": "X",
            "buy": levels,
        }))
        .unwrap();

        assert_eq!(snapshot.buy.len(), 5);
        assert_eq!(snapshot.buy[4].price, 5.0);
    }

    #[test]
    fn test_garbage_price_is_parse_error() {
        let err = QuoteSnapshot::from_json(r#"{"securityID": "X", "currentValue": "n/a"}"#).unwrap_err();
        assert!(matches!(err, SourceFetchError::Parse(_)));
    }

    #[test]
    fn test_missing_security_id_decodes_empty() {
        let snapshot = QuoteSnapshot::from_json(r#"{"companyName": "NONAME"}"#).unwrap();
        assert!(snapshot.security_id.is_empty());
    }

    #[test]
    fn test_snapshot_into_new_quote() {
        let snapshot = QuoteSnapshot {
            security_id: "500325".to_string(),
            current_value: 100.0,
            buy: vec![DepthLevel { price: 99.5, quantity: 10.0 }],
            ..Default::default()
        };

        let quote = NewQuote::from(snapshot);
        assert_eq!(quote.security_id, "500325");
        assert_eq!(quote.buy_depth, r#"[{"price":99.5,"quantity":10.0}]"#);
        assert_eq!(quote.sell_depth, "[]");
    }
}
