use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Order book depth kept per side
pub const MAX_DEPTH_LEVELS: usize = 5;

/// A single price/quantity level on one side of the book
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DepthLevel {
    pub price: f64,
    pub quantity: f64,
}

/// Quote entity - latest known market snapshot for one security
///
/// Overwritten wholesale by every ingestion; no history is kept.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable)]
#[diesel(table_name = crate::database::schema::quotes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Quote {
    /// Row id (natural paging order)
    pub id: i32,

    /// Exchange security identifier (unique)
    pub security_id: String,

    pub company_name: Option<String>,

    /// Last traded price
    pub current_value: f64,

    pub price_change: f64,
    pub percent_change: f64,
    pub updated_on: Option<String>,
    pub scrip_code: Option<String>,
    pub group_type: Option<String>,
    pub face_value: f64,
    pub industry: Option<String>,
    pub previous_close: f64,
    pub previous_open: f64,
    pub day_high: f64,
    pub day_low: f64,
    pub week_52_high: f64,
    pub week_52_low: f64,
    pub weighted_avg_price: f64,
    pub total_traded_value: Option<String>,
    pub total_traded_quantity: Option<String>,
    pub two_week_avg_quantity: Option<String>,
    pub market_cap_full: Option<String>,
    pub market_cap_free_float: Option<String>,

    /// Buy-side depth, JSON encoded
    pub buy_depth: String,

    /// Sell-side depth, JSON encoded
    pub sell_depth: String,
}

impl Quote {
    /// Decoded buy-side levels, best first
    pub fn buy_levels(&self) -> Vec<DepthLevel> {
        decode_depth(&self.security_id, &self.buy_depth)
    }

    /// Decoded sell-side levels, best first
    pub fn sell_levels(&self) -> Vec<DepthLevel> {
        decode_depth(&self.security_id, &self.sell_depth)
    }
}

/// New quote for insertion
///
/// Also used as the upsert changeset: `None` fields overwrite stored values with NULL,
/// so a conflicting row ends up identical to the incoming snapshot.
#[derive(Debug, Clone, PartialEq, Insertable, AsChangeset)]
#[diesel(table_name = crate::database::schema::quotes)]
#[diesel(treat_none_as_null = true)]
pub struct NewQuote {
    pub security_id: String,
    pub company_name: Option<String>,
    pub current_value: f64,
    pub price_change: f64,
    pub percent_change: f64,
    pub updated_on: Option<String>,
    pub scrip_code: Option<String>,
    pub group_type: Option<String>,
    pub face_value: f64,
    pub industry: Option<String>,
    pub previous_close: f64,
    pub previous_open: f64,
    pub day_high: f64,
    pub day_low: f64,
    pub week_52_high: f64,
    pub week_52_low: f64,
    pub weighted_avg_price: f64,
    pub total_traded_value: Option<String>,
    pub total_traded_quantity: Option<String>,
    pub two_week_avg_quantity: Option<String>,
    pub market_cap_full: Option<String>,
    pub market_cap_free_float: Option<String>,
    pub buy_depth: String,
    pub sell_depth: String,
}

impl NewQuote {
    /// Create a minimal quote; every other field starts empty
    pub fn new(security_id: impl Into<String>, current_value: f64) -> Self {
        Self {
            security_id: security_id.into(),
            company_name: None,
            current_value,
            price_change: 0.0,
            percent_change: 0.0,
            updated_on: None,
            scrip_code: None,
            group_type: None,
            face_value: 0.0,
            industry: None,
            previous_close: 0.0,
            previous_open: 0.0,
            day_high: 0.0,
            day_low: 0.0,
            week_52_high: 0.0,
            week_52_low: 0.0,
            weighted_avg_price: 0.0,
            total_traded_value: None,
            total_traded_quantity: None,
            two_week_avg_quantity: None,
            market_cap_full: None,
            market_cap_free_float: None,
            buy_depth: encode_depth(&[]),
            sell_depth: encode_depth(&[]),
        }
    }

    /// Set company name
    pub fn with_company_name(mut self, company_name: impl Into<String>) -> Self {
        self.company_name = Some(company_name.into());
        self
    }

    /// Set the exchange scrip code the quote was listed under
    pub fn with_scrip_code(mut self, scrip_code: impl Into<String>) -> Self {
        self.scrip_code = Some(scrip_code.into());
        self
    }

    /// Set both sides of the book (truncated to five levels each)
    pub fn with_depth(mut self, buy: &[DepthLevel], sell: &[DepthLevel]) -> Self {
        self.buy_depth = encode_depth(buy);
        self.sell_depth = encode_depth(sell);
        self
    }
}

pub(crate) fn encode_depth(levels: &[DepthLevel]) -> String {
    let kept = &levels[..levels.len().min(MAX_DEPTH_LEVELS)];
    serde_json::to_string(kept).unwrap_or_else(|_| "[]".to_string())
}

fn decode_depth(security_id: &str, raw: &str) -> Vec<DepthLevel> {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::warn!(security_id, "Unreadable depth column: {}", e);
        Vec::new()
    })
}
