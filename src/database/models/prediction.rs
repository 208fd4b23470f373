use crate::database::enums::ModelVariant;
use chrono::{NaiveDateTime, SubsecRound, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Prediction entity - most recent forecast for one security
///
/// `active` is a two-state flag: rows start active, become inactive when a run
/// cannot forecast the security, and turn active again on the next success.
#[derive(
    Debug, Clone, PartialEq, Queryable, QueryableByName, Selectable, Identifiable, Serialize, Deserialize, ToSchema,
)]
#[diesel(table_name = crate::database::schema::predictions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Prediction {
    pub id: i32,

    /// Exchange security identifier (unique)
    pub security_id: String,

    pub company_name: Option<String>,

    /// Price at the time of the last successful forecast
    pub current_price: f64,

    /// Forecast price; absent if the security has never been forecast
    pub predicted_price: Option<f64>,

    /// When the forecast was computed (UTC)
    pub prediction_date: Option<NaiveDateTime>,

    pub model_variant: ModelVariant,

    pub active: bool,
}

impl Prediction {
    /// Expected move (`predicted_price - current_price`)
    pub fn profit(&self) -> Option<f64> {
        self.predicted_price.map(|p| p - self.current_price)
    }
}

/// Active prediction with its ranking key, as returned by the list query
#[derive(Debug, Clone, PartialEq, QueryableByName, Serialize, ToSchema)]
pub struct RankedPrediction {
    #[diesel(embed)]
    #[serde(flatten)]
    pub prediction: Prediction,

    /// `predicted_price - current_price`
    #[diesel(sql_type = diesel::sql_types::Double)]
    pub profit: f64,
}

/// Successful forecast for insertion
///
/// Doubles as the upsert changeset, so every column is replaced on conflict.
#[derive(Debug, Clone, PartialEq, Insertable, AsChangeset, Serialize, Deserialize, ToSchema)]
#[diesel(table_name = crate::database::schema::predictions)]
pub struct NewPrediction {
    pub security_id: String,
    pub company_name: Option<String>,
    pub current_price: f64,
    pub predicted_price: f64,
    pub prediction_date: NaiveDateTime,
    pub model_variant: ModelVariant,
    pub active: bool,
}

impl NewPrediction {
    /// Create an active prediction dated now
    pub fn new(
        security_id: impl Into<String>,
        company_name: Option<String>,
        current_price: f64,
        predicted_price: f64,
    ) -> Self {
        Self {
            security_id: security_id.into(),
            company_name,
            current_price,
            predicted_price,
            prediction_date: Utc::now().naive_utc().trunc_subsecs(0),
            model_variant: ModelVariant::default(),
            active: true,
        }
    }

    /// Set the model variant tag
    pub fn with_variant(mut self, variant: ModelVariant) -> Self {
        self.model_variant = variant;
        self
    }

    /// Set prediction date
    pub fn with_prediction_date(mut self, prediction_date: NaiveDateTime) -> Self {
        self.prediction_date = prediction_date;
        self
    }

    /// Set the active flag explicitly
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// Row written when a security could not be forecast
///
/// Only inserted as-is when no row exists yet; on conflict the gateway flips
/// `active` and leaves the last successful forecast untouched.
#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = crate::database::schema::predictions)]
pub struct InactivePrediction {
    pub security_id: String,
    pub company_name: Option<String>,
    pub current_price: f64,
    pub model_variant: ModelVariant,
    pub active: bool,
}

impl InactivePrediction {
    pub fn new(
        security_id: impl Into<String>,
        company_name: Option<String>,
        current_price: f64,
        model_variant: ModelVariant,
    ) -> Self {
        Self {
            security_id: security_id.into(),
            company_name,
            current_price,
            model_variant,
            active: false,
        }
    }
}
