use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use diesel::sqlite::Sqlite;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Forecasting model family that produced a prediction
///
/// One `predictions` table holds every variant; the tag records which model
/// wrote the row last.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    /// Recurrent network trained on daily closes
    Lstm,

    /// Linear trend regression
    Linear,

    /// Opaque remote forecast service
    #[default]
    Remote,
}

impl ModelVariant {
    /// Convert enum to database string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelVariant::Lstm => "lstm",
            ModelVariant::Linear => "linear",
            ModelVariant::Remote => "remote",
        }
    }

    /// Parse string to ModelVariant enum
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lstm" => Some(ModelVariant::Lstm),
            "linear" => Some(ModelVariant::Linear),
            "remote" => Some(ModelVariant::Remote),
            _ => None,
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// Diesel ToSql implementation - convert Rust enum to SQL TEXT
impl ToSql<Text, Sqlite> for ModelVariant {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Sqlite>) -> serialize::Result {
        out.set_value(self.as_str());
        Ok(IsNull::No)
    }
}

// Diesel FromSql implementation - convert SQL TEXT to Rust enum
impl FromSql<Text, Sqlite> for ModelVariant {
    fn from_sql(bytes: <Sqlite as diesel::backend::Backend>::RawValue<'_>) -> deserialize::Result<Self> {
        let text = <String as FromSql<Text, Sqlite>>::from_sql(bytes)?;
        ModelVariant::parse(&text).ok_or_else(|| format!("Invalid model variant: {}", text).into())
    }
}
