use crate::database::connection::{ConnectionPool, DatabaseError};
use crate::database::models::{
    InactivePrediction, NewPrediction, NewQuote, Prediction, Quote, RankedPrediction,
};
use crate::database::schema::{predictions, quotes};
use diesel::prelude::*;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::sql_types::{BigInt, Bool, Double, Nullable, Text};
use diesel::sqlite::{Sqlite, SqliteConnection};
use diesel::QueryableByName;
use std::sync::Arc;

/// Indexes the upsert protocol depends on, as `(table, index)`
pub const REQUIRED_INDEXES: [(&str, &str); 2] = [
    ("quotes", "idx_quotes_security_id"),
    ("predictions", "idx_predictions_security_id"),
];

const ACTIVE_PREDICTIONS_SQL: &str = "\
    SELECT id, security_id, company_name, current_price, predicted_price, \
           prediction_date, model_variant, active, \
           (predicted_price - current_price) AS profit \
    FROM predictions \
    WHERE active = 1 AND predicted_price IS NOT NULL \
    ORDER BY profit DESC";

const INDEX_LIST_SQL: &str = "SELECT name FROM pragma_index_list(?)";

/// Positional statement parameter
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Double(f64),
    Integer(i64),
    Bool(bool),
    Null,
}

impl SqlParam {
    fn bind_to<'f>(
        self,
        query: BoxedSqlQuery<'f, Sqlite, SqlQuery>,
    ) -> BoxedSqlQuery<'f, Sqlite, SqlQuery> {
        match self {
            SqlParam::Text(v) => query.bind::<Text, _>(v),
            SqlParam::Double(v) => query.bind::<Double, _>(v),
            SqlParam::Integer(v) => query.bind::<BigInt, _>(v),
            SqlParam::Bool(v) => query.bind::<Bool, _>(v),
            SqlParam::Null => query.bind::<Nullable<Text>, _>(None::<String>),
        }
    }
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        SqlParam::Text(value.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        SqlParam::Text(value)
    }
}

impl From<f64> for SqlParam {
    fn from(value: f64) -> Self {
        SqlParam::Double(value)
    }
}

impl From<i64> for SqlParam {
    fn from(value: i64) -> Self {
        SqlParam::Integer(value)
    }
}

impl From<bool> for SqlParam {
    fn from(value: bool) -> Self {
        SqlParam::Bool(value)
    }
}

/// What `execute` should bring back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Run for side effects only
    None,
    /// First row, if any
    One,
    /// Every row
    Many,
    /// Affected row count
    Write,
}

/// Result of `execute`
///
/// `NoResult` means the statement could not complete. It is not the same as an
/// empty result set.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome<T> {
    Done,
    One(Option<T>),
    Many(Vec<T>),
    Written(usize),
    NoResult,
}

impl<T> QueryOutcome<T> {
    pub fn is_no_result(&self) -> bool {
        matches!(self, QueryOutcome::NoResult)
    }

    /// Rows from a `Many` or `One` fetch; `None` if the statement failed
    pub fn into_rows(self) -> Option<Vec<T>> {
        match self {
            QueryOutcome::Many(rows) => Some(rows),
            QueryOutcome::One(row) => Some(row.into_iter().collect()),
            QueryOutcome::Done | QueryOutcome::Written(_) => Some(Vec::new()),
            QueryOutcome::NoResult => None,
        }
    }
}

#[derive(QueryableByName)]
struct IndexName {
    #[diesel(sql_type = Text)]
    name: String,
}

/// Single point of access to the store
///
/// Every operation takes its own lease, releases it before returning, and absorbs
/// errors: failures are logged and surface as `None` / `NoResult`, never as `Err`.
pub struct PersistenceGateway {
    pool: Arc<ConnectionPool>,
}

impl PersistenceGateway {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    /// Pool backing this gateway
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Run a parameterized statement
    ///
    /// Parameters bind positionally to `?` placeholders.
    pub fn execute<T>(&self, statement: &str, params: &[SqlParam], mode: FetchMode) -> QueryOutcome<T>
    where
        T: QueryableByName<Sqlite> + 'static,
    {
        let outcome = self.pool.with_connection(|conn| {
            let mut query = diesel::sql_query(statement).into_boxed::<Sqlite>();
            for param in params.iter().cloned() {
                query = param.bind_to(query);
            }

            let outcome = match mode {
                FetchMode::None => query.execute(conn).map(|_| QueryOutcome::Done),
                FetchMode::Write => query.execute(conn).map(QueryOutcome::Written),
                FetchMode::One => query.get_result::<T>(conn).optional().map(QueryOutcome::One),
                FetchMode::Many => query.load::<T>(conn).map(QueryOutcome::Many),
            };
            outcome.map_err(|e| DatabaseError::QueryError(e.to_string()))
        });

        match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(?mode, "Statement failed: {}: {}", statement, e);
                QueryOutcome::NoResult
            }
        }
    }

    /// Insert or fully overwrite the quote for `quote.security_id`
    pub fn upsert_quote(&self, quote: &NewQuote) -> Option<usize> {
        self.run("upsert_quote", |conn| {
            diesel::insert_into(quotes::table)
                .values(quote)
                .on_conflict(quotes::security_id)
                .do_update()
                .set(quote)
                .execute(conn)
        })
    }

    /// Insert or overwrite the prediction for `record.security_id`
    ///
    /// `record.active` is written as given.
    pub fn upsert_prediction(&self, record: &NewPrediction) -> Option<usize> {
        self.run("upsert_prediction", |conn| {
            diesel::insert_into(predictions::table)
                .values(record)
                .on_conflict(predictions::security_id)
                .do_update()
                .set(record)
                .execute(conn)
        })
    }

    /// Mark a security inactive
    ///
    /// Inserts `record` if the security has no prediction yet; otherwise only the
    /// flag changes, keeping the last successful forecast queryable.
    pub fn deactivate_prediction(&self, record: &InactivePrediction) -> Option<usize> {
        self.run("deactivate_prediction", |conn| {
            diesel::insert_into(predictions::table)
                .values(record)
                .on_conflict(predictions::security_id)
                .do_update()
                .set(predictions::active.eq(false))
                .execute(conn)
        })
    }

    /// Page of quotes in natural row order
    pub fn fetch_quote_page(&self, limit: i64, offset: i64) -> Option<Vec<Quote>> {
        self.run("fetch_quote_page", |conn| {
            quotes::table
                .select(Quote::as_select())
                .limit(limit)
                .offset(offset)
                .load(conn)
        })
    }

    pub fn find_quote(&self, security_id: &str) -> Option<Quote> {
        self.run("find_quote", |conn| {
            quotes::table
                .filter(quotes::security_id.eq(security_id))
                .select(Quote::as_select())
                .first(conn)
                .optional()
        })
        .flatten()
    }

    /// Point lookup; absent and unreachable both come back as `None`
    pub fn find_prediction(&self, security_id: &str) -> Option<Prediction> {
        self.run("find_prediction", |conn| {
            predictions::table
                .filter(predictions::security_id.eq(security_id))
                .select(Prediction::as_select())
                .first(conn)
                .optional()
        })
        .flatten()
    }

    /// Active predictions, biggest expected gain first
    ///
    /// An unreachable store yields an empty list.
    pub fn list_active_predictions(&self) -> Vec<RankedPrediction> {
        self.execute::<RankedPrediction>(ACTIVE_PREDICTIONS_SQL, &[], FetchMode::Many)
            .into_rows()
            .unwrap_or_default()
    }

    /// Required indexes that are not present
    ///
    /// `None` if the catalog could not be read.
    pub fn missing_indexes(&self) -> Option<Vec<String>> {
        let mut missing = Vec::new();
        for (table, index) in REQUIRED_INDEXES {
            let names = self
                .execute::<IndexName>(INDEX_LIST_SQL, &[table.into()], FetchMode::Many)
                .into_rows()?;
            if !names.iter().any(|row| row.name == index) {
                tracing::error!("Index {} does not exist on {}", index, table);
                missing.push(index.to_string());
            }
        }
        Some(missing)
    }

    fn run<R, F>(&self, operation: &'static str, f: F) -> Option<R>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<R, diesel::result::Error>,
    {
        match self.pool.with_connection(|conn| f(conn).map_err(DatabaseError::from)) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(operation, "Database operation failed: {}", e);
                None
            }
        }
    }
}
