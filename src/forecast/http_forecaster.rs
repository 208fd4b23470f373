use super::{ForecastError, Forecaster};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Remote forecast service client
///
/// `POST {base}/predict` with `{"symbol": "<code><suffix>"}`; the first value of the
/// returned `predictions` array is the forecast.
pub struct HttpForecaster {
    client: Client,
    base_url: String,
    symbol_suffix: String,
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    symbol: &'a str,
}

#[derive(Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<f64>,
}

impl HttpForecaster {
    pub fn new(
        base_url: impl Into<String>,
        symbol_suffix: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ForecastError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ForecastError::Failed(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            symbol_suffix: symbol_suffix.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Forecaster for HttpForecaster {
    async fn predict(&self, symbol: &str) -> Result<f64, ForecastError> {
        let ticker = format!("{}{}", symbol, self.symbol_suffix);

        let response = self
            .client
            .post(format!("{}/predict", self.base_url))
            .json(&PredictRequest { symbol: &ticker })
            .send()
            .await
            .map_err(|e| ForecastError::Failed(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => return Err(ForecastError::Inactive(ticker)),
            status if !status.is_success() => {
                return Err(ForecastError::Failed(format!("{} returned {}", ticker, status)))
            }
            _ => {}
        }

        let body: PredictResponse = response
            .json()
            .await
            .map_err(|e| ForecastError::Failed(e.to_string()))?;

        body.predictions
            .first()
            .copied()
            .ok_or_else(|| ForecastError::Failed(format!("empty prediction for {}", ticker)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode as AxumStatus;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn predict(Json(body): Json<Value>) -> axum::response::Response {
        match body["symbol"].as_str() {
            Some("500325.BO") => Json(json!({"predictions": [3012.75, 3020.0]})).into_response(),
            Some("EMPTY.BO") => Json(json!({"predictions": []})).into_response(),
            Some("BROKEN.BO") => AxumStatus::INTERNAL_SERVER_ERROR.into_response(),
            _ => AxumStatus::NOT_FOUND.into_response(),
        }
    }

    async fn forecaster() -> HttpForecaster {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, Router::new().route("/predict", post(predict)))
                .await
                .unwrap();
        });
        HttpForecaster::new(format!("http://{}", addr), ".BO", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_predict_uses_first_value_and_suffix() {
        let forecaster = forecaster().await;
        assert_eq!(forecaster.predict("500325").await, Ok(3012.75));
    }

    #[tokio::test]
    async fn test_predict_error_mapping() {
        let forecaster = forecaster().await;

        assert_eq!(
            forecaster.predict("DELISTED").await,
            Err(ForecastError::Inactive("DELISTED.BO".to_string()))
        );
        assert!(matches!(forecaster.predict("EMPTY").await, Err(ForecastError::Failed(_))));
        assert!(matches!(forecaster.predict("BROKEN").await, Err(ForecastError::Failed(_))));
    }
}
