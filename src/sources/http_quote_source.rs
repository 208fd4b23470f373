use super::{QuoteSnapshot, QuoteSource, SourceFetchError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

/// JSON-over-HTTP quote source
///
/// - `GET {base}/universe` returns `{"codes": [..]}` or a bare array
/// - `GET {base}/quote/{code}` returns one exchange quote payload
pub struct HttpQuoteSource {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UniverseResponse {
    Wrapped { codes: Vec<String> },
    Bare(Vec<String>),
}

impl HttpQuoteSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SourceFetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceFetchError::Http(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get_text(&self, url: &str, symbol: Option<&str>) -> Result<String, SourceFetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SourceFetchError::Http(e.to_string()))?;

        let status = response.status();
        match (status, symbol) {
            (StatusCode::NOT_FOUND, Some(symbol)) => return Err(SourceFetchError::NotFound(symbol.to_string())),
            (StatusCode::GONE, Some(symbol)) => return Err(SourceFetchError::Delisted(symbol.to_string())),
            _ if !status.is_success() => {
                return Err(SourceFetchError::Http(format!("GET {} returned {}", url, status)))
            }
            _ => {}
        }

        response
            .text()
            .await
            .map_err(|e| SourceFetchError::Http(e.to_string()))
    }
}

#[async_trait]
impl QuoteSource for HttpQuoteSource {
    async fn list_universe(&self) -> Result<Vec<String>, SourceFetchError> {
        let url = format!("{}/universe", self.base_url);
        let body = self.get_text(&url, None).await?;

        let codes = match serde_json::from_str::<UniverseResponse>(&body)
            .map_err(|e| SourceFetchError::Parse(e.to_string()))?
        {
            UniverseResponse::Wrapped { codes } | UniverseResponse::Bare(codes) => codes,
        };

        tracing::debug!("Quote source lists {} symbols", codes.len());
        Ok(codes)
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<QuoteSnapshot, SourceFetchError> {
        let url = format!("{}/quote/{}", self.base_url, symbol);
        let body = self.get_text(&url, Some(symbol)).await?;
        QuoteSnapshot::from_json(&body)
    }
}
