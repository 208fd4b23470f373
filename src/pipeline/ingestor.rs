use super::with_gateway;
use crate::database::models::NewQuote;
use crate::database::PersistenceGateway;
use crate::sources::{QuoteSource, SourceFetchError};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use utoipa::ToSchema;

/// Outcome of one ingest pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct IngestReport {
    /// Distinct symbols the source listed
    pub listed: usize,

    /// Quotes upserted
    pub stored: usize,

    /// Symbols skipped because the fetch or upsert failed
    pub failed: usize,

    /// Symbols the source reported as no longer trading
    pub delisted: Vec<String>,
}

enum Ingested {
    Stored,
    Failed,
    Delisted(String),
}

/// Pulls the whole universe from a [`QuoteSource`] into the store
pub struct QuoteIngestor {
    source: Arc<dyn QuoteSource>,
    gateway: Arc<PersistenceGateway>,
    concurrency: usize,
}

impl QuoteIngestor {
    /// `concurrency` of 1 fetches one symbol at a time
    pub fn new(source: Arc<dyn QuoteSource>, gateway: Arc<PersistenceGateway>, concurrency: usize) -> Self {
        Self {
            source,
            gateway,
            concurrency: concurrency.max(1),
        }
    }

    /// Fetch and upsert every listed symbol
    ///
    /// Per-symbol failures are logged and skipped. A universe failure yields an
    /// empty report.
    pub async fn fetch_all(&self) -> IngestReport {
        let listed = match self.source.list_universe().await {
            Ok(symbols) => symbols,
            Err(e) => {
                tracing::error!("❌ Could not list quote universe: {}", e);
                return IngestReport::default();
            }
        };

        let mut seen = HashSet::new();
        let symbols: Vec<String> = listed
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && seen.insert(s.clone()))
            .collect();

        tracing::info!("📥 Ingesting {} symbols (concurrency {})", symbols.len(), self.concurrency);

        let mut report = IngestReport {
            listed: symbols.len(),
            ..Default::default()
        };

        let mut results = stream::iter(symbols)
            .map(|symbol| self.ingest_one(symbol))
            .buffer_unordered(self.concurrency);

        while let Some(outcome) = results.next().await {
            match outcome {
                Ingested::Stored => report.stored += 1,
                Ingested::Failed => report.failed += 1,
                Ingested::Delisted(security_id) => {
                    report.failed += 1;
                    report.delisted.push(security_id);
                }
            }
        }

        tracing::info!(
            "✅ Ingest complete: {} stored, {} failed, {} delisted",
            report.stored,
            report.failed,
            report.delisted.len()
        );

        report
    }

    async fn ingest_one(&self, symbol: String) -> Ingested {
        let snapshot = match self.source.fetch_quote(&symbol).await {
            Ok(snapshot) => snapshot,
            Err(SourceFetchError::Delisted(_)) => {
                tracing::info!(symbol = %symbol, "Symbol delisted, skipping");
                return Ingested::Delisted(symbol);
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, "⚠️  Quote fetch failed: {}", e);
                return Ingested::Failed;
            }
        };

        if snapshot.security_id.is_empty() {
            tracing::warn!(symbol = %symbol, "⚠️  Quote has no security id, skipping");
            return Ingested::Failed;
        }

        let quote = NewQuote::from(snapshot);
        let security_id = quote.security_id.clone();
        match with_gateway(&self.gateway, move |gateway| gateway.upsert_quote(&quote)).await {
            Some(_) => {
                tracing::debug!(symbol = %symbol, security_id = %security_id, "Quote stored");
                Ingested::Stored
            }
            None => Ingested::Failed,
        }
    }
}
