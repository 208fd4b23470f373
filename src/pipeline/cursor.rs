use super::with_gateway;
use crate::database::models::Quote;
use crate::database::PersistenceGateway;
use std::sync::Arc;

/// Limit/offset pager over persisted quotes
///
/// Stops after a short page, an empty page, or a read failure. A read failure is
/// logged and treated as the end of the data for this run.
pub struct BatchCursor {
    gateway: Arc<PersistenceGateway>,
    batch_size: usize,
    offset: usize,
    exhausted: bool,
}

impl BatchCursor {
    pub fn new(gateway: Arc<PersistenceGateway>, batch_size: usize) -> Self {
        Self {
            gateway,
            batch_size: batch_size.max(1),
            offset: 0,
            exhausted: false,
        }
    }

    /// Rows handed out so far
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Next page, or `None` once paging is over
    pub async fn next_batch(&mut self) -> Option<Vec<Quote>> {
        if self.exhausted {
            return None;
        }

        let (limit, offset) = (self.batch_size as i64, self.offset as i64);
        let page = with_gateway(&self.gateway, move |gateway| gateway.fetch_quote_page(limit, offset)).await;

        let rows = match page {
            Some(rows) => rows,
            None => {
                tracing::error!(offset = self.offset, "❌ Quote page read failed, ending run early");
                self.exhausted = true;
                return None;
            }
        };

        if rows.len() < self.batch_size {
            self.exhausted = true;
        }
        if rows.is_empty() {
            return None;
        }

        self.offset += rows.len();
        Some(rows)
    }
}
