//! Out-of-band ingestion of pending content sources

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::MetadataResolver;
use crate::indexer::{ContractReader, Indexer};

/// Outcome of one drain pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub fetched: usize,
    pub failed: usize,
    pub still_pending: usize,
}

pub struct ContentIngestor {
    resolver: MetadataResolver,
    concurrency: usize,
}

impl ContentIngestor {
    pub fn new(resolver: MetadataResolver, concurrency: usize) -> Self {
        Self {
            resolver,
            concurrency: concurrency.max(1),
        }
    }

    /// Fetch every pending source, then apply the bytes in CID order.
    ///
    /// The lock is only held to snapshot the queue and to apply results,
    /// never across a fetch.
    pub async fn drain<R>(&self, indexer: &Arc<RwLock<Indexer<R>>>) -> IngestReport
    where
        R: ContractReader + Send + Sync,
    {
        let pending = indexer.read().await.pending_content();
        if pending.is_empty() {
            return IngestReport::default();
        }
        info!(count = pending.len(), "Fetching pending content");

        let mut results: Vec<_> = stream::iter(pending)
            .map(|(cid, kind)| async move {
                let outcome = self.resolver.fetch_with_retry(&cid).await;
                (cid, kind, outcome)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        results.sort_by(|a, b| a.0.cmp(&b.0));

        let mut report = IngestReport::default();
        let mut guard = indexer.write().await;
        for (cid, kind, outcome) in results {
            match outcome {
                Ok(bytes) => {
                    guard.apply_content_metadata(&cid, kind, &bytes);
                    report.fetched += 1;
                }
                Err(e) => {
                    warn!(cid = %cid, kind = kind.as_str(), error = %e, "Content fetch failed, left pending");
                    report.failed += 1;
                }
            }
        }
        report.still_pending = guard.pending_content().len();
        info!(
            fetched = report.fetched,
            failed = report.failed,
            still_pending = report.still_pending,
            "Content ingestion pass complete"
        );
        report
    }
}
