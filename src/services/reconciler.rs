//! Orphaned-blob reconciliation.
//!
//! When a blob is stored but its catalog record cannot be written, the
//! coordinator reports an `OrphanedBlob`. The `Reconciler` retries the record
//! insert a bounded number of times and, failing that, logs the blob as
//! needing manual cleanup.

use crate::{models::catalog::CatalogRecord, services::catalog_index::CatalogIndex};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{error, info, warn};

/// A stored blob whose catalog record was never written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanedBlob {
    pub bucket: String,
    pub record: CatalogRecord,
}

/// Sending half of the orphan channel. Reporting never fails the caller.
#[derive(Clone, Default)]
pub struct OrphanReporter {
    tx: Option<UnboundedSender<OrphanedBlob>>,
}

impl OrphanReporter {
    pub fn channel() -> (Self, UnboundedReceiver<OrphanedBlob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A reporter that only relies on the coordinator's log line.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn report(&self, orphan: OrphanedBlob) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(err) = tx.send(orphan) {
            warn!(
                bucket = %err.0.bucket,
                name = %err.0.record.name,
                "reconciler is not running; orphan was only logged"
            );
        }
    }
}

pub struct Reconciler {
    catalog: Arc<dyn CatalogIndex>,
    attempts: u32,
    delay: Duration,
}

impl Reconciler {
    pub fn new(catalog: Arc<dyn CatalogIndex>, attempts: u32, delay: Duration) -> Self {
        Self {
            catalog,
            attempts,
            delay,
        }
    }

    /// Drain `rx` until every reporter has been dropped.
    pub async fn run(self, mut rx: UnboundedReceiver<OrphanedBlob>) {
        info!(attempts = self.attempts, "orphan reconciler started");
        while let Some(orphan) = rx.recv().await {
            self.reconcile(&orphan).await;
        }
        info!("orphan reconciler stopped");
    }

    /// Retry the missing insert. Returns true once the record is in the catalog.
    pub async fn reconcile(&self, orphan: &OrphanedBlob) -> bool {
        for attempt in 1..=self.attempts {
            tokio::time::sleep(self.delay).await;
            match self.catalog.insert(&orphan.record).await {
                Ok(id) => {
                    info!(
                        bucket = %orphan.bucket,
                        name = %orphan.record.name,
                        %id,
                        attempt,
                        "orphaned blob reconciled"
                    );
                    return true;
                }
                Err(err) => warn!(
                    bucket = %orphan.bucket,
                    name = %orphan.record.name,
                    attempt,
                    error = %err,
                    "catalog retry failed"
                ),
            }
        }

        error!(
            target: "photo_catalog::orphan",
            bucket = %orphan.bucket,
            name = %orphan.record.name,
            attempts = self.attempts,
            "giving up on orphaned blob; needs manual cleanup"
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{catalog_index::CatalogFilter, mock_backends::MemoryCatalog};

    fn orphan(name: &str) -> OrphanedBlob {
        OrphanedBlob {
            bucket: "image-storage".into(),
            record: CatalogRecord {
                name: name.into(),
                url: format!("http://localhost/blobs/image-storage/{}", name),
                uploader: "alice".into(),
                timestamp: 42,
            },
        }
    }

    #[tokio::test]
    async fn retries_until_catalog_recovers() {
        let catalog = Arc::new(MemoryCatalog::default());
        catalog.fail_next_inserts(2);
        let reconciler = Reconciler::new(catalog.clone(), 3, Duration::from_millis(1));

        assert!(reconciler.reconcile(&orphan("cat.jpg")).await);
        assert_eq!(catalog.insert_calls(), 3);

        let found = catalog
            .query(&[CatalogFilter::Name("cat.jpg".into())])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].record.timestamp, 42);
    }

    #[tokio::test]
    async fn gives_up_after_configured_attempts() {
        let catalog = Arc::new(MemoryCatalog::default());
        catalog.fail_next_inserts(usize::MAX);
        let reconciler = Reconciler::new(catalog.clone(), 2, Duration::from_millis(1));

        assert!(!reconciler.reconcile(&orphan("cat.jpg")).await);
        assert_eq!(catalog.insert_calls(), 2);
        assert!(catalog.query(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_drains_channel_and_stops_when_reporters_drop() {
        let catalog = Arc::new(MemoryCatalog::default());
        let (reporter, rx) = OrphanReporter::channel();
        let task = tokio::spawn(
            Reconciler::new(catalog.clone(), 1, Duration::from_millis(1)).run(rx),
        );

        reporter.report(orphan("a.jpg"));
        reporter.report(orphan("b.jpg"));
        drop(reporter);
        task.await.unwrap();

        assert_eq!(catalog.query(&[]).await.unwrap().len(), 2);
    }

    #[test]
    fn disabled_reporter_swallows_reports() {
        OrphanReporter::disabled().report(orphan("a.jpg"));

        let (reporter, rx) = OrphanReporter::channel();
        drop(rx);
        reporter.report(orphan("b.jpg"));
    }
}
