use crate::alert::Alerter;
use crate::model::StoredRecord;
use crate::store::{InsertOutcome, RecordStore};
use harvester_core::Error;
use metrics::counter;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub enum PersistOutcome {
    Inserted,
    Duplicate,
    /// Anything other than a key conflict.
    Failed(Error),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub inserted: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub session_refreshed: bool,
}

/// Dedup/persist sink. Every record's outcome is classified on its own; the
/// first infrastructure failure in a batch triggers one session refresh, after
/// which the failed record is retried once. A record the store refuses as
/// data is counted as failed and never triggers a refresh.
pub struct Sink {
    store: Arc<dyn RecordStore>,
    alerter: Alerter,
    tag: String,
}

impl Sink {
    pub fn new(store: Arc<dyn RecordStore>, alerter: Alerter, tag: String) -> Self {
        Self {
            store,
            alerter,
            tag,
        }
    }

    pub async fn persist(&self, record: &StoredRecord) -> PersistOutcome {
        match self.store.insert_one(record).await {
            Ok(InsertOutcome::Inserted) => PersistOutcome::Inserted,
            Ok(InsertOutcome::Duplicate) => PersistOutcome::Duplicate,
            Err(e) => PersistOutcome::Failed(e),
        }
    }

    pub async fn persist_batch(&self, records: &[StoredRecord]) -> BatchReport {
        let mut report = BatchReport::default();

        for record in records {
            let mut outcome = self.persist(record).await;

            if let PersistOutcome::Failed(e) = &outcome {
                if e.is_retryable() && !report.session_refreshed {
                    self.recover(record, e).await;
                    report.session_refreshed = true;
                    outcome = self.persist(record).await;
                }
            }

            match outcome {
                PersistOutcome::Inserted => report.inserted += 1,
                PersistOutcome::Duplicate => report.duplicates += 1,
                PersistOutcome::Failed(e) => {
                    warn!(id = %record.id_str, error = %e, "Record not stored");
                    report.failed += 1;
                }
            }
        }

        counter!("harvester_records_inserted", "tag" => self.tag.clone())
            .increment(report.inserted as u64);
        counter!("harvester_records_duplicate", "tag" => self.tag.clone())
            .increment(report.duplicates as u64);
        counter!("harvester_insert_failures", "tag" => self.tag.clone())
            .increment(report.failed as u64);

        report
    }

    async fn recover(&self, record: &StoredRecord, cause: &Error) {
        warn!(id = %record.id_str, error = %cause, "Insert failed, refreshing store session");
        self.alerter.notify(format!(
            "Error saving record {}: {cause}. Refreshing store session",
            record.id_str
        ));

        match self.store.refresh_session().await {
            Ok(()) => {
                info!("Store session refreshed after insert failure");
                self.alerter.notify("Store session refreshed");
            }
            Err(e) => {
                warn!(error = %e, "Store session refresh failed");
                self.alerter.notify(format!("Store session refresh failed: {e}"));
            }
        }
    }
}
