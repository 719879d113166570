use crate::alert::Alerter;
use crate::cursor::{Advance, CursorController, CursorState};
use crate::gate::FetchGate;
use crate::model::{QueryMode, QuerySpec, SearchPage};
use crate::normalize::normalize_batch;
use crate::sink::Sink;
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Points where the surrounding process is told about the run.
pub trait LifecycleHooks: Send + Sync {
    /// Configuration and collaborators are ready.
    fn on_startup(&self, spec: &QuerySpec);

    /// Bounded run walked its whole range.
    fn on_terminated(&self, spec: &QuerySpec, summary: &RunSummary);

    /// The run cannot proceed.
    fn on_fatal(&self, error: &anyhow::Error);
}

/// Logs lifecycle events and forwards them to the operator.
pub struct AlertingHooks {
    alerter: Alerter,
}

impl AlertingHooks {
    pub fn new(alerter: Alerter) -> Self {
        Self { alerter }
    }
}

impl LifecycleHooks for AlertingHooks {
    fn on_startup(&self, spec: &QuerySpec) {
        let range = match &spec.mode {
            QueryMode::Continuous => "continuous".to_string(),
            QueryMode::Bounded { since, until, .. } => format!("bounded {since}..{until}"),
        };
        info!(query = %spec.text, geocode = %spec.geocode(), mode = %range, "Harvester started");
        self.alerter.notify(format!(
            "Started harvesting {:?} around {} ({range})",
            spec.text,
            spec.geocode()
        ));
    }

    fn on_terminated(&self, spec: &QuerySpec, summary: &RunSummary) {
        self.alerter.notify(format!(
            "Finished {:?}: {} fetches, {} inserted, {} duplicates, {} failed",
            spec.text, summary.fetches, summary.inserted, summary.duplicates, summary.failed
        ));
    }

    fn on_fatal(&self, error: &anyhow::Error) {
        error!(error = %error, "Harvester cannot proceed");
        self.alerter.notify(format!("Fatal error, stopping: {error}"));
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub fetches: u64,
    pub fetch_errors: u64,
    pub inserted: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub rejected: usize,
}

/// Single-task ingestion loop: cursor → gate → normalizer → sink.
pub struct Pipeline {
    spec: QuerySpec,
    gate: FetchGate,
    sink: Sink,
    alerter: Alerter,
    hooks: Arc<dyn LifecycleHooks>,
}

impl Pipeline {
    pub fn new(
        spec: QuerySpec,
        gate: FetchGate,
        sink: Sink,
        alerter: Alerter,
        hooks: Arc<dyn LifecycleHooks>,
    ) -> Self {
        Self {
            spec,
            gate,
            sink,
            alerter,
            hooks,
        }
    }

    /// Runs until the cursor terminates. In continuous mode that never
    /// happens; cancellation is the caller's job.
    #[instrument(skip(self), fields(tag = %self.spec.tag))]
    pub async fn run(&self) -> RunSummary {
        self.hooks.on_startup(&self.spec);

        let mut controller = CursorController::new(&self.spec);
        let mut summary = RunSummary::default();

        while let Some(request) = controller.next_request() {
            summary.fetches += 1;

            match self.gate.fetch(&request).await {
                Ok(response) => {
                    let SearchPage {
                        statuses,
                        search_metadata,
                    } = response.page;
                    let fetched = statuses.len();

                    let (records, rejected) = normalize_batch(statuses, &self.spec);
                    let report = self.sink.persist_batch(&records).await;

                    summary.rejected += rejected;
                    summary.inserted += report.inserted;
                    summary.duplicates += report.duplicates;
                    summary.failed += report.failed;

                    info!(
                        fetched,
                        inserted = report.inserted,
                        duplicates = report.duplicates,
                        failed = report.failed,
                        rejected,
                        "Got {} items",
                        fetched
                    );

                    if let Advance::Terminated(reason) = controller.on_page(&search_metadata) {
                        info!(%reason, fetches = summary.fetches, "Pagination exhausted, run complete");
                        break;
                    }
                    debug!(token = ?controller.cursor().token, "Cursor advanced");
                }
                Err(e) => {
                    summary.fetch_errors += 1;
                    counter!("harvester_fetch_errors", "tag" => self.spec.tag.clone()).increment(1);
                    warn!(error = %e, "Fetch failed, retrying next cycle");
                    self.alerter.notify(format!("Error fetching page: {e}"));
                    controller.on_fetch_error();
                }
            }

            tokio::time::sleep(self.spec.delay).await;
        }

        debug_assert_eq!(controller.state(), CursorState::Terminated);
        self.hooks.on_terminated(&self.spec, &summary);
        summary
    }
}
