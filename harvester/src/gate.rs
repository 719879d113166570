use crate::model::{RateLimitSnapshot, SearchResponse};
use crate::search::{SearchRequest, SearchSource};
use harvester_core::Result;
use metrics::{counter, gauge, histogram};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Issues one page request and reports the quota that came back with it.
/// Quota is observed only; pacing is the query's fixed delay.
pub struct FetchGate {
    source: Arc<dyn SearchSource>,
    tag: String,
}

impl FetchGate {
    pub fn new(source: Arc<dyn SearchSource>, tag: String) -> Self {
        Self { source, tag }
    }

    pub async fn fetch(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let start = Instant::now();
        let response = self.source.search(request).await;
        histogram!("harvester_fetch_duration_ms", "source" => self.source.source_id().to_string())
            .record(start.elapsed().as_millis() as f64);

        let response = response?;
        counter!("harvester_items_fetched", "tag" => self.tag.clone())
            .increment(response.page.statuses.len() as u64);
        self.report_quota(response.rate_limit.as_ref(), response.page.statuses.len());

        Ok(response)
    }

    fn report_quota(&self, snapshot: Option<&RateLimitSnapshot>, fetched: usize) {
        match snapshot {
            Some(snapshot) => {
                gauge!("harvester_rate_limit_remaining", "tag" => self.tag.clone())
                    .set(snapshot.remaining as f64);
                info!(
                    tag = %self.tag,
                    fetched,
                    remaining = snapshot.remaining,
                    limit = snapshot.limit,
                    reset_at = ?snapshot.reset_time(),
                    "Rate limit: {}/{}",
                    snapshot.remaining,
                    snapshot.limit
                );
            }
            None => info!(tag = %self.tag, fetched, "Rate limit: unknown"),
        }
    }
}
