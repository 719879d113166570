//! Fakes shared by the unit tests.

use crate::alert::Alert;
use crate::model::{
    GeoCenter, GeoPoint, QueryMode, QuerySpec, RawItem, SearchMetadata, SearchPage,
    SearchResponse, StoredRecord,
};
use crate::search::{SearchRequest, SearchSource};
use crate::store::{InsertOutcome, RecordStore};
use async_trait::async_trait;
use chrono::NaiveDate;
use harvester_core::{Error, Result};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

pub fn bounded_spec(resume_cursor: Option<i64>) -> QuerySpec {
    QuerySpec {
        text: "#demo".into(),
        center: GeoCenter {
            latitude: 40.0,
            longitude: -3.0,
        },
        radius_km: 50,
        mode: QueryMode::Bounded {
            since: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            until: NaiveDate::from_ymd_opt(2020, 1, 2).unwrap(),
            resume_cursor,
        },
        delay: Duration::from_secs(1),
        page_size: 100,
        tag: "demo-tag".into(),
    }
}

pub fn continuous_spec() -> QuerySpec {
    QuerySpec {
        mode: QueryMode::Continuous,
        ..bounded_spec(None)
    }
}

/// `coordinates` is `(longitude, latitude)`.
pub fn raw_item(id: &str, coordinates: Option<(f64, f64)>) -> RawItem {
    RawItem {
        id_str: id.to_string(),
        created_at: Some("Wed Jan 01 12:00:00 +0000 2020".to_string()),
        coordinates: coordinates.map(|(lon, lat)| GeoPoint::point(lon, lat)),
        user: None,
        extra: Map::new(),
    }
}

pub fn as_json(item: RawItem) -> Value {
    serde_json::to_value(item).unwrap()
}

pub fn stored(id: &str, tag: &str) -> StoredRecord {
    StoredRecord {
        id_str: id.to_string(),
        created_at: "Wed Jan 01 12:00:00 +0000 2020".to_string(),
        created_at_unix: 1577880000,
        coordinates: GeoPoint::point(-3.0, 40.0),
        user: Some("6253282".to_string()),
        ingestion_tag: tag.to_string(),
        extra: Map::new(),
    }
}

pub fn page(items: Vec<RawItem>, next_results: Option<&str>) -> SearchPage {
    SearchPage {
        statuses: items.into_iter().map(as_json).collect(),
        search_metadata: SearchMetadata {
            next_results: next_results.map(str::to_string),
        },
    }
}

pub fn drain(rx: &mut mpsc::Receiver<Alert>) -> Vec<String> {
    let mut texts = Vec::new();
    while let Ok(alert) = rx.try_recv() {
        texts.push(alert.text);
    }
    texts
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// In-memory store with the same uniqueness rule as the real one, plus
/// injectable infrastructure failures and data rejections.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, StoredRecord>>,
    failures_left: AtomicUsize,
    rejections_left: AtomicUsize,
    refresh_failures_left: AtomicUsize,
    refreshes: AtomicUsize,
}

impl MemoryStore {
    /// Next `count` inserts fail as if the connection dropped.
    pub fn fail_next_inserts(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Next `count` inserts are refused as bad data.
    pub fn reject_next_inserts(&self, count: usize) {
        self.rejections_left.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_refreshes(&self, count: usize) {
        self.refresh_failures_left.store(count, Ordering::SeqCst);
    }

    /// Refresh attempts, failed ones included.

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn get(&self, id: &str) -> Option<StoredRecord> {
        self.records.lock().unwrap().get(id).cloned()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert_one(&self, record: &StoredRecord) -> Result<InsertOutcome> {
        if take_one(&self.failures_left) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection closed",
            )));
        }
        if take_one(&self.rejections_left) {
            return Err(Error::Validation(
                "unsupported Unicode escape sequence".into(),
            ));
        }

        let mut records = self.records.lock().unwrap();
        if records.contains_key(record.natural_key()) {
            return Ok(InsertOutcome::Duplicate);
        }
        records.insert(record.natural_key().to_string(), record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn count_all(&self) -> Result<i64> {
        Ok(self.len() as i64)
    }

    async fn count_by_tag(&self, tag: &str) -> Result<i64> {
        let records = self.records.lock().unwrap();
        Ok(records.values().filter(|r| r.ingestion_tag == tag).count() as i64)
    }

    async fn refresh_session(&self) -> Result<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.refresh_failures_left) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "server unreachable",
            )));
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Replays a fixed script of responses. Once the script runs out it answers
/// with an empty, final page.
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<SearchResponse>>>,
    requests: Mutex<Vec<SearchRequest>>,
}

impl ScriptedSource {
    pub fn new(script: Vec<Result<SearchResponse>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<SearchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchSource for ScriptedSource {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(SearchResponse {
                page: SearchPage::default(),
                rate_limit: None,
            })
        })
    }

    fn source_id(&self) -> &str {
        "scripted"
    }
}
