use chrono::{DateTime, NaiveDate, Utc};
use harvester_core::{Config, Error, Result, RunMode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Immutable description of one ingestion run.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub text: String,
    pub center: GeoCenter,
    pub radius_km: u32,
    pub mode: QueryMode,
    pub delay: Duration,
    pub page_size: u32,
    pub tag: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoCenter {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryMode {
    /// Poll the recent stream forever.
    Continuous,
    /// Walk backwards from `until` towards `since` and stop when pages run out.
    Bounded {
        since: NaiveDate,
        until: NaiveDate,
        resume_cursor: Option<i64>,
    },
}

impl QuerySpec {
    pub fn from_config(config: &Config) -> Result<Self> {
        let query = &config.query;
        let mode = match query.mode {
            RunMode::Continuous => QueryMode::Continuous,
            RunMode::Bounded => {
                let (Some(since), Some(until)) = (query.since, query.until) else {
                    return Err(Error::Config(
                        "bounded mode requires query.since and query.until".to_string(),
                    ));
                };
                QueryMode::Bounded {
                    since,
                    until,
                    resume_cursor: config
                        .resume_cursor()
                        .map_err(|e| Error::Config(e.to_string()))?,
                }
            }
        };

        Ok(Self {
            text: query.text.clone(),
            center: GeoCenter {
                latitude: query.latitude,
                longitude: query.longitude,
            },
            radius_km: query.radius_km,
            mode,
            delay: Duration::from_secs(query.delay_secs),
            page_size: query.page_size,
            tag: query.tag.clone(),
        })
    }

    /// `lat,lon,radiuskm` as the search API expects it.
    pub fn geocode(&self) -> String {
        format!(
            "{},{},{}km",
            self.center.latitude, self.center.longitude, self.radius_km
        )
    }

    pub fn is_bounded(&self) -> bool {
        matches!(self.mode, QueryMode::Bounded { .. })
    }
}

/// GeoJSON point; `coordinates` is `[longitude, latitude]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: [f64; 2],
}

impl GeoPoint {
    pub fn point(longitude: f64, latitude: f64) -> Self {
        Self {
            kind: "Point".to_string(),
            coordinates: [longitude, latitude],
        }
    }
}

impl From<GeoCenter> for GeoPoint {
    fn from(center: GeoCenter) -> Self {
        GeoPoint::point(center.longitude, center.latitude)
    }
}

/// Upstream record. Only the fields the pipeline inspects are typed; the
/// rest is carried through untouched in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub id_str: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub coordinates: Option<GeoPoint>,
    #[serde(default)]
    pub user: Option<Author>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RawItem {
    pub fn text(&self) -> Option<&str> {
        self.extra
            .get("full_text")
            .or_else(|| self.extra.get("text"))
            .and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub id_str: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// What the store keeps: the upstream fields plus the derived ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id_str: String,
    pub created_at: String,
    pub created_at_unix: i64,
    pub coordinates: GeoPoint,
    /// Author collapsed to its identifier.
    pub user: Option<String>,
    pub ingestion_tag: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StoredRecord {
    pub fn natural_key(&self) -> &str {
        &self.id_str
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SearchPage {
    /// Left undecoded so a single malformed item is rejected on its own
    /// instead of failing the page.
    #[serde(default)]
    pub statuses: Vec<Value>,
    #[serde(default)]
    pub search_metadata: SearchMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SearchMetadata {
    /// Query-string fragment for the next (older) page, e.g. `?max_id=..&q=..`.
    #[serde(default)]
    pub next_results: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSnapshot {
    pub remaining: u32,
    pub limit: u32,
    /// Epoch seconds at which the quota window resets.
    pub reset_at: i64,
}

impl RateLimitSnapshot {
    pub fn reset_time(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp(self.reset_at, 0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResponse {
    pub page: SearchPage,
    pub rate_limit: Option<RateLimitSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn geocode_matches_search_api_format() {
        let mut config = Config::default();
        config.query.text = "#hi".into();
        config.query.latitude = 40.415178;
        config.query.longitude = -3.703697;
        config.query.radius_km = 50;

        let spec = QuerySpec::from_config(&config).unwrap();
        assert_eq!(spec.geocode(), "40.415178,-3.703697,50km");
        assert!(!spec.is_bounded());
    }

    #[test]
    fn bounded_config_carries_range_and_cursor() {
        let mut config = Config::default();
        config.query.text = "#demo".into();
        config.query.mode = RunMode::Bounded;
        config.query.since = NaiveDate::from_ymd_opt(2020, 1, 1);
        config.query.until = NaiveDate::from_ymd_opt(2020, 1, 2);
        config.query.resume_cursor = Some("0".into());

        let spec = QuerySpec::from_config(&config).unwrap();
        assert_eq!(
            spec.mode,
            QueryMode::Bounded {
                since: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
                until: NaiveDate::from_ymd_opt(2020, 1, 2).unwrap(),
                resume_cursor: None,
            }
        );
    }

    #[test]
    fn raw_item_keeps_unknown_fields() {
        let raw: RawItem = serde_json::from_value(json!({
            "id_str": "850006245121695744",
            "created_at": "Thu Apr 06 15:24:15 +0000 2017",
            "coordinates": null,
            "text": "hello",
            "retweet_count": 3,
            "user": { "id_str": "6253282", "screen_name": "api" }
        }))
        .unwrap();

        assert_eq!(raw.coordinates, None);
        assert_eq!(raw.text(), Some("hello"));
        assert_eq!(raw.extra.get("retweet_count"), Some(&json!(3)));
        assert_eq!(raw.user.unwrap().id_str, "6253282");
    }

    #[test]
    fn page_with_a_malformed_item_still_deserializes() {
        let page: SearchPage = serde_json::from_value(json!({
            "statuses": [
                { "id_str": "1", "created_at": "Wed Jan 01 12:00:00 +0000 2020" },
                { "id_str": "2", "user": { "id": 9 } }
            ],
            "search_metadata": { "next_results": "?max_id=1" }
        }))
        .unwrap();

        assert_eq!(page.statuses.len(), 2);
        assert_eq!(page.search_metadata.next_results.as_deref(), Some("?max_id=1"));
    }

    #[test]
    fn page_without_metadata_deserializes() {
        let page: SearchPage = serde_json::from_value(json!({ "statuses": [] })).unwrap();
        assert_eq!(page.search_metadata.next_results, None);
    }
}
