use crate::model::{GeoPoint, QuerySpec, RawItem, StoredRecord};
use chrono::DateTime;
use harvester_core::{Error, Result};
use metrics::counter;
use serde_json::Value;
use tracing::{debug, warn};

/// Upstream timestamp layout, e.g. `Thu Apr 06 15:24:15 +0000 2017`. The
/// offset is part of the value, so no local timezone is assumed.
const UPSTREAM_TIME_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

pub fn parse_created_at(raw: &str) -> Result<i64> {
    DateTime::parse_from_str(raw.trim(), UPSTREAM_TIME_FORMAT)
        .map(|ts| ts.timestamp())
        .map_err(|e| Error::Validation(format!("unparseable timestamp {raw:?}: {e}")))
}

/// Raw item to stored record. No I/O.
pub fn normalize(item: RawItem, spec: &QuerySpec) -> Result<StoredRecord> {
    let RawItem {
        id_str,
        created_at,
        coordinates,
        user,
        extra,
    } = item;

    let coordinates = coordinates.unwrap_or_else(|| GeoPoint::from(spec.center));

    let created_at = created_at.ok_or_else(|| Error::Normalize {
        item_id: id_str.clone(),
        details: "missing created_at".to_string(),
    })?;
    let created_at_unix = parse_created_at(&created_at).map_err(|e| Error::Normalize {
        item_id: id_str.clone(),
        details: e.to_string(),
    })?;

    Ok(StoredRecord {
        id_str,
        created_at,
        created_at_unix,
        coordinates,
        user: user.map(|author| author.id_str),
        ingestion_tag: spec.tag.clone(),
        extra,
    })
}

/// Upstream JSON to a typed item.
pub fn decode(value: Value) -> Result<RawItem> {
    let item_id = value
        .get("id_str")
        .and_then(Value::as_str)
        .unwrap_or("<unknown>")
        .to_string();

    serde_json::from_value(value).map_err(|e| Error::Normalize {
        item_id,
        details: e.to_string(),
    })
}

/// Normalizes a page. Items that fail to decode or convert are logged and
/// skipped; the rest of the batch is unaffected.
pub fn normalize_batch(items: Vec<Value>, spec: &QuerySpec) -> (Vec<StoredRecord>, usize) {
    let mut records = Vec::with_capacity(items.len());
    let mut rejected = 0;

    for value in items {
        let converted = decode(value).and_then(|item| {
            debug!(id = %item.id_str, text = item.text().unwrap_or_default(), "Fetched item");
            normalize(item, spec)
        });
        match converted {
            Ok(record) => records.push(record),
            Err(e) => {
                rejected += 1;
                counter!("harvester_normalize_failures", "tag" => spec.tag.clone()).increment(1);
                warn!(error = %e, "Skipping item");
            }
        }
    }

    (records, rejected)
}
