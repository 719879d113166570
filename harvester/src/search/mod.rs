pub mod twitter;

use crate::model::SearchResponse;
use async_trait::async_trait;
use harvester_core::Result;

pub use twitter::TwitterSearch;

/// Parameters of one page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchRequest {
    /// Query built from the `QuerySpec`.
    Params(SearchParams),
    /// Upstream-supplied `next_results` fragment, replayed verbatim.
    NextPage(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParams {
    pub q: String,
    pub geocode: String,
    pub count: u32,
    pub result_type: String,
    pub max_id: Option<i64>,
}

impl SearchParams {
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("q", self.q.clone()),
            ("geocode", self.geocode.clone()),
            ("count", self.count.to_string()),
            ("result_type", self.result_type.clone()),
        ];
        if let Some(max_id) = self.max_id {
            pairs.push(("max_id", max_id.to_string()));
        }
        pairs
    }
}

#[async_trait]
pub trait SearchSource: Send + Sync {
    /// Perform exactly one page request.
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse>;

    fn source_id(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn max_id_is_sent_only_when_set() {
        let mut params = SearchParams {
            q: "#demo".into(),
            geocode: "40,-3,50km".into(),
            count: 100,
            result_type: "recent".into(),
            max_id: None,
        };
        assert!(params.to_pairs().iter().all(|(k, _)| *k != "max_id"));

        params.max_id = Some(42);
        assert_eq!(params.to_pairs().last(), Some(&("max_id", "42".to_string())));
    }
}
