use super::{SearchRequest, SearchSource};
use crate::model::{RateLimitSnapshot, SearchPage, SearchResponse};
use async_trait::async_trait;
use harvester_core::backoff::{retry_with_backoff, RetryPolicy};
use harvester_core::config::SearchConfig;
use harvester_core::{Error, Result};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, instrument};

const SEARCH_PATH: &str = "/1.1/search/tweets.json";
const TOKEN_PATH: &str = "/oauth2/token";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token_type: String,
    access_token: String,
}

/// Search API client using app-only bearer authentication.
pub struct TwitterSearch {
    http: reqwest::Client,
    api_base: String,
    bearer_token: String,
}

impl TwitterSearch {
    pub async fn connect(config: &SearchConfig, policy: RetryPolicy) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        let api_base = config.api_base.trim_end_matches('/').to_string();

        let bearer_token = match config.bearer_token.as_deref() {
            Some(token) if !token.is_empty() => token.to_string(),
            _ => {
                retry_with_backoff(
                    || {
                        Self::obtain_bearer_token(
                            &http,
                            &api_base,
                            &config.consumer_key,
                            &config.consumer_secret,
                        )
                    },
                    policy,
                    "obtain_bearer_token",
                )
                .await?
            }
        };

        Ok(Self {
            http,
            api_base,
            bearer_token,
        })
    }

    async fn obtain_bearer_token(
        http: &reqwest::Client,
        api_base: &str,
        consumer_key: &str,
        consumer_secret: &str,
    ) -> Result<String> {
        let resp = http
            .post(format!("{api_base}{TOKEN_PATH}"))
            .basic_auth(consumer_key, Some(consumer_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Search {
                status: status.as_u16(),
                details: format!("token exchange failed: {body}"),
            });
        }

        let token: TokenResponse = resp.json().await?;
        if !token.token_type.eq_ignore_ascii_case("bearer") {
            return Err(Error::Search {
                status: status.as_u16(),
                details: format!("unexpected token type {:?}", token.token_type),
            });
        }

        info!("Obtained app-only bearer token");
        Ok(token.access_token)
    }

    fn header_number<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
        headers.get(name)?.to_str().ok()?.trim().parse().ok()
    }

    fn rate_limit(headers: &HeaderMap) -> Option<RateLimitSnapshot> {
        Some(RateLimitSnapshot {
            remaining: Self::header_number(headers, "x-rate-limit-remaining")?,
            limit: Self::header_number(headers, "x-rate-limit-limit")?,
            reset_at: Self::header_number(headers, "x-rate-limit-reset")?,
        })
    }
}

#[async_trait]
impl SearchSource for TwitterSearch {
    #[instrument(skip(self))]
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let builder = match request {
            SearchRequest::Params(params) => self
                .http
                .get(format!("{}{SEARCH_PATH}", self.api_base))
                .query(&params.to_pairs()),
            SearchRequest::NextPage(fragment) => self
                .http
                .get(format!("{}{SEARCH_PATH}{fragment}", self.api_base)),
        };

        let resp = builder.bearer_auth(&self.bearer_token).send().await?;
        let status = resp.status();
        let rate_limit = Self::rate_limit(resp.headers());

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimit {
                reset_at: rate_limit.map(|r| r.reset_at).unwrap_or_default(),
            });
        }

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Search {
                status: status.as_u16(),
                details: body,
            });
        }

        let body = resp.text().await?;
        let page: SearchPage = serde_json::from_str(&body)?;

        debug!(
            statuses = page.statuses.len(),
            next = ?page.search_metadata.next_results,
            "Fetched search page"
        );

        Ok(SearchResponse { page, rate_limit })
    }

    fn source_id(&self) -> &str {
        "twitter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use reqwest::header::HeaderValue;

    #[test]
    fn rate_limit_snapshot_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-rate-limit-remaining", HeaderValue::from_static("178"));
        headers.insert("x-rate-limit-limit", HeaderValue::from_static("180"));
        headers.insert("x-rate-limit-reset", HeaderValue::from_static("1485350400"));

        assert_eq!(
            TwitterSearch::rate_limit(&headers),
            Some(RateLimitSnapshot {
                remaining: 178,
                limit: 180,
                reset_at: 1485350400,
            })
        );
    }

    #[test]
    fn partial_rate_limit_headers_yield_no_snapshot() {
        let mut headers = HeaderMap::new();
        headers.insert("x-rate-limit-remaining", HeaderValue::from_static("178"));
        assert_eq!(TwitterSearch::rate_limit(&headers), None);
    }
}
