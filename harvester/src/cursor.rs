//! Pagination state for one query.
//!
//! Continuous mode reissues the same steady-state query every cycle and never
//! terminates. Bounded mode starts at `until`, adopts the upstream
//! `next_results` fragment after every page and terminates once the upstream
//! stops offering one.

use crate::model::{QueryMode, QuerySpec, SearchMetadata};
use crate::search::{SearchParams, SearchRequest};
use std::fmt;
use url::form_urlencoded;

const RESULT_TYPE: &str = "recent";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Init,
    Fetching,
    /// Transient while a page result is applied.
    Advancing,
    Terminated,
}

/// Opaque upstream pagination token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageToken {
    MaxId(i64),
    Fragment(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub token: Option<PageToken>,
    pub request: SearchRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exhaustion {
    NoMorePages,
    Malformed(String),
}

impl fmt::Display for Exhaustion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exhaustion::NoMorePages => write!(f, "no further pages"),
            Exhaustion::Malformed(fragment) => {
                write!(f, "malformed pagination fragment {fragment:?}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    Continue,
    Terminated(Exhaustion),
}

pub struct CursorController {
    bounded: bool,
    state: CursorState,
    cursor: PageCursor,
}

impl CursorController {
    pub fn new(spec: &QuerySpec) -> Self {
        Self {
            bounded: spec.is_bounded(),
            state: CursorState::Init,
            cursor: initial_cursor(spec),
        }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn cursor(&self) -> &PageCursor {
        &self.cursor
    }

    /// Request for the next fetch, or `None` once terminated.
    pub fn next_request(&mut self) -> Option<SearchRequest> {
        match self.state {
            CursorState::Terminated => None,
            CursorState::Init | CursorState::Fetching | CursorState::Advancing => {
                self.state = CursorState::Fetching;
                Some(self.cursor.request.clone())
            }
        }
    }

    /// Apply a successfully fetched page.
    pub fn on_page(&mut self, metadata: &SearchMetadata) -> Advance {
        if self.state == CursorState::Terminated {
            return Advance::Terminated(Exhaustion::NoMorePages);
        }
        self.state = CursorState::Advancing;

        if !self.bounded {
            self.state = CursorState::Fetching;
            return Advance::Continue;
        }

        match derive_next_page(metadata) {
            Ok(cursor) => {
                self.cursor = cursor;
                self.state = CursorState::Fetching;
                Advance::Continue
            }
            Err(exhaustion) => {
                self.state = CursorState::Terminated;
                Advance::Terminated(exhaustion)
            }
        }
    }

    /// A failed fetch leaves the cursor where it was; the same request is
    /// reissued on the next cycle.
    pub fn on_fetch_error(&mut self) {
        if self.state != CursorState::Terminated {
            self.state = CursorState::Fetching;
        }
    }
}

fn initial_cursor(spec: &QuerySpec) -> PageCursor {
    let mut params = SearchParams {
        q: spec.text.clone(),
        geocode: spec.geocode(),
        count: spec.page_size,
        result_type: RESULT_TYPE.to_string(),
        max_id: None,
    };

    match &spec.mode {
        QueryMode::Continuous => PageCursor {
            token: None,
            request: SearchRequest::Params(params),
        },
        QueryMode::Bounded {
            since,
            until,
            resume_cursor,
        } => {
            params.q = format!(
                "{} since:{} until:{}",
                spec.text,
                since.format("%Y-%m-%d"),
                until.format("%Y-%m-%d")
            );
            params.max_id = *resume_cursor;
            PageCursor {
                token: resume_cursor.map(PageToken::MaxId),
                request: SearchRequest::Params(params),
            }
        }
    }
}

/// Next-page cursor from a page's metadata. Pure: the same metadata always
/// yields the same result.
pub fn derive_next_page(metadata: &SearchMetadata) -> Result<PageCursor, Exhaustion> {
    let fragment = match metadata.next_results.as_deref().map(str::trim) {
        None | Some("") => return Err(Exhaustion::NoMorePages),
        Some(fragment) => fragment,
    };

    let Some(query) = fragment.strip_prefix('?') else {
        return Err(Exhaustion::Malformed(fragment.to_string()));
    };

    let has_max_id = form_urlencoded::parse(query.as_bytes())
        .any(|(key, value)| key == "max_id" && value.parse::<i64>().is_ok());
    if !has_max_id {
        return Err(Exhaustion::Malformed(fragment.to_string()));
    }

    Ok(PageCursor {
        token: Some(PageToken::Fragment(fragment.to_string())),
        request: SearchRequest::NextPage(fragment.to_string()),
    })
}
