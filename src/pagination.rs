//! Following "next page" links across a REST collection.
//!
//! Collections such as the resource controller's return one page at a time. Each page holds a
//! result array and, if more data is available, a cursor field with the link to the next page.
//! That link is either an absolute URL or a path relative to the collection URL. [`fetch_all`]
//! follows the cursors and merges every page's results into the first page.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::collections::HashSet;
use url::Url;

/// Page limit applied unless a request sets its own.
pub const DEFAULT_MAX_PAGES: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum PaginationError {
    #[error("Request to {url} failed: {source}")]
    Request {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("Invalid JSON returned from {url}: {source}")]
    Decode {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("Cannot build a page URL from `{cursor}`: {source}")]
    InvalidUrl {
        cursor: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Invalid value for the {0} header")]
    InvalidHeader(&'static str),
    #[error("Field `{field}` in the page from {url} is not a link")]
    InvalidCursor { field: String, url: Url },
    #[error("Field `{field}` in the page from {url} is missing or not an array")]
    MissingResults { field: String, url: Url },
    #[error("The page at {url} was already fetched; the collection links back on itself")]
    CursorCycle { url: Url },
    #[error("Stopped after {0} pages without reaching the end of the collection")]
    PageLimit(usize),
}

/// A collection to fetch, and how its pages are linked together.
#[derive(Clone, Debug)]
pub struct PaginatedRequest {
    url: Url,
    headers: HeaderMap,
    query: Vec<(String, String)>,
    next_field: String,
    result_field: String,
    max_pages: usize,
}

impl PaginatedRequest {
    /// `next_field` names the cursor in each page, `result_field` the array that gets merged.
    pub fn new(url: Url, next_field: impl Into<String>, result_field: impl Into<String>) -> Self {
        Self {
            url,
            headers: HeaderMap::new(),
            query: Vec::new(),
            next_field: next_field.into(),
            result_field: result_field.into(),
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    /// Add a header sent with every page request.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Add a query parameter. Only the first request carries it; cursors are followed as given.
    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Fail instead of fetching more than `max_pages` pages. At least one page is always fetched.
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// Fetch every page of a collection and merge the result arrays into the first page.
///
/// The returned value is the first page's body with `result_field` holding the concatenation of
/// all pages' results, in the order they were fetched. Nothing is deduplicated.
///
/// Paging stops when a page's cursor is missing, `null`, or an empty string. Pages are parsed as
/// JSON regardless of their status code. A cursor that leads back to an already fetched page is
/// a [`PaginationError::CursorCycle`], and going past the request's page limit is a
/// [`PaginationError::PageLimit`].
#[tracing::instrument(skip_all, fields(url = %request.url))]
pub async fn fetch_all(
    client: &reqwest::Client,
    request: &PaginatedRequest,
) -> Result<Value, PaginationError> {
    let mut data = get_page(client, request.url.clone(), &request.headers, &request.query).await?;
    let mut cursor = next_cursor(&data, &request.next_field, &request.url)?;
    let mut fetched = HashSet::from([request.url.clone()]);
    let mut pages = 1;

    while let Some(next) = cursor {
        if pages >= request.max_pages {
            return Err(PaginationError::PageLimit(pages));
        }
        let url = resolve_cursor(&request.url, &next)?;
        if !fetched.insert(url.clone()) {
            return Err(PaginationError::CursorCycle { url });
        }
        tracing::debug!("Fetching page {} from {}", pages + 1, url);
        let current = get_page(client, url.clone(), &request.headers, &[]).await?;
        pages += 1;
        cursor = next_cursor(&current, &request.next_field, &url)?;
        append_results(&mut data, current, &request.result_field, &url)?;
    }

    tracing::debug!("Fetched {} page(s)", pages);
    Ok(data)
}

async fn get_page(
    client: &reqwest::Client,
    url: Url,
    headers: &HeaderMap,
    query: &[(String, String)],
) -> Result<Value, PaginationError> {
    let mut builder = client.get(url.clone()).headers(headers.clone());
    if !query.is_empty() {
        builder = builder.query(query);
    }
    let response = match builder.send().await {
        Ok(response) => response,
        Err(source) => return Err(PaginationError::Request { url, source }),
    };
    tracing::debug!("{} returned {}", url, response.status());
    response
        .json::<Value>()
        .await
        .map_err(|source| PaginationError::Decode { url, source })
}

/// The link to the next page, if there is one. Empty strings count as "no more pages".
fn next_cursor(page: &Value, field: &str, url: &Url) -> Result<Option<String>, PaginationError> {
    match page.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(PaginationError::InvalidCursor {
            field: field.to_string(),
            url: url.clone(),
        }),
    }
}

/// Absolute cursors are used as is; anything else is resolved against the collection URL.
fn resolve_cursor(base: &Url, cursor: &str) -> Result<Url, PaginationError> {
    let resolved = match Url::parse(cursor) {
        Err(url::ParseError::RelativeUrlWithoutBase) => base.join(cursor),
        other => other,
    };
    resolved.map_err(|source| PaginationError::InvalidUrl {
        cursor: cursor.to_string(),
        source,
    })
}

fn append_results(
    data: &mut Value,
    mut page: Value,
    field: &str,
    url: &Url,
) -> Result<(), PaginationError> {
    let missing = || PaginationError::MissingResults {
        field: field.to_string(),
        url: url.clone(),
    };
    let Some(Value::Array(items)) = page.get_mut(field).map(Value::take) else {
        return Err(missing());
    };
    let Some(results) = data.get_mut(field).and_then(Value::as_array_mut) else {
        return Err(missing());
    };
    results.extend(items);
    Ok(())
}
