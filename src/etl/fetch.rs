//! PageFetcher trait for issuing single page requests against a source

use super::{Cursor, StartPosition};
use crate::client::ServiceError;
use crate::record::RawRecord;

use eyre::{Report, Result};

/// One page request.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchRequest {
    pub cursor: Cursor,
    /// Upper bound on the page size; in bounded mode this never exceeds
    /// the number of records still to be emitted.
    pub page_size_hint: Option<u64>,
}

/// A successfully fetched page
#[derive(Debug, Default)]
pub struct Page {
    /// Records in arrival order
    pub records: Vec<RawRecord>,
    /// Position of the following page, `None` once the source is exhausted
    pub next_cursor: Option<Cursor>,
    /// The reader has reached the current tail of a stream
    pub caught_up: bool,
    /// Lag behind the tail reported by the backend
    pub millis_behind: Option<u64>,
}

impl Page {
    /// Returns true if no further page is reachable from this one
    pub fn exhausted(&self) -> bool {
        self.next_cursor.is_none()
    }
}

/// Outcome of a single fetch call
#[derive(Debug)]
pub enum FetchResult {
    Data(Page),
    /// The backend rejected the call for exceeding its rate quota
    Throttled(String),
    Fatal(Report),
}

impl FetchResult {
    /// Classify a failed call: throttling conditions become
    /// [`FetchResult::Throttled`], everything else is fatal.
    pub fn from_error(error: Report) -> Self {
        match error.downcast_ref::<ServiceError>() {
            Some(service) if service.is_throttling() => Self::Throttled(service.to_string()),
            _ => Self::Fatal(error),
        }
    }
}

/// PageFetcher trait for reading pages from a remote source
///
/// Implementors issue exactly one remote call per [`PageFetcher::fetch`];
/// retries and pacing are the caller's concern.
///
/// # Example
/// ```no_run
/// use store_dump::etl::{Cursor, FetchRequest, FetchResult, Page, PageFetcher, StartPosition};
/// use eyre::Result;
///
/// struct EmptyTable;
///
/// impl PageFetcher for EmptyTable {
///     async fn seed(&self, _start: &StartPosition) -> Result<Cursor> {
///         Ok(Cursor::table_start("empty"))
///     }
///
///     async fn fetch(&self, _request: &FetchRequest) -> FetchResult {
///         FetchResult::Data(Page::default())
///     }
/// }
/// ```
pub trait PageFetcher: Send + Sync {
    /// Resolve a start position into the source's native cursor
    ///
    /// # Errors
    /// Returns an error if the start position is not supported by the
    /// source or cannot be resolved.
    fn seed(&self, start: &StartPosition) -> impl std::future::Future<Output = Result<Cursor>> + Send;

    /// Fetch the page at `request.cursor`
    fn fetch(&self, request: &FetchRequest) -> impl std::future::Future<Output = FetchResult> + Send;
}
