//! Extraction loop orchestrating fetch, transform and load

use super::{
    Cursor, CursorStore, FetchRequest, FetchResult, Loader, Page, PageFetcher, PartialLoad,
    RateController, StartPosition, Transformer,
};
use crate::record::RawRecord;

use eyre::{Report, Result, WrapErr};
use owo_colors::OwoColorize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How much of the source a run consumes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Stop after emitting this many records or at the end of the data
    Bounded(u64),
    /// Read until the end of the data
    Unbounded,
    /// Keep polling the tail of a stream until cancelled or the optional
    /// limit is reached
    Following { limit: Option<u64> },
}

impl Mode {
    pub fn new(limit: Option<u64>, follow: bool) -> Self {
        match (limit, follow) {
            (limit, true) => Self::Following { limit },
            (Some(limit), false) => Self::Bounded(limit),
            (None, false) => Self::Unbounded,
        }
    }

    /// Record limit, if any
    pub fn limit(&self) -> Option<u64> {
        match self {
            Self::Bounded(limit) => Some(*limit),
            Self::Following { limit } => *limit,
            Self::Unbounded => None,
        }
    }

    pub fn follows(&self) -> bool {
        matches!(self, Self::Following { .. })
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bounded(limit) => write!(f, "bounded to {} record(s)", limit),
            Self::Unbounded => write!(f, "unbounded"),
            Self::Following { limit: None } => write!(f, "following"),
            Self::Following { limit: Some(limit) } => {
                write!(f, "following up to {} record(s)", limit)
            }
        }
    }
}

/// Settings for a single extraction run
#[derive(Clone, Debug)]
pub struct LoopOptions {
    /// Source name used in logs and error context
    pub label: String,
    pub mode: Mode,
    pub start: StartPosition,
    /// Steady-state delay between two fetches
    pub base_delay: Duration,
    /// Optional ceiling for throttle backoff
    pub max_delay: Option<Duration>,
    /// Wait between polls once a followed stream is caught up
    pub idle_interval: Duration,
}

impl LoopOptions {
    pub fn new(label: impl Into<String>, mode: Mode) -> Self {
        Self {
            label: label.into(),
            mode,
            start: StartPosition::Beginning,
            base_delay: Duration::from_secs(1),
            max_delay: None,
            idle_interval: Duration::from_secs(5),
        }
    }
}

/// Why a run stopped without error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    LimitReached,
    /// The end of the data was reached outside follow mode
    Exhausted,
    /// The followed shard was closed and returns no further iterator
    ShardClosed,
    Cancelled,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            Self::LimitReached => "record limit reached",
            Self::Exhausted => "end of data",
            Self::ShardClosed => "shard closed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(reason)
    }
}

/// Outcome of a completed run
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub label: String,
    /// Records delivered to the sink
    pub emitted: u64,
    /// Records skipped because they could not be decoded
    pub decode_errors: u64,
    pub fetches: u64,
    pub throttled: u64,
    /// Last confirmed position
    pub cursor: Cursor,
    pub end: EndReason,
}

/// Context attached to the error of an aborted run.
///
/// Recover it from the returned report with
/// `report.downcast_ref::<ExtractionAborted>()`.
#[derive(Debug, thiserror::Error)]
#[error("extraction from {label} aborted after {emitted} record(s), last confirmed position {cursor}")]
pub struct ExtractionAborted {
    pub label: String,
    pub emitted: u64,
    pub cursor: String,
}

/// Mutable state of one run, updated once per fetch cycle
struct RunState {
    cursor: CursorStore,
    rate: RateController,
    emitted: u64,
    decode_errors: u64,
    fetches: u64,
    throttled: u64,
}

impl RunState {
    fn remaining(&self, mode: Mode) -> Option<u64> {
        mode.limit().map(|limit| limit.saturating_sub(self.emitted))
    }

    fn limit_reached(&self, mode: Mode) -> bool {
        self.remaining(mode) == Some(0)
    }

    fn abort(&self, label: &str, error: Report) -> Report {
        error.wrap_err(ExtractionAborted {
            label: label.to_string(),
            emitted: self.emitted,
            cursor: self.cursor.current().to_string(),
        })
    }
}

enum Step {
    Wait(Duration),
    Stop(EndReason),
}

/// Drives repeated page fetches from a source into a sink
///
/// # Type Parameters
/// - `F`: PageFetcher for the source
/// - `T`: Transformer turning raw records into sink items
/// - `L`: Loader receiving the transformed items
///
/// One fetch is outstanding at a time. Throttled fetches are retried at
/// the same cursor after the rate controller's doubled delay; any other
/// failure aborts the run.
///
/// # Example
/// ```no_run
/// use store_dump::etl::{ExtractionLoop, LoopOptions, Mode};
/// use store_dump::{RecordDecoder, TableFetcher, NdjsonSink, OutputHandle};
/// # use store_dump::client::{Auth, AwsJsonClient, Protocol};
/// # use url::Url;
///
/// # async fn example() -> eyre::Result<()> {
/// # let url = Url::parse("http://localhost:8000")?;
/// let client = AwsJsonClient::try_new(url, Auth::None, Protocol::DynamoDb)?;
/// let extraction = ExtractionLoop::new(
///     TableFetcher::new(client, "users"),
///     RecordDecoder::new("users"),
///     NdjsonSink::new(OutputHandle::stdout()),
///     LoopOptions::new("users", Mode::Bounded(100)),
/// );
///
/// let summary = extraction.run().await?;
/// println!("Dumped {} records", summary.emitted);
/// # Ok(())
/// # }
/// ```
pub struct ExtractionLoop<F, T, L> {
    fetcher: F,
    transformer: T,
    loader: L,
    options: LoopOptions,
    cancel: CancellationToken,
}

impl<F, T, L> ExtractionLoop<F, T, L>
where
    F: PageFetcher,
    T: Transformer<Input = RawRecord>,
    L: Loader<Item = T::Output>,
{
    /// Create a new extraction loop
    pub fn new(fetcher: F, transformer: T, loader: L, options: LoopOptions) -> Self {
        Self {
            fetcher,
            transformer,
            loader,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop the run when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn options(&self) -> &LoopOptions {
        &self.options
    }

    /// Run the extraction until the mode's termination condition
    ///
    /// Steps, repeated per page:
    /// 1. Fetch the page at the current cursor
    /// 2. Transform each record, skipping those that fail
    /// 3. Load the page's items and advance the cursor
    /// 4. Wait the pacing, backoff or idle delay
    ///
    /// # Errors
    /// Returns an error if the start position cannot be resolved, a fetch
    /// fails for a reason other than throttling, or the sink rejects a
    /// write. Errors raised mid-run carry an [`ExtractionAborted`] context.
    pub async fn run(&self) -> Result<RunSummary> {
        let label = self.options.label.as_str();
        let mode = self.options.mode;
        log::info!("Starting extraction from {} ({})", label.cyan(), mode);

        let start = self
            .fetcher
            .seed(&self.options.start)
            .await
            .wrap_err_with(|| format!("Failed to resolve start position for {}", label))?;
        log::debug!("Starting at {}", start);

        let mut state = RunState {
            cursor: CursorStore::new(start),
            rate: RateController::new(self.options.base_delay, self.options.max_delay),
            emitted: 0,
            decode_errors: 0,
            fetches: 0,
            throttled: 0,
        };

        let end = loop {
            if state.limit_reached(mode) {
                break EndReason::LimitReached;
            }
            if self.cancel.is_cancelled() {
                break EndReason::Cancelled;
            }

            let request = FetchRequest {
                cursor: state.cursor.current().clone(),
                page_size_hint: state.remaining(mode),
            };
            log::debug!(
                "Fetch {} at {} (emitted {}, delay {:?})",
                state.fetches,
                request.cursor,
                state.emitted,
                state.rate.delay_before_next_call()
            );

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break EndReason::Cancelled,
                result = self.fetcher.fetch(&request) => result,
            };
            state.fetches += 1;

            let step = match result {
                FetchResult::Data(page) => self.deliver(&mut state, page).await?,
                FetchResult::Throttled(reason) => {
                    state.throttled += 1;
                    state.rate.on_throttled();
                    log::warn!(
                        "{} throttled ({}), retrying same position in {:?}",
                        label.cyan(),
                        reason,
                        state.rate.delay_before_next_call()
                    );
                    Step::Wait(state.rate.delay_before_next_call())
                }
                FetchResult::Fatal(error) => return Err(state.abort(label, error)),
            };

            match step {
                Step::Stop(end) => break end,
                Step::Wait(delay) => {
                    if !self.pause(delay).await {
                        break EndReason::Cancelled;
                    }
                }
            }
        };

        log::info!(
            "Finished {}: {} record(s) in {} fetch(es), {} throttled, {} undecodable ({})",
            label.cyan(),
            state.emitted,
            state.fetches,
            state.throttled,
            state.decode_errors,
            end
        );

        Ok(RunSummary {
            label: label.to_string(),
            emitted: state.emitted,
            decode_errors: state.decode_errors,
            fetches: state.fetches,
            throttled: state.throttled,
            cursor: state.cursor.current().clone(),
            end,
        })
    }

    /// Emit one page and decide what happens next
    async fn deliver(&self, state: &mut RunState, page: Page) -> Result<Step> {
        let label = self.options.label.as_str();
        let mode = self.options.mode;
        let Page {
            mut records,
            next_cursor,
            caught_up,
            millis_behind,
        } = page;

        let received = records.len();
        if let Some(remaining) = state.remaining(mode) {
            records.truncate(usize::try_from(remaining).unwrap_or(usize::MAX));
        }
        let truncated = records.len() < received;

        let mut batch = Vec::with_capacity(records.len());
        for record in records {
            match self.transformer.transform(record) {
                Ok(item) => batch.push(item),
                Err(e) => {
                    state.decode_errors += 1;
                    log::warn!("Skipping undecodable record from {}: {:#}", label, e);
                }
            }
        }

        if !batch.is_empty() {
            match self.loader.load(batch).await {
                Ok(count) => state.emitted += count as u64,
                Err(e) => {
                    if let Some(partial) = e.downcast_ref::<PartialLoad>() {
                        state.emitted += partial.delivered as u64;
                    }
                    return Err(state.abort(label, e.wrap_err("Failed to write records")));
                }
            }
        }

        // A partially consumed page keeps its own position
        if !truncated {
            if let Err(e) = state.cursor.advance(next_cursor) {
                return Err(state.abort(label, e));
            }
        }
        state.rate.on_success();
        log::debug!(
            "Page of {} record(s) from {}, lag {:?}",
            received,
            label,
            millis_behind
        );

        if state.limit_reached(mode) {
            return Ok(Step::Stop(EndReason::LimitReached));
        }

        let exhausted = state.cursor.is_exhausted();
        let step = match (exhausted || caught_up, mode.follows()) {
            (false, _) => Step::Wait(state.rate.delay_before_next_call()),
            (true, false) => Step::Stop(EndReason::Exhausted),
            (true, true) if exhausted => Step::Stop(EndReason::ShardClosed),
            (true, true) => {
                log::debug!(
                    "{} caught up, polling again in {:?}",
                    label,
                    self.options.idle_interval
                );
                Step::Wait(self.options.idle_interval)
            }
        };
        Ok(step)
    }

    /// Sleep for `delay`; returns false if cancelled first
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
