//! Integration tests for the extraction loop
//!
//! A scripted fetcher replays a fixed sequence of fetch outcomes while
//! tokio's clock is paused, so pacing, backoff and idle polling can be
//! asserted on exact virtual timestamps.

use async_trait::async_trait;
use eyre::Result;
use serde_json::{Map, Value, json};
use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use store_dump::etl::{
    Cursor, EndReason, ExtractionAborted, ExtractionLoop, FetchRequest, FetchResult, Loader,
    LoopOptions, Mode, Page, PageFetcher, StartPosition,
};
use store_dump::record::{DecodedRecord, RawRecord};
use store_dump::storage::{NdjsonSink, OutputHandle};
use store_dump::RecordDecoder;
use tempfile::NamedTempFile;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const BASE: Duration = Duration::from_secs(1);
const IDLE: Duration = Duration::from_secs(5);

/// Replays scripted outcomes and records every request it receives
struct ScriptedFetcher {
    start: Cursor,
    script: Mutex<VecDeque<FetchResult>>,
    calls: Mutex<Vec<(Instant, FetchRequest)>>,
    /// Cancelled once the script runs out, instead of panicking
    stop_when_done: Option<CancellationToken>,
}

impl ScriptedFetcher {
    fn new(start: Cursor, script: Vec<FetchResult>) -> Self {
        Self {
            start,
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
            stop_when_done: None,
        }
    }

    fn stop_when_done(mut self, token: CancellationToken) -> Self {
        self.stop_when_done = Some(token);
        self
    }

    fn cursors(&self) -> Vec<Cursor> {
        let calls = self.calls.lock().unwrap();
        calls.iter().map(|(_, r)| r.cursor.clone()).collect()
    }

    fn hints(&self) -> Vec<Option<u64>> {
        let calls = self.calls.lock().unwrap();
        calls.iter().map(|(_, r)| r.page_size_hint).collect()
    }

    fn gaps(&self) -> Vec<Duration> {
        let calls = self.calls.lock().unwrap();
        calls.windows(2).map(|w| w[1].0 - w[0].0).collect()
    }

    fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

impl PageFetcher for &ScriptedFetcher {
    async fn seed(&self, _start: &StartPosition) -> Result<Cursor> {
        Ok(self.start.clone())
    }

    async fn fetch(&self, request: &FetchRequest) -> FetchResult {
        self.calls
            .lock()
            .unwrap()
            .push((Instant::now(), request.clone()));

        let next = self.script.lock().unwrap().pop_front();
        match (next, &self.stop_when_done) {
            (Some(result), _) => result,
            (None, Some(token)) => {
                token.cancel();
                FetchResult::Data(Page {
                    next_cursor: Some(request.cursor.clone()),
                    caught_up: true,
                    ..Default::default()
                })
            }
            (None, None) => panic!("fetch after the script ended at {}", request.cursor),
        }
    }
}

/// Keeps every delivered record in memory
#[derive(Clone, Default)]
struct Collected(Arc<Mutex<Vec<DecodedRecord>>>);

impl Collected {
    fn sequence(&self) -> Vec<u64> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.value()["seq"].as_u64().unwrap())
            .collect()
    }
}

#[async_trait]
impl Loader for Collected {
    type Item = DecodedRecord;

    async fn load(&self, items: Vec<Self::Item>) -> Result<usize> {
        let count = items.len();
        self.0.lock().unwrap().extend(items);
        Ok(count)
    }
}

/// Accepts `max_lines` complete lines, then fails every write
#[derive(Clone)]
struct ClosingWriter {
    accepted: Arc<Mutex<Vec<u8>>>,
    max_lines: usize,
}

impl ClosingWriter {
    fn lines(&self) -> usize {
        self.accepted
            .lock()
            .unwrap()
            .iter()
            .filter(|&&b| b == b'\n')
            .count()
    }
}

impl Write for ClosingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.lines() >= self.max_lines {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "reader went away",
            ));
        }
        self.accepted.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn key(n: u32) -> Cursor {
    let mut start_key = Map::new();
    start_key.insert("id".to_string(), json!({"S": format!("k{}", n)}));
    Cursor::Offset {
        table: "orders".to_string(),
        start_key: Some(start_key),
    }
}

fn shard(n: u32) -> Cursor {
    Cursor::Shard {
        stream: "events".to_string(),
        shard_id: "shardId-000000000000".to_string(),
        iterator: format!("iterator-{}", n),
    }
}

/// Table items numbered `from..to`
fn items(from: u64, to: u64) -> Vec<RawRecord> {
    (from..to)
        .map(|n| {
            let mut item = Map::new();
            item.insert("seq".to_string(), json!({"N": n.to_string()}));
            RawRecord::Item(item)
        })
        .collect()
}

fn page(records: Vec<RawRecord>, next: Option<Cursor>) -> FetchResult {
    FetchResult::Data(Page {
        records,
        next_cursor: next,
        ..Default::default()
    })
}

fn caught_up(next: Cursor) -> FetchResult {
    FetchResult::Data(Page {
        next_cursor: Some(next),
        caught_up: true,
        millis_behind: Some(0),
        ..Default::default()
    })
}

fn options(label: &str, mode: Mode) -> LoopOptions {
    LoopOptions {
        base_delay: BASE,
        idle_interval: IDLE,
        ..LoopOptions::new(label, mode)
    }
}

fn extraction<'a>(
    fetcher: &'a ScriptedFetcher,
    sink: &Collected,
    options: LoopOptions,
) -> ExtractionLoop<&'a ScriptedFetcher, RecordDecoder, Collected> {
    ExtractionLoop::new(
        fetcher,
        RecordDecoder::new(options.label.clone()),
        sink.clone(),
        options,
    )
}

#[tokio::test(start_paused = true)]
async fn test_reads_pages_until_exhausted() {
    let fetcher = ScriptedFetcher::new(
        Cursor::table_start("orders"),
        vec![
            page(items(0, 3), Some(key(1))),
            page(items(3, 6), Some(key(2))),
            page(vec![], None),
        ],
    );
    let sink = Collected::default();

    let summary = extraction(&fetcher, &sink, options("orders", Mode::Unbounded))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.emitted, 6);
    assert_eq!(summary.fetches, 3);
    assert_eq!(summary.end, EndReason::Exhausted);
    assert_eq!(summary.cursor, key(2));
    assert_eq!(sink.sequence(), vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(
        fetcher.cursors(),
        vec![Cursor::table_start("orders"), key(1), key(2)]
    );
    assert!(fetcher.gaps().iter().all(|gap| *gap >= BASE));
}

#[tokio::test(start_paused = true)]
async fn test_throttled_fetch_retries_same_cursor_after_doubled_delay() {
    let fetcher = ScriptedFetcher::new(
        Cursor::table_start("orders"),
        vec![
            page(items(0, 3), Some(key(1))),
            FetchResult::Throttled("ProvisionedThroughputExceededException".to_string()),
            page(items(3, 5), None),
        ],
    );
    let sink = Collected::default();

    let summary = extraction(&fetcher, &sink, options("orders", Mode::Unbounded))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.emitted, 5);
    assert_eq!(summary.throttled, 1);
    assert_eq!(summary.end, EndReason::Exhausted);
    assert_eq!(sink.sequence(), vec![0, 1, 2, 3, 4]);
    assert_eq!(
        fetcher.cursors(),
        vec![Cursor::table_start("orders"), key(1), key(1)]
    );

    let gaps = fetcher.gaps();
    assert!(gaps[0] >= BASE);
    assert!(gaps[1] >= BASE * 2);
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_throttles_keep_doubling() {
    let fetcher = ScriptedFetcher::new(
        Cursor::table_start("orders"),
        vec![
            FetchResult::Throttled("ThrottlingException".to_string()),
            FetchResult::Throttled("ThrottlingException".to_string()),
            FetchResult::Throttled("ThrottlingException".to_string()),
            page(items(0, 1), Some(key(1))),
            page(vec![], None),
        ],
    );
    let sink = Collected::default();

    let summary = extraction(&fetcher, &sink, options("orders", Mode::Unbounded))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.throttled, 3);
    assert_eq!(summary.emitted, 1);

    let gaps = fetcher.gaps();
    assert!(gaps[0] >= BASE * 2);
    assert!(gaps[1] >= BASE * 4);
    assert!(gaps[2] >= BASE * 8);
    // No decay after success: pacing stays at the raised delay
    assert!(gaps[3] >= BASE * 8);
}

#[tokio::test(start_paused = true)]
async fn test_throttle_backoff_respects_ceiling() {
    let fetcher = ScriptedFetcher::new(
        Cursor::table_start("orders"),
        vec![
            FetchResult::Throttled("ThrottlingException".to_string()),
            FetchResult::Throttled("ThrottlingException".to_string()),
            FetchResult::Throttled("ThrottlingException".to_string()),
            page(vec![], None),
        ],
    );
    let sink = Collected::default();
    let options = LoopOptions {
        max_delay: Some(BASE * 3),
        ..options("orders", Mode::Unbounded)
    };

    extraction(&fetcher, &sink, options).run().await.unwrap();

    let gaps = fetcher.gaps();
    assert!(gaps[0] >= BASE * 2 && gaps[0] < BASE * 3);
    assert!(gaps[1] >= BASE * 3 && gaps[1] < BASE * 4);
    assert!(gaps[2] >= BASE * 3 && gaps[2] < BASE * 4);
}

#[tokio::test(start_paused = true)]
async fn test_bounded_run_stops_at_limit() {
    let fetcher = ScriptedFetcher::new(
        Cursor::table_start("orders"),
        vec![
            page(items(0, 3), Some(key(1))),
            page(items(3, 6), Some(key(2))),
            page(items(6, 9), Some(key(3))),
        ],
    );
    let sink = Collected::default();

    let summary = extraction(&fetcher, &sink, options("orders", Mode::Bounded(4)))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.emitted, 4);
    assert_eq!(summary.fetches, 2);
    assert_eq!(summary.end, EndReason::LimitReached);
    assert_eq!(sink.sequence(), vec![0, 1, 2, 3]);
    assert_eq!(fetcher.hints(), vec![Some(4), Some(1)]);
    assert_eq!(fetcher.remaining(), 1);
    // The partially consumed page keeps its own position
    assert_eq!(summary.cursor, key(1));
}

#[tokio::test(start_paused = true)]
async fn test_zero_limit_never_fetches() {
    let fetcher = ScriptedFetcher::new(
        Cursor::table_start("orders"),
        vec![page(items(0, 3), None)],
    );
    let sink = Collected::default();

    let summary = extraction(&fetcher, &sink, options("orders", Mode::Bounded(0)))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.emitted, 0);
    assert_eq!(summary.fetches, 0);
    assert_eq!(summary.end, EndReason::LimitReached);
    assert!(fetcher.cursors().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_limit_beyond_data_ends_at_exhaustion() {
    let fetcher = ScriptedFetcher::new(
        Cursor::table_start("orders"),
        vec![page(items(0, 3), None)],
    );
    let sink = Collected::default();

    let summary = extraction(&fetcher, &sink, options("orders", Mode::Bounded(100)))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.emitted, 3);
    assert_eq!(summary.end, EndReason::Exhausted);
}

#[tokio::test(start_paused = true)]
async fn test_follow_polls_at_idle_interval_then_resumes_pacing() {
    let cancel = CancellationToken::new();
    let fetcher =
        ScriptedFetcher::new(
            shard(0),
            vec![
                page(items(0, 3), Some(shard(1))),
                caught_up(shard(2)),
                page(items(3, 5), Some(shard(3))),
            ],
        )
        .stop_when_done(cancel.clone());
    let sink = Collected::default();

    let summary = extraction(
        &fetcher,
        &sink,
        options("events", Mode::Following { limit: None }),
    )
    .with_cancellation(cancel)
    .run()
    .await
    .unwrap();

    assert_eq!(summary.end, EndReason::Cancelled);
    assert_eq!(summary.emitted, 5);
    assert_eq!(sink.sequence(), vec![0, 1, 2, 3, 4]);
    assert_eq!(fetcher.cursors(), vec![shard(0), shard(1), shard(2), shard(3)]);

    let gaps = fetcher.gaps();
    assert!(gaps[0] >= BASE && gaps[0] < IDLE);
    assert!(gaps[1] >= IDLE);
    assert!(gaps[2] >= BASE && gaps[2] < IDLE);
}

#[tokio::test(start_paused = true)]
async fn test_follow_with_limit_stops_at_limit() {
    let fetcher = ScriptedFetcher::new(
        shard(0),
        vec![
            page(items(0, 3), Some(shard(1))),
            caught_up(shard(2)),
            page(items(3, 6), Some(shard(3))),
        ],
    );
    let sink = Collected::default();

    let summary = extraction(
        &fetcher,
        &sink,
        options("events", Mode::Following { limit: Some(4) }),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(summary.end, EndReason::LimitReached);
    assert_eq!(summary.emitted, 4);
    assert_eq!(summary.fetches, 3);
}

#[tokio::test(start_paused = true)]
async fn test_follow_ends_when_shard_closes() {
    let fetcher = ScriptedFetcher::new(
        shard(0),
        vec![page(items(0, 2), Some(shard(1))), page(vec![], None)],
    );
    let sink = Collected::default();

    let summary = extraction(
        &fetcher,
        &sink,
        options("events", Mode::Following { limit: None }),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(summary.end, EndReason::ShardClosed);
    assert_eq!(summary.emitted, 2);
    assert_eq!(summary.cursor, shard(1));
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_stream_stops_when_caught_up() {
    let fetcher = ScriptedFetcher::new(
        shard(0),
        vec![page(items(0, 2), Some(shard(1))), caught_up(shard(2))],
    );
    let sink = Collected::default();

    let summary = extraction(&fetcher, &sink, options("events", Mode::Unbounded))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.end, EndReason::Exhausted);
    assert_eq!(summary.emitted, 2);
    assert_eq!(summary.cursor, shard(2));
}

#[tokio::test(start_paused = true)]
async fn test_fatal_error_reports_progress() {
    let fetcher = ScriptedFetcher::new(
        Cursor::table_start("orders"),
        vec![
            page(items(0, 3), Some(key(1))),
            FetchResult::Fatal(eyre::eyre!("ResourceNotFoundException: table deleted")),
        ],
    );
    let sink = Collected::default();

    let error = extraction(&fetcher, &sink, options("orders", Mode::Unbounded))
        .run()
        .await
        .unwrap_err();

    let aborted = error
        .downcast_ref::<ExtractionAborted>()
        .expect("aborted context");
    assert_eq!(aborted.label, "orders");
    assert_eq!(aborted.emitted, 3);
    assert!(aborted.cursor.contains("k1"));
    assert!(format!("{:?}", error).contains("table deleted"));
    assert_eq!(sink.sequence(), vec![0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_first_fetch() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let fetcher = ScriptedFetcher::new(
        Cursor::table_start("orders"),
        vec![page(items(0, 3), None)],
    );
    let sink = Collected::default();

    let summary = extraction(&fetcher, &sink, options("orders", Mode::Unbounded))
        .with_cancellation(cancel)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.end, EndReason::Cancelled);
    assert_eq!(summary.fetches, 0);
    assert_eq!(summary.emitted, 0);
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_record_is_skipped() {
    let mut broken = Map::new();
    broken.insert("seq".to_string(), json!({"Q": "1"}));

    let mut records = items(0, 1);
    records.push(RawRecord::Item(broken));
    records.extend(items(1, 2));

    let fetcher = ScriptedFetcher::new(
        Cursor::table_start("orders"),
        vec![page(records, None)],
    );
    let sink = Collected::default();

    let summary = extraction(&fetcher, &sink, options("orders", Mode::Unbounded))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.emitted, 2);
    assert_eq!(summary.decode_errors, 1);
    assert_eq!(summary.end, EndReason::Exhausted);
    assert_eq!(sink.sequence(), vec![0, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_decimal_values_keep_their_digits() {
    let item: Value = json!({
        "price": {"N": "10.20"},
        "tiny": {"N": "0.0000001"},
        "huge": {"N": "123456789012345678901234567890.5"}
    });
    let fetcher = ScriptedFetcher::new(
        Cursor::table_start("prices"),
        vec![page(
            vec![RawRecord::Item(item.as_object().unwrap().clone())],
            None,
        )],
    );
    let output = NamedTempFile::new().unwrap();
    let sink = NdjsonSink::new(OutputHandle::create(output.path()).unwrap());

    ExtractionLoop::new(
        &fetcher,
        RecordDecoder::new("prices"),
        sink,
        options("prices", Mode::Unbounded),
    )
    .run()
    .await
    .unwrap();

    let content = std::fs::read_to_string(output.path()).unwrap();
    assert_eq!(content.lines().count(), 1);
    assert!(content.contains("\"price\":10.20"));
    assert!(content.contains("\"tiny\":0.0000001"));
    assert!(content.contains("\"huge\":123456789012345678901234567890.5"));
}

#[tokio::test(start_paused = true)]
async fn test_sink_failure_mid_page_counts_delivered_records() {
    let fetcher = ScriptedFetcher::new(
        Cursor::table_start("orders"),
        vec![
            page(items(0, 2), Some(key(1))),
            page(items(2, 5), Some(key(2))),
        ],
    );
    let writer = ClosingWriter {
        accepted: Arc::default(),
        max_lines: 3,
    };
    let sink = NdjsonSink::new(OutputHandle::new(writer.clone()));

    let error = ExtractionLoop::new(
        &fetcher,
        RecordDecoder::new("orders"),
        sink,
        options("orders", Mode::Unbounded),
    )
    .run()
    .await
    .unwrap_err();

    let aborted = error
        .downcast_ref::<ExtractionAborted>()
        .expect("aborted context");
    assert_eq!(writer.lines(), 3);
    assert_eq!(aborted.emitted, 3);
    // The failed page is not confirmed
    assert!(aborted.cursor.contains("k1"));
    assert!(format!("{:?}", error).contains("reader went away"));
}
