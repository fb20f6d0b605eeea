//! Stream shard fetcher
//!
//! Resolves a single shard of a stream to a shard iterator and reads it
//! with `GetRecords`, replacing the iterator after every call.

use crate::client::AwsJsonClient;
use crate::etl::{Cursor, FetchRequest, FetchResult, Page, PageFetcher, StartPosition};
use crate::record::{RawRecord, StreamRecord};

use eyre::{Context, Result};
use owo_colors::OwoColorize;
use serde::Deserialize;
use serde_json::{Number, Value, json};

/// Largest page `GetRecords` accepts
const MAX_RECORDS_PER_CALL: u64 = 10_000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListShardsOutput {
    #[serde(default)]
    shards: Vec<ShardDescription>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ShardDescription {
    shard_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetShardIteratorOutput {
    shard_iterator: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetRecordsOutput {
    #[serde(default)]
    records: Vec<WireRecord>,
    next_shard_iterator: Option<String>,
    millis_behind_latest: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireRecord {
    data: String,
    partition_key: String,
    sequence_number: String,
    approximate_arrival_timestamp: Option<Number>,
}

impl From<WireRecord> for StreamRecord {
    fn from(wire: WireRecord) -> Self {
        Self {
            sequence_number: wire.sequence_number,
            partition_key: wire.partition_key,
            approximate_arrival: wire.approximate_arrival_timestamp,
            data: wire.data,
        }
    }
}

/// Fetcher for one shard of a stream
///
/// Only single-shard reading is supported: the shard is either named
/// explicitly or must be the only shard of the stream.
pub struct StreamFetcher {
    client: AwsJsonClient,
    stream: String,
    shard: Option<String>,
}

impl StreamFetcher {
    pub fn new(client: AwsJsonClient, stream: impl Into<String>) -> Self {
        Self {
            client,
            stream: stream.into(),
            shard: None,
        }
    }

    /// Read this shard instead of requiring a single-shard stream
    pub fn with_shard(mut self, shard: Option<String>) -> Self {
        self.shard = shard;
        self
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// List the shard ids of the stream, following `NextToken`
    pub async fn list_shards(&self) -> Result<Vec<String>> {
        let mut shards = Vec::new();
        let mut body = json!({ "StreamName": self.stream });

        loop {
            let response = self
                .client
                .call("ListShards", &body)
                .await
                .with_context(|| format!("Failed to list shards of stream {}", self.stream))?;
            let output: ListShardsOutput = serde_json::from_value(response)
                .with_context(|| format!("Unexpected ListShards response for {}", self.stream))?;

            shards.extend(output.shards.into_iter().map(|s| s.shard_id));
            match output.next_token {
                Some(token) => body = json!({ "NextToken": token }),
                None => break,
            }
        }

        log::debug!("Stream {} has {} shard(s)", self.stream, shards.len());
        Ok(shards)
    }

    /// Pick the shard to read from the listed shard ids
    pub fn select_shard(&self, shards: &[String]) -> Result<String> {
        match (&self.shard, shards) {
            (Some(wanted), _) if shards.contains(wanted) => Ok(wanted.clone()),
            (Some(wanted), _) => eyre::bail!(
                "Shard {} not found in stream {}. Available shards: {}",
                wanted,
                self.stream,
                shards.join(", ")
            ),
            (None, [only]) => Ok(only.clone()),
            (None, []) => eyre::bail!("Stream {} has no shards", self.stream),
            (None, _) => eyre::bail!(
                "Stream {} has {} shards; reading multiple shards is not supported, choose one of: {}",
                self.stream,
                shards.len(),
                shards.join(", ")
            ),
        }
    }

    fn iterator_request(&self, shard_id: &str, start: &StartPosition) -> Value {
        match start {
            StartPosition::Beginning => json!({
                "StreamName": self.stream,
                "ShardId": shard_id,
                "ShardIteratorType": "TRIM_HORIZON",
            }),
            StartPosition::AtTimestamp(at) => json!({
                "StreamName": self.stream,
                "ShardId": shard_id,
                "ShardIteratorType": "AT_TIMESTAMP",
                "Timestamp": at.timestamp_millis() as f64 / 1000.0,
            }),
        }
    }

    /// Build the GetRecords body, returning it with the cursor's shard id
    fn records_request<'a>(&self, request: &'a FetchRequest) -> Result<(Value, &'a str)> {
        let (shard_id, iterator) = match &request.cursor {
            Cursor::Shard {
                stream,
                shard_id,
                iterator,
            } if *stream == self.stream => (shard_id, iterator),
            other => eyre::bail!("Cursor {} does not belong to stream {}", other, self.stream),
        };

        let mut body = json!({ "ShardIterator": iterator });
        if let Some(limit) = request.page_size_hint {
            body["Limit"] = json!(limit.clamp(1, MAX_RECORDS_PER_CALL));
        }
        Ok((body, shard_id))
    }

    fn parse_page(&self, shard_id: &str, response: Value) -> Result<Page> {
        let output: GetRecordsOutput = serde_json::from_value(response)
            .with_context(|| format!("Unexpected GetRecords response for {}", self.stream))?;

        let caught_up =
            output.records.is_empty() && output.millis_behind_latest.is_none_or(|lag| lag == 0);
        let next_cursor = output.next_shard_iterator.map(|iterator| Cursor::Shard {
            stream: self.stream.clone(),
            shard_id: shard_id.to_string(),
            iterator,
        });

        Ok(Page {
            records: output
                .records
                .into_iter()
                .map(|r| RawRecord::Stream(r.into()))
                .collect(),
            next_cursor,
            caught_up,
            millis_behind: output.millis_behind_latest,
        })
    }
}

impl PageFetcher for StreamFetcher {
    async fn seed(&self, start: &StartPosition) -> Result<Cursor> {
        let shards = self.list_shards().await?;
        let shard_id = self.select_shard(&shards)?;

        let response = self
            .client
            .call("GetShardIterator", &self.iterator_request(&shard_id, start))
            .await
            .with_context(|| format!("Failed to get iterator for shard {}", shard_id))?;
        let output: GetShardIteratorOutput = serde_json::from_value(response)
            .with_context(|| format!("Unexpected GetShardIterator response for {}", shard_id))?;

        log::info!(
            "Reading {} shard {} from {}",
            self.stream.cyan(),
            shard_id.bright_black(),
            match start {
                StartPosition::Beginning => "the beginning".to_string(),
                StartPosition::AtTimestamp(at) => at.to_rfc3339(),
            }
        );

        Ok(Cursor::Shard {
            stream: self.stream.clone(),
            shard_id,
            iterator: output.shard_iterator,
        })
    }

    async fn fetch(&self, request: &FetchRequest) -> FetchResult {
        let (body, shard_id) = match self.records_request(request) {
            Ok(built) => built,
            Err(e) => return FetchResult::Fatal(e),
        };

        match self.client.call("GetRecords", &body).await {
            Ok(response) => match self.parse_page(shard_id, response) {
                Ok(page) => FetchResult::Data(page),
                Err(e) => FetchResult::Fatal(e),
            },
            Err(e) => FetchResult::from_error(e),
        }
    }
}
