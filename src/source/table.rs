//! Table scan fetcher
//!
//! Reads a table page by page via the `Scan` operation, continuing from
//! each response's `LastEvaluatedKey`.

use crate::client::AwsJsonClient;
use crate::etl::{Cursor, FetchRequest, FetchResult, Page, PageFetcher, StartPosition};
use crate::record::RawRecord;

use eyre::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value, json};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ScanOutput {
    #[serde(default)]
    items: Vec<Map<String, Value>>,
    last_evaluated_key: Option<Map<String, Value>>,
}

/// Fetcher for full table scans
///
/// # Example
/// ```no_run
/// use store_dump::client::{Auth, AwsJsonClient, Protocol};
/// use store_dump::etl::{Cursor, FetchRequest, PageFetcher};
/// use store_dump::source::TableFetcher;
/// use url::Url;
///
/// # async fn example() -> eyre::Result<()> {
/// let url = Url::parse("http://localhost:8000")?;
/// let client = AwsJsonClient::try_new(url, Auth::None, Protocol::DynamoDb)?;
/// let fetcher = TableFetcher::new(client, "users");
/// let first = fetcher
///     .fetch(&FetchRequest { cursor: Cursor::table_start("users"), page_size_hint: Some(25) })
///     .await;
/// # Ok(())
/// # }
/// ```
pub struct TableFetcher {
    client: AwsJsonClient,
    table: String,
}

impl TableFetcher {
    pub fn new(client: AwsJsonClient, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Build the Scan request body for `request`
    fn scan_request(&self, request: &FetchRequest) -> Result<Value> {
        let start_key = match &request.cursor {
            Cursor::Offset { table, start_key } if *table == self.table => start_key,
            other => eyre::bail!("Cursor {} does not belong to table {}", other, self.table),
        };

        let mut body = json!({ "TableName": self.table });
        if let Some(limit) = request.page_size_hint {
            body["Limit"] = json!(limit.max(1));
        }
        if let Some(key) = start_key {
            body["ExclusiveStartKey"] = Value::Object(key.clone());
        }
        Ok(body)
    }

    fn parse_page(&self, response: Value) -> Result<Page> {
        let output: ScanOutput = serde_json::from_value(response)
            .with_context(|| format!("Unexpected Scan response for table {}", self.table))?;

        let next_cursor = output
            .last_evaluated_key
            .filter(|key| !key.is_empty())
            .map(|key| Cursor::Offset {
                table: self.table.clone(),
                start_key: Some(key),
            });

        Ok(Page {
            records: output.items.into_iter().map(RawRecord::Item).collect(),
            next_cursor,
            caught_up: false,
            millis_behind: None,
        })
    }
}

impl PageFetcher for TableFetcher {
    async fn seed(&self, start: &StartPosition) -> Result<Cursor> {
        match start {
            StartPosition::Beginning => Ok(Cursor::table_start(&self.table)),
            StartPosition::AtTimestamp(at) => eyre::bail!(
                "Table {} can only be scanned from the beginning, not from {}",
                self.table,
                at
            ),
        }
    }

    async fn fetch(&self, request: &FetchRequest) -> FetchResult {
        let body = match self.scan_request(request) {
            Ok(body) => body,
            Err(e) => return FetchResult::Fatal(e),
        };

        match self.client.call("Scan", &body).await {
            Ok(response) => match self.parse_page(response) {
                Ok(page) => FetchResult::Data(page),
                Err(e) => FetchResult::Fatal(e),
            },
            Err(e) => FetchResult::from_error(e),
        }
    }
}
