//! NDJSON (Newline Delimited JSON) sink for decoded records

use super::OutputHandle;
use crate::etl::Loader;
use crate::record::DecodedRecord;

use async_trait::async_trait;
use eyre::{Context, Result};

/// Writes each decoded record as one line of JSON
pub struct NdjsonSink {
    output: OutputHandle,
}

impl NdjsonSink {
    pub fn new(output: OutputHandle) -> Self {
        Self { output }
    }
}

#[async_trait]
impl Loader for NdjsonSink {
    type Item = DecodedRecord;

    async fn load(&self, items: Vec<Self::Item>) -> Result<usize> {
        let lines = items
            .iter()
            .map(DecodedRecord::to_line)
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| "Failed to serialize record")?;

        self.output.write_lines(lines).await
    }
}
