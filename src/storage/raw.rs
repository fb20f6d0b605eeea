//! Raw passthrough sink
//!
//! Writes each record's native bytes on its own line without re-parsing.

use super::OutputHandle;
use crate::etl::Loader;

use async_trait::async_trait;
use eyre::Result;

/// Writes payload bytes followed by a newline
pub struct RawSink {
    output: OutputHandle,
}

impl RawSink {
    pub fn new(output: OutputHandle) -> Self {
        Self { output }
    }
}

#[async_trait]
impl Loader for RawSink {
    type Item = Vec<u8>;

    async fn load(&self, items: Vec<Self::Item>) -> Result<usize> {
        self.output.write_lines(items).await
    }
}
