//! Shared, serialized output destination

use crate::etl::PartialLoad;

use eyre::{Context, Report, Result, eyre};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Cloneable handle to one output destination.
///
/// Every call to [`OutputHandle::write_lines`] holds the lock for the
/// whole batch, so lines from concurrent runs never interleave. Writes
/// run on the blocking pool, so a slow reader never stalls the async
/// workers driving other runs.
#[derive(Clone)]
pub struct OutputHandle {
    writer: SharedWriter,
}

impl OutputHandle {
    /// Wrap any writer
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Write to standard output
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    /// Create (or truncate) a file and write to it
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create output file: {}", path.display()))?;
        Ok(Self::new(BufWriter::new(file)))
    }

    /// Write each line followed by a newline, then flush.
    ///
    /// Returns the number of lines written. A failed write carries a
    /// [`PartialLoad`] counting the lines written before it.
    pub async fn write_lines(&self, lines: Vec<Vec<u8>>) -> Result<usize> {
        let output = self.clone();
        tokio::task::spawn_blocking(move || output.write_lines_blocking(&lines))
            .await
            .wrap_err("Output writer task panicked")?
    }

    fn write_lines_blocking(&self, lines: &[Vec<u8>]) -> Result<usize> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| eyre!("Output writer lock poisoned"))?;

        let mut written = 0;
        for line in lines {
            let result = writer
                .write_all(line)
                .and_then(|()| writer.write_all(b"\n"));
            if let Err(e) = result {
                return Err(Report::new(e).wrap_err(PartialLoad { delivered: written }));
            }
            written += 1;
        }
        if let Err(e) = writer.flush() {
            return Err(Report::new(e)
                .wrap_err("Failed to flush output")
                .wrap_err(PartialLoad { delivered: written }));
        }
        Ok(written)
    }
}

impl std::fmt::Debug for OutputHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputHandle").finish_non_exhaustive()
    }
}
