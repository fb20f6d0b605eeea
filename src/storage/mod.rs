//! Output sinks
//!
//! This module handles delivering extracted records:
//! - A shared output handle serializing writes from concurrent runs
//! - NDJSON lines for decoded records
//! - Raw passthrough of native payload bytes

mod ndjson;
mod output;
mod raw;

pub use ndjson::NdjsonSink;
pub use output::OutputHandle;
pub use raw::RawSink;
