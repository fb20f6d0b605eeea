//! Core extraction abstractions
//!
//! This module provides the pieces of the cursor-based extraction engine:
//! fetching pages, tracking the continuation cursor, pacing requests,
//! transforming records and loading them into a sink.

mod cursor;
mod extraction;
mod fetch;
mod load;
mod rate;
mod transform;

pub use cursor::{Cursor, CursorStore, StartPosition};
pub use extraction::{EndReason, ExtractionAborted, ExtractionLoop, LoopOptions, Mode, RunSummary};
pub use fetch::{FetchRequest, FetchResult, Page, PageFetcher};
pub use load::{Loader, PartialLoad};
pub use rate::RateController;
pub use transform::Transformer;
