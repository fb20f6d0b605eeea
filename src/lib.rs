//! Store Dump
//!
//! Cursor-driven extraction of hosted tables and event streams through
//! paginated, rate-limited query APIs.

pub mod cli;
pub mod client;
pub mod config;
pub mod decode;
pub mod etl;
pub mod record;
pub mod source;
pub mod storage;
pub mod transform;

// Re-exports for convenience
pub use client::{Auth, AwsJsonClient, Protocol, ServiceError};
pub use config::{OutputMode, RunParams, Settings, SourceKind, StartSpec};
pub use decode::{DecodeError, RawPassthrough, RecordDecoder};
pub use etl::{
    Cursor, CursorStore, EndReason, ExtractionAborted, ExtractionLoop, FetchRequest, FetchResult,
    Loader, LoopOptions, Mode, Page, PageFetcher, RateController, RunSummary, StartPosition,
    Transformer,
};
pub use record::{DecodedRecord, RawRecord, StreamRecord};
pub use source::{StreamFetcher, TableFetcher};
pub use storage::{NdjsonSink, OutputHandle, RawSink};
pub use transform::{PayloadUnwrapper, TransformChain, TransformRegistry};
