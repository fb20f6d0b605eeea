//! Post-decode transforms
//!
//! Per-source transforms applied to records after wire decoding, and the
//! registry that selects them by source identifier.

mod payload;
mod registry;

pub use payload::{PayloadEncoding, PayloadUnwrapper};
pub use registry::{TransformChain, TransformRegistry, ValueTransformer};
