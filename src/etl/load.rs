//! Loader trait for delivering records to a sink

use async_trait::async_trait;
use eyre::Result;

/// Records a failed load delivered before it failed.
///
/// Loaders attach it with `wrap_err` so the extraction loop can count
/// them; recover it with `report.downcast_ref::<PartialLoad>()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("output failed after {delivered} record(s) of the page")]
pub struct PartialLoad {
    pub delivered: usize,
}

/// Loader trait for writing records to a destination
///
/// Each call receives one page worth of records in emission order.
/// Implementors must write them as a unit so concurrent runs sharing
/// the same destination never interleave partial records.
///
/// # Example
/// ```no_run
/// use store_dump::etl::Loader;
/// use async_trait::async_trait;
/// use eyre::Result;
///
/// struct CountingLoader;
///
/// #[async_trait]
/// impl Loader for CountingLoader {
///     type Item = String;
///
///     async fn load(&self, items: Vec<Self::Item>) -> Result<usize> {
///         Ok(items.len())
///     }
/// }
/// ```
#[async_trait]
pub trait Loader: Send + Sync {
    /// The type of items to load
    type Item: Send;

    /// Load items to the destination
    ///
    /// Returns the number of items successfully delivered
    ///
    /// # Errors
    /// Returns an error if the destination rejects the write. When some
    /// items were already delivered the error carries a [`PartialLoad`].
    async fn load(&self, items: Vec<Self::Item>) -> Result<usize>;
}
