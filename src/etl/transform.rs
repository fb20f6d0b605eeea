//! Transformer trait for record transformation

use eyre::Result;

/// Transformer trait for turning one record into another
///
/// Implementors define a single record conversion:
/// - Wire decoding (raw backend records into portable values)
/// - Payload unwrapping (nested encoded documents)
/// - Passthrough of raw bytes
///
/// An error is scoped to the record being transformed; callers decide
/// whether it aborts anything beyond that record.
///
/// # Example
/// ```
/// use store_dump::etl::Transformer;
/// use eyre::Result;
///
/// struct Lowercase;
///
/// impl Transformer for Lowercase {
///     type Input = String;
///     type Output = String;
///
///     fn transform(&self, input: Self::Input) -> Result<Self::Output> {
///         Ok(input.to_lowercase())
///     }
/// }
///
/// assert_eq!(Lowercase.transform("ABC".to_string()).unwrap(), "abc");
/// ```
pub trait Transformer: Send + Sync {
    /// Input item type
    type Input: Send;

    /// Output item type after transformation
    type Output: Send;

    /// Transform a single item
    ///
    /// # Errors
    /// Returns an error if the item cannot be transformed
    fn transform(&self, input: Self::Input) -> Result<Self::Output>;
}

impl<I: Send, O: Send> Transformer for Box<dyn Transformer<Input = I, Output = O>> {
    type Input = I;
    type Output = O;

    fn transform(&self, input: Self::Input) -> Result<Self::Output> {
        (**self).transform(input)
    }
}
