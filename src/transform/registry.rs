//! Transform registry keyed by source identifier

use super::PayloadUnwrapper;
use crate::etl::Transformer;

use eyre::Result;
use serde_json::Value;
use std::collections::HashMap;

/// A boxed post-decode transform
pub type ValueTransformer = Box<dyn Transformer<Input = Value, Output = Value>>;

/// Ordered list of transforms applied one after another
#[derive(Default)]
pub struct TransformChain {
    steps: Vec<ValueTransformer>,
}

impl TransformChain {
    pub fn new(steps: Vec<ValueTransformer>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Transformer for TransformChain {
    type Input = Value;
    type Output = Value;

    fn transform(&self, input: Self::Input) -> Result<Self::Output> {
        self.steps
            .iter()
            .try_fold(input, |value, step| step.transform(value))
    }
}

/// Maps source identifiers to the names of the transforms they need.
///
/// Transform names are `base64-json` or `json-string`, optionally
/// followed by `:FIELD` (the field defaults to `Data`).
///
/// # Example
/// ```
/// use store_dump::transform::TransformRegistry;
///
/// let mut registry = TransformRegistry::new();
/// registry.register("fbt-event", vec!["base64-json".to_string()]).unwrap();
///
/// let chain = registry.chain_for("fbt-event", &[]).unwrap();
/// assert_eq!(chain.len(), 1);
/// assert!(registry.chain_for("other", &[]).unwrap().is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct TransformRegistry {
    sources: HashMap<String, Vec<String>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a source -> transform names map
    ///
    /// # Errors
    /// Returns an error if any transform name is unknown
    pub fn from_map(map: HashMap<String, Vec<String>>) -> Result<Self> {
        let mut registry = Self::new();
        for (source, names) in map {
            registry.register(source, names)?;
        }
        Ok(registry)
    }

    /// Register the transforms for a source, replacing earlier ones
    pub fn register(&mut self, source: impl Into<String>, names: Vec<String>) -> Result<()> {
        for name in &names {
            Self::build(name)?;
        }
        self.sources.insert(source.into(), names);
        Ok(())
    }

    /// Transform names registered for a source
    pub fn names_for(&self, source: &str) -> &[String] {
        self.sources.get(source).map(Vec::as_slice).unwrap_or_default()
    }

    /// Chain of the registered transforms for `source` followed by `extra`
    pub fn chain_for(&self, source: &str, extra: &[String]) -> Result<TransformChain> {
        let steps = self
            .names_for(source)
            .iter()
            .chain(extra)
            .map(|name| Self::build(name))
            .collect::<Result<Vec<_>>>()?;
        if !steps.is_empty() {
            log::debug!("Using {} transform(s) for {}", steps.len(), source);
        }
        Ok(TransformChain::new(steps))
    }

    /// Instantiate a transform from its name
    pub fn build(name: &str) -> Result<ValueTransformer> {
        let (kind, field) = match name.split_once(':') {
            Some((kind, field)) if !field.is_empty() => (kind, field),
            Some((kind, _)) => (kind, "Data"),
            None => (name, "Data"),
        };
        match kind {
            "base64-json" => Ok(Box::new(PayloadUnwrapper::base64_json(field))),
            "json-string" => Ok(Box::new(PayloadUnwrapper::json_string(field))),
            other => eyre::bail!(
                "Unknown transform '{}'. Available transforms: base64-json, json-string",
                other
            ),
        }
    }
}
