//! The merged outcome of a fan-out.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

/// Values fetched for one aggregate, in fetcher registration order.
///
/// Only ever handed out fully populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationResult {
    fields: Vec<(String, String)>,
}

impl AggregationResult {
    pub(crate) const fn new(fields: Vec<(String, String)>) -> Self {
        Self { fields }
    }

    /// Returns the value fetched for `field`.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.as_str())
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates `(field, value)` pairs in registration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Converts into a map keyed by field name.
    #[must_use]
    pub fn into_map(self) -> HashMap<String, String> {
        self.fields.into_iter().collect()
    }
}

/// Renders the values joined with `" | "`.
impl fmt::Display for AggregationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (_, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            f.write_str(value)?;
        }
        Ok(())
    }
}

impl Serialize for AggregationResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (field, value) in &self.fields {
            map.serialize_entry(field, value)?;
        }
        map.end()
    }
}
