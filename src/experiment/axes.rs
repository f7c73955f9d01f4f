//! Axis name → value maps.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Mapping from axis name to target value.
///
/// Names are case-insensitive and stored upper-case, so `"s1hg"` and `"S1HG"`
/// are the same key. Iteration is in sorted key order; moves built from the map
/// are issued in that order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, f64>")]
pub struct AxisValueMap(BTreeMap<String, f64>);

impl AxisValueMap {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value, returning the previous one.
    pub fn insert(&mut self, name: impl AsRef<str>, value: f64) -> Option<f64> {
        self.0.insert(name.as_ref().to_uppercase(), value)
    }

    /// Value for `name`, any case.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(&name.to_uppercase()).copied()
    }

    /// Whether `name` is present, any case.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_uppercase())
    }

    /// Number of axes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no axis is set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries in axis-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Values in axis-name order.
    pub fn values(&self) -> Vec<f64> {
        self.0.values().copied().collect()
    }

    /// Fill in entries from `defaults` that this map does not already have.
    pub fn with_defaults(mut self, defaults: &AxisValueMap) -> Self {
        for (name, value) in defaults.iter() {
            self.0.entry(name.to_string()).or_insert(value);
        }
        self
    }
}

impl From<BTreeMap<String, f64>> for AxisValueMap {
    fn from(map: BTreeMap<String, f64>) -> Self {
        map.into_iter().collect()
    }
}

impl<K: AsRef<str>> FromIterator<(K, f64)> for AxisValueMap {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (name, value) in iter {
            map.insert(name, value);
        }
        map
    }
}

impl fmt::Display for AxisValueMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = self.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{{{}}}", entries.join(", "))
    }
}
