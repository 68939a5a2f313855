use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Named tallies. Keys that were never incremented read as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Counter(BTreeMap<String, u64>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A counter with every key in `keys` present at zero.
    pub fn with_keys(keys: &[&str]) -> Self {
        Self(keys.iter().map(|key| (key.to_string(), 0)).collect())
    }

    pub fn incr(&mut self, key: &str) {
        self.add(key, 1);
    }

    pub fn add(&mut self, key: &str, amount: u64) {
        *self.0.entry(key.to_string()).or_insert(0) += amount;
    }

    pub fn set(&mut self, key: &str, value: u64) {
        self.0.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> u64 {
        self.0.get(key).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(key, value)| (key.as_str(), *value))
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}
