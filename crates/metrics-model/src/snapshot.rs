use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Point-in-time copy of every gauge and counter.
///
/// Serializes as `{"Gauge": {...}, "Counter": {...}}`, which is also the
/// layout of the persisted dump file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "Gauge", default)]
    pub gauges: HashMap<String, f64>,
    #[serde(rename = "Counter", default)]
    pub counters: HashMap<String, i64>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty() && self.counters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.gauges.len() + self.counters.len()
    }

    pub fn to_json(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(data: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}
