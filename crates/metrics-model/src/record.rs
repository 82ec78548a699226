//! The JSON metric record exchanged between agent and collector.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Kind of a metric.
///
/// Unrecognized kinds deserialize to [`MetricType::Unknown`] instead of
/// failing, so a batch containing one bad record can still be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// Last-write-wins absolute value.
    Gauge,
    /// Accumulating delta.
    Counter,
    #[default]
    #[serde(other)]
    Unknown,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Gauge => "gauge",
            MetricType::Counter => "counter",
            MetricType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricType::Gauge),
            "counter" => Ok(MetricType::Counter),
            other => Err(Error::InvalidType(other.to_string())),
        }
    }
}

/// A single metric as carried on the wire.
///
/// Exactly one of `value` (gauge) or `delta` (counter) is meaningful,
/// selected by `mtype`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MetricRecord {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub mtype: MetricType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

/// A validated, typed view of a [`MetricRecord`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricUpdate<'a> {
    Gauge { id: &'a str, value: f64 },
    Counter { id: &'a str, delta: i64 },
}

impl MetricRecord {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            mtype: MetricType::Gauge,
            delta: None,
            value: Some(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            mtype: MetricType::Counter,
            delta: Some(delta),
            value: None,
        }
    }

    /// Query form of a record: id and kind, no payload.
    pub fn query(id: impl Into<String>, mtype: MetricType) -> Self {
        Self {
            id: id.into(),
            mtype,
            delta: None,
            value: None,
        }
    }

    /// Resolve the record into the update it describes.
    ///
    /// Returns `None` for an empty id, an unknown kind, a record missing the
    /// field its kind requires, or a gauge whose value is not finite.
    pub fn update(&self) -> Option<MetricUpdate<'_>> {
        if self.id.is_empty() {
            return None;
        }
        match self.mtype {
            MetricType::Gauge => self
                .value
                .filter(|value| value.is_finite())
                .map(|value| MetricUpdate::Gauge {
                    id: &self.id,
                    value,
                }),
            MetricType::Counter => self.delta.map(|delta| MetricUpdate::Counter {
                id: &self.id,
                delta,
            }),
            MetricType::Unknown => None,
        }
    }
}
