//! Agent-side metric state shared by the collectors and the reporter.

use std::collections::HashMap;

use dashmap::DashMap;
use metrics_model::{MetricRecord, POLL_COUNT, RANDOM_VALUE};
use parking_lot::Mutex;

/// Values gathered by the runtime collector since the last report.
#[derive(Debug, Default)]
struct WorkingSet {
    gauges: HashMap<String, f64>,
    poll_count: i64,
}

/// One report's worth of records.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub records: Vec<MetricRecord>,
    /// `PollCount` delta carried by this batch, re-added if delivery fails.
    pub poll_count: i64,
}

/// Shared agent state.
///
/// The working set sits behind a single mutex which is held only while
/// values are written, drained or compensated. Host statistics live in a
/// separate concurrent map and only meet the working set in [`take_batch`].
///
/// [`take_batch`]: AgentState::take_batch
#[derive(Debug, Default)]
pub struct AgentState {
    working: Mutex<WorkingSet>,
    host: DashMap<String, f64>,
}

impl AgentState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one runtime sample: overwrite its gauges, refresh
    /// `RandomValue` and count the sample.
    pub fn record_sample<I>(&self, gauges: I, random_value: f64)
    where
        I: IntoIterator<Item = (&'static str, f64)>,
    {
        let mut working = self.working.lock();
        for (name, value) in gauges {
            working.gauges.insert(name.to_string(), value);
        }
        working.gauges.insert(RANDOM_VALUE.to_string(), random_value);
        working.poll_count += 1;
    }

    pub fn record_host(&self, stats: Vec<(String, f64)>) {
        for (name, value) in stats {
            self.host.insert(name, value);
        }
    }

    /// Snapshot everything for delivery and reset `PollCount` in the same
    /// critical section.
    pub fn take_batch(&self) -> Batch {
        let (mut records, poll_count) = {
            let mut working = self.working.lock();
            let poll_count = std::mem::take(&mut working.poll_count);
            let mut records: Vec<MetricRecord> = working
                .gauges
                .iter()
                .map(|(name, value)| MetricRecord::gauge(name.clone(), *value))
                .collect();
            records.push(MetricRecord::counter(POLL_COUNT, poll_count));
            (records, poll_count)
        };

        records.extend(
            self.host
                .iter()
                .map(|entry| MetricRecord::gauge(entry.key().clone(), *entry.value())),
        );

        Batch {
            records,
            poll_count,
        }
    }

    /// Re-add the `PollCount` delta of a batch that could not be delivered.
    pub fn compensate(&self, poll_count: i64) {
        if poll_count == 0 {
            return;
        }
        let mut working = self.working.lock();
        working.poll_count = working.poll_count.wrapping_add(poll_count);
    }

    /// Samples counted since the last batch was taken.
    pub fn poll_count(&self) -> i64 {
        self.working.lock().poll_count
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.working.lock().gauges.get(name).copied()
    }
}
