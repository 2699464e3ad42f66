use crate::reading::Reading;
use crate::sensors::SensorKind;
use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::info;

pub const STATISTICS_SOURCE: &str = "aquawiz";

/// Describes one long-term statistic series, one per sensor per device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticMetadata {
    pub source: String,
    pub statistic_id: String,
    pub name: String,
    pub unit_of_measurement: String,
    pub has_mean: bool,
    pub has_sum: bool,
}

impl StatisticMetadata {
    pub fn for_sensor(device_id: &str, kind: SensorKind) -> Self {
        Self {
            source: STATISTICS_SOURCE.to_string(),
            statistic_id: format!("{STATISTICS_SOURCE}:{device_id}_{}", kind.key()),
            name: kind.name().to_string(),
            unit_of_measurement: kind.unit().to_string(),
            has_mean: true,
            has_sum: kind == SensorKind::Dosing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticPoint {
    pub start: DateTime<Utc>,
    pub mean: f64,
    pub sum: Option<f64>,
}

/// Splits readings into one series per sensor, keeping the reading order
pub fn build_statistics(
    device_id: &str,
    readings: &[Reading],
) -> Vec<(StatisticMetadata, Vec<StatisticPoint>)> {
    SensorKind::ALL
        .iter()
        .map(|kind| {
            let metadata = StatisticMetadata::for_sensor(device_id, *kind);
            let points = readings
                .iter()
                .map(|reading| {
                    let value = kind.value(reading).as_f64();
                    StatisticPoint {
                        start: reading.timestamp,
                        mean: value,
                        sum: metadata.has_sum.then_some(value),
                    }
                })
                .collect();
            (metadata, points)
        })
        .collect()
}

/// Where backfilled history goes. Importing the same (statistic, start) twice must overwrite.
pub trait HistorySink: Send {
    fn import_statistics(
        &mut self,
        metadata: &StatisticMetadata,
        points: &[StatisticPoint],
    ) -> anyhow::Result<()>;
}

// Lets the caller keep reading a sink after handing it to the coordinator
impl<S: HistorySink> HistorySink for Arc<Mutex<S>> {
    fn import_statistics(
        &mut self,
        metadata: &StatisticMetadata,
        points: &[StatisticPoint],
    ) -> anyhow::Result<()> {
        self.lock()
            .map_err(|_| anyhow::anyhow!("history store lock poisoned"))?
            .import_statistics(metadata, points)
    }
}

/// Keeps imported statistics in memory, keyed by statistic and start time
#[derive(Debug, Default)]
pub struct MemoryHistory {
    metadata: HashMap<String, StatisticMetadata>,
    points: HashMap<String, BTreeMap<DateTime<Utc>, StatisticPoint>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metadata(&self, statistic_id: &str) -> Option<&StatisticMetadata> {
        self.metadata.get(statistic_id)
    }

    /// Points of one series in ascending time order
    pub fn series(&self, statistic_id: &str) -> Vec<StatisticPoint> {
        self.points
            .get(statistic_id)
            .map(|series| series.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn statistic_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.metadata.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl HistorySink for MemoryHistory {
    fn import_statistics(
        &mut self,
        metadata: &StatisticMetadata,
        points: &[StatisticPoint],
    ) -> anyhow::Result<()> {
        self.metadata
            .insert(metadata.statistic_id.clone(), metadata.clone());
        let series = self.points.entry(metadata.statistic_id.clone()).or_default();
        for point in points {
            series.insert(point.start, point.clone());
        }
        Ok(())
    }
}

/// Reports imports through tracing, for running without a host store
#[derive(Debug, Default)]
pub struct LogHistory;

impl HistorySink for LogHistory {
    fn import_statistics(
        &mut self,
        metadata: &StatisticMetadata,
        points: &[StatisticPoint],
    ) -> anyhow::Result<()> {
        info!(
            "History {}: {} point(s) in {}",
            metadata.statistic_id,
            points.len(),
            metadata.unit_of_measurement
        );
        Ok(())
    }
}
