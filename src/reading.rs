use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::ops::Sub;

/// A value in thousandths of its unit, which is how the AquaWiz API reports every field.
/// Keeping the integer form means pH - pH(O) is exact at the precision the device measures.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Milli(i64);

impl Milli {
    pub const fn from_raw(thousandths: i64) -> Self {
        Self(thousandths)
    }

    /// Rounds to the nearest thousandth
    pub fn from_f64(value: f64) -> Self {
        Self((value * 1000.0).round() as i64)
    }

    pub fn raw(self) -> i64 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }
}

impl Sub for Milli {
    type Output = Milli;

    fn sub(self, rhs: Self) -> Self::Output {
        Milli(self.0 - rhs.0)
    }
}

impl fmt::Display for Milli {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_f64())
    }
}

/// One complete water-chemistry sample
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub alkalinity: Milli,
    pub ph: Milli,
    pub ph_outgassed: Milli,
    pub dosing: Milli,
}

impl Reading {
    pub fn new(
        timestamp: DateTime<Utc>,
        alkalinity: Milli,
        ph: Milli,
        ph_outgassed: Milli,
        dosing: Milli,
    ) -> Self {
        Self {
            timestamp,
            alkalinity,
            ph,
            ph_outgassed,
            dosing,
        }
    }

    /// pH minus pH(O). Derived on every call, never stored.
    pub fn delta_ph(&self) -> Milli {
        self.ph - self.ph_outgassed
    }
}

/// A monitor registered to the account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
}

/// Latest successful reading as published by the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub device_id: String,
    pub reading: Reading,
    pub fetched_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn alkalinity(&self) -> f64 {
        self.reading.alkalinity.as_f64()
    }

    pub fn ph(&self) -> f64 {
        self.reading.ph.as_f64()
    }

    pub fn ph_outgassed(&self) -> f64 {
        self.reading.ph_outgassed.as_f64()
    }

    pub fn dosing_ml(&self) -> f64 {
        self.reading.dosing.as_f64()
    }

    pub fn delta_ph(&self) -> f64 {
        self.reading.delta_ph().as_f64()
    }
}
