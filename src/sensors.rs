use crate::data_coordinator::CoordinatorData;
use crate::reading::{Milli, Reading};
use serde_derive::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const MANUFACTURER: &str = "AquaWiz";
pub const MODEL: &str = "Alkalinity Monitor";
pub const CONFIGURATION_URL: &str = "https://www.aquawiz.net";

/// The physical monitor all sensors of a device hang off
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub identifier: String,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub configuration_url: String,
}

impl DeviceInfo {
    pub fn for_device(device_id: &str) -> Self {
        Self {
            identifier: device_id.to_string(),
            name: format!("{MANUFACTURER} {device_id}"),
            manufacturer: MANUFACTURER.to_string(),
            model: MODEL.to_string(),
            configuration_url: CONFIGURATION_URL.to_string(),
        }
    }
}

/// The fields of a reading exposed as sensors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Alkalinity,
    Ph,
    #[serde(rename = "ph_o")]
    PhOutgassed,
    Dosing,
    DeltaPh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    Measurement,
    TotalIncreasing,
}

impl SensorKind {
    pub const ALL: [SensorKind; 5] = [
        SensorKind::Alkalinity,
        SensorKind::Ph,
        SensorKind::PhOutgassed,
        SensorKind::Dosing,
        SensorKind::DeltaPh,
    ];

    pub fn key(self) -> &'static str {
        match self {
            SensorKind::Alkalinity => "alkalinity",
            SensorKind::Ph => "ph",
            SensorKind::PhOutgassed => "ph_o",
            SensorKind::Dosing => "dosing",
            SensorKind::DeltaPh => "delta_ph",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SensorKind::Alkalinity => "Alkalinity",
            SensorKind::Ph => "pH",
            SensorKind::PhOutgassed => "pH(O)",
            SensorKind::Dosing => "Dosing",
            SensorKind::DeltaPh => "ΔpH",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            SensorKind::Alkalinity => "dKH",
            SensorKind::Ph | SensorKind::PhOutgassed | SensorKind::DeltaPh => "pH",
            SensorKind::Dosing => "mL",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            SensorKind::Alkalinity => "mdi:test-tube",
            SensorKind::Ph | SensorKind::PhOutgassed => "mdi:ph",
            SensorKind::Dosing => "mdi:eyedropper-variant",
            SensorKind::DeltaPh => "mdi:delta",
        }
    }

    pub fn device_class(self) -> &'static str {
        match self {
            SensorKind::Dosing => "volume",
            _ => "ph",
        }
    }

    pub fn state_class(self) -> StateClass {
        match self {
            SensorKind::Dosing => StateClass::TotalIncreasing,
            _ => StateClass::Measurement,
        }
    }

    pub fn value(self, reading: &Reading) -> Milli {
        match self {
            SensorKind::Alkalinity => reading.alkalinity,
            SensorKind::Ph => reading.ph,
            SensorKind::PhOutgassed => reading.ph_outgassed,
            SensorKind::Dosing => reading.dosing,
            SensorKind::DeltaPh => reading.delta_ph(),
        }
    }
}

/// What a host needs to render one sensor at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorState {
    pub unique_id: String,
    pub name: String,
    pub state: Option<f64>,
    pub available: bool,
    pub unit_of_measurement: String,
    pub device_class: String,
    pub state_class: StateClass,
    pub icon: String,
    pub attributes: Map<String, Value>,
}

/// One sensor of one device, reading its value from the coordinator's data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorEntity {
    kind: SensorKind,
    device_id: String,
}

impl SensorEntity {
    pub fn new(kind: SensorKind, device_id: impl Into<String>) -> Self {
        Self {
            kind,
            device_id: device_id.into(),
        }
    }

    /// One entity per tracked field
    pub fn all_for_device(device_id: &str) -> Vec<SensorEntity> {
        SensorKind::ALL
            .iter()
            .map(|kind| SensorEntity::new(*kind, device_id))
            .collect()
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn unique_id(&self) -> String {
        format!("{}_{}", self.device_id, self.kind.key())
    }

    pub fn available(&self, data: &CoordinatorData) -> bool {
        data.last_update_success && data.snapshot.is_some()
    }

    pub fn native_value(&self, data: &CoordinatorData) -> Option<f64> {
        data.snapshot
            .as_ref()
            .map(|snapshot| self.kind.value(&snapshot.reading).as_f64())
    }

    pub fn extra_state_attributes(&self, data: &CoordinatorData) -> Map<String, Value> {
        let mut attrs = Map::new();
        if let Some(snapshot) = &data.snapshot {
            attrs.insert(
                "last_measurement".to_string(),
                json!(snapshot.reading.timestamp.to_rfc3339()),
            );
            if self.kind == SensorKind::DeltaPh {
                attrs.insert("ph".to_string(), json!(snapshot.ph()));
                attrs.insert("ph_o".to_string(), json!(snapshot.ph_outgassed()));
                attrs.insert("calculation".to_string(), json!("pH - pH(O)"));
            }
        }
        attrs
    }

    pub fn state(&self, data: &CoordinatorData) -> SensorState {
        SensorState {
            unique_id: self.unique_id(),
            name: self.kind.name().to_string(),
            state: self.native_value(data),
            available: self.available(data),
            unit_of_measurement: self.kind.unit().to_string(),
            device_class: self.kind.device_class().to_string(),
            state_class: self.kind.state_class(),
            icon: self.kind.icon().to_string(),
            attributes: self.extra_state_attributes(data),
        }
    }
}
