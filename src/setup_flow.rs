use crate::aquawiz_api::AquaWizAPI;
use crate::config::{Config, Credentials, PollInterval};
use crate::data_coordinator::{CoordinatorSettings, DataCoordinator};
use crate::error::{AuthError, ConfigError};
use crate::reading::Device;
use crate::statistics::HistorySink;
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

/// Why setup was refused, as shown to whoever is configuring the bridge
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Auth(AuthError),

    #[error("Cannot connect to AquaWiz: {0}")]
    CannotConnect(AuthError),

    #[error("No devices found for this account")]
    NoDevices,

    #[error("Device {0} is already configured")]
    AlreadyConfigured(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Unexpected error: {0}")]
    Unknown(String),
}

impl From<AuthError> for SetupError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => SetupError::Auth(err),
            other => SetupError::CannotConnect(other),
        }
    }
}

impl SetupError {
    /// Form error key for the step that failed
    pub fn form_key(&self) -> &'static str {
        match self {
            SetupError::Auth(_) => "invalid_auth",
            SetupError::CannotConnect(_) => "cannot_connect",
            SetupError::NoDevices => "no_devices",
            SetupError::AlreadyConfigured(_) => "already_configured",
            SetupError::Config(ConfigError::PollIntervalOutOfRange(_)) => "invalid_interval",
            SetupError::Config(_) | SetupError::Unknown(_) => "unknown",
        }
    }
}

/// User-adjustable settings of a configured entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOptions {
    pub update_interval: PollInterval,
}

impl EntryOptions {
    pub fn with_update_interval(seconds: u64) -> Result<Self, ConfigError> {
        Ok(Self {
            update_interval: PollInterval::new(seconds)?,
        })
    }
}

/// A validated account + device pair, ready to be persisted by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub title: String,
    pub unique_id: String,
    pub credentials: Credentials,
    pub device_id: String,
    pub device_name: String,
    #[serde(default)]
    pub options: EntryOptions,
}

impl ConfigEntry {
    pub fn update_options(&mut self, options: EntryOptions) {
        self.options = options;
    }

    pub fn coordinator_settings(&self, lookback: chrono::Duration) -> CoordinatorSettings {
        CoordinatorSettings {
            device_id: self.device_id.clone(),
            update_interval: self.options.update_interval,
            lookback,
        }
    }

    /// Builds the coordinator this entry describes
    pub fn create_coordinator(
        &self,
        config: &Config,
        history: Box<dyn HistorySink>,
    ) -> Result<DataCoordinator, SetupError> {
        let api = AquaWizAPI::from_config(config)
            .map_err(|e| SetupError::Unknown(format!("HTTP client: {e}")))?;
        Ok(DataCoordinator::new(
            api,
            self.coordinator_settings(config.lookback()),
            history,
        ))
    }
}

/// Credentials step: checks the login and collects the account's devices
pub async fn submit_credentials(api: &mut AquaWizAPI) -> Result<DeviceStep, SetupError> {
    let devices = api.list_devices().await.map_err(|e| {
        error!("AquaWiz login failed during setup: {e}");
        SetupError::from(e)
    })?;
    if devices.is_empty() {
        return Err(SetupError::NoDevices);
    }
    let credentials = api.credentials().clone();
    info!("Account {} has {} device(s)", credentials.username, devices.len());
    Ok(DeviceStep {
        credentials,
        devices,
    })
}

/// Device step: the account is valid, one of its devices must be chosen
#[derive(Debug, Clone)]
pub struct DeviceStep {
    credentials: Credentials,
    devices: Vec<Device>,
}

impl DeviceStep {
    /// Choices in account order, as (id, display name)
    pub fn device_options(&self) -> Vec<(String, String)> {
        self.devices
            .iter()
            .map(|d| (d.id.clone(), d.name.clone()))
            .collect()
    }

    pub fn select_device(
        self,
        device_id: Option<&str>,
        options: EntryOptions,
        configured_ids: &[String],
    ) -> Result<ConfigEntry, SetupError> {
        let device_id = device_id
            .filter(|id| !id.is_empty())
            .ok_or(ConfigError::MissingDevice)?;
        let device = self
            .devices
            .iter()
            .find(|d| d.id == device_id)
            .ok_or_else(|| ConfigError::UnknownDevice(device_id.to_string()))?;

        let unique_id = format!("{}_{}", self.credentials.username, device.id);
        if configured_ids.contains(&unique_id) {
            return Err(SetupError::AlreadyConfigured(device.id.clone()));
        }

        Ok(ConfigEntry {
            title: format!("AquaWiz ({})", self.credentials.username),
            unique_id,
            device_id: device.id.clone(),
            device_name: device.name.clone(),
            credentials: self.credentials,
            options,
        })
    }
}

/// Runs both steps from a complete configuration, as the headless binary does
pub async fn entry_from_config(config: &Config) -> Result<ConfigEntry, SetupError> {
    let mut api = AquaWizAPI::from_config(config)
        .map_err(|e| SetupError::Unknown(format!("HTTP client: {e}")))?;
    let step = submit_credentials(&mut api).await?;
    let device_id = match config.require_device() {
        Ok(id) => id,
        Err(e) => {
            for (id, name) in step.device_options() {
                info!("Available device: {id} ({name})");
            }
            return Err(e.into());
        }
    };
    step.select_device(
        Some(device_id),
        EntryOptions {
            update_interval: config.update_interval,
        },
        &[],
    )
}
