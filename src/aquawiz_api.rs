use crate::config::{Config, Credentials};
use crate::error::{ApiError, AuthError};
use crate::reading::{Device, Milli, Reading};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use reqwest::{header, StatusCode};
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;
const TOKEN_REFRESH_MARGIN_MINS: i64 = 5;
const DEFAULT_DAY_REQUEST_DELAY: Duration = Duration::from_millis(500);
const WEB_APP_ORIGIN: &str = "https://www.aquawiz.net";

/// An authenticated login, valid until `expires_at`
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub email: Option<String>,
    pub devices: Vec<Device>,
}

impl Session {
    fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at - ChronoDuration::minutes(TOKEN_REFRESH_MARGIN_MINS)
    }
}

/// Client for the AquaWiz cloud API. Owns the token and renews it as needed.
pub struct AquaWizAPI {
    endpoint_url: String,
    credentials: Credentials,
    client: reqwest::Client,
    session: Option<Session>,
    day_request_delay: Duration,
}

impl AquaWizAPI {
    pub fn new(endpoint_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            credentials,
            client: reqwest::Client::new(),
            session: None,
            day_request_delay: DEFAULT_DAY_REQUEST_DELAY,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            ..Self::new(config.api_url.clone(), config.credentials.clone())
        })
    }

    /// Pause between the per-day requests of a history fetch
    pub fn with_day_request_delay(mut self, delay: Duration) -> Self {
        self.day_request_delay = delay;
        self
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub async fn authenticate(&mut self) -> Result<&Session, AuthError> {
        let body = serde_json::json!({
            "user": self.credentials.username,
            "password": self.credentials.password,
            "token": { "access_token": "" },
        });

        let response = self
            .client
            .post(format!("{}/KH/auth", self.endpoint_url))
            .json(&body)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED => return Err(AuthError::InvalidCredentials),
            status => {
                let body = response.text().await.unwrap_or_default();
                return Err(AuthError::Rejected { status, body });
            }
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Parse(e.to_string()))?;

        let lifetime = login.token_exp.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        let (email, devices) = match login.user {
            Some(user) => (user.email, user.devices.iter().filter_map(parse_device).collect()),
            None => (None, Vec::new()),
        };
        info!(
            "Authenticated with AquaWiz as {}, {} device(s)",
            self.credentials.username,
            devices.len()
        );

        Ok(&*self.session.insert(Session {
            access_token: login.access_token,
            expires_at: Utc::now() + ChronoDuration::seconds(lifetime),
            email,
            devices,
        }))
    }

    /// Devices registered to the account, in the order the account lists them
    pub async fn list_devices(&mut self) -> Result<Vec<Device>, AuthError> {
        let session = self.ensure_authenticated().await?;
        Ok(session.devices.clone())
    }

    /// Most recent complete sample. Falls back to yesterday's graph just after midnight.
    pub async fn get_latest(&mut self, device_id: &str) -> Result<Reading, ApiError> {
        let today = Utc::now().date_naive();
        let mut readings = self.get_device_day(device_id, today).await?;
        if readings.is_empty() {
            if let Some(yesterday) = today.pred_opt() {
                debug!("No samples yet for {today}, checking {yesterday}");
                readings = self.get_device_day(device_id, yesterday).await?;
            }
        }

        readings
            .into_iter()
            .max_by_key(|r| r.timestamp)
            .ok_or_else(|| ApiError::NoReadings(device_id.to_string()))
    }

    /// Samples in `since..=until`, ascending and unique by timestamp.
    /// A day that fails to load is skipped; a failed login aborts.
    pub async fn get_history(
        &mut self,
        device_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Reading>, ApiError> {
        let mut by_time: BTreeMap<DateTime<Utc>, Reading> = BTreeMap::new();
        let mut day = since.date_naive();
        let last_day = until.date_naive();

        while day <= last_day {
            match self.get_device_day(device_id, day).await {
                Ok(readings) => {
                    for reading in readings {
                        if reading.timestamp >= since && reading.timestamp <= until {
                            by_time.insert(reading.timestamp, reading);
                        }
                    }
                }
                Err(ApiError::Auth(e)) => return Err(ApiError::Auth(e)),
                Err(e) => warn!("Failed to get data for {day}: {e}"),
            }

            day = match day.succ_opt() {
                Some(next) => next,
                None => break,
            };
            if day <= last_day && !self.day_request_delay.is_zero() {
                tokio::time::sleep(self.day_request_delay).await;
            }
        }

        Ok(by_time.into_values().collect())
    }

    /// All complete samples the graph endpoint reports for one UTC day
    pub async fn get_device_day(
        &mut self,
        device_id: &str,
        day: NaiveDate,
    ) -> Result<Vec<Reading>, ApiError> {
        let url = format!(
            "{}/query/device/{}/graph?date={}T00:00:00.000Z",
            self.endpoint_url,
            device_id,
            day.format("%Y-%m-%d")
        );

        let token = self.ensure_authenticated().await?.access_token.clone();
        let mut response = self.graph_request(&url, &token).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            debug!("Token rejected, re-authenticating once");
            let token = self.authenticate().await?.access_token.clone();
            response = self.graph_request(&url, &token).await?;
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status, body });
        }

        let graph: GraphResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))?;
        let readings = parse_graph(&graph);
        debug!(
            "Device {device_id} reported {} complete sample(s) of {} for {day}",
            readings.len(),
            graph.results.len()
        );
        Ok(readings)
    }

    async fn graph_request(
        &self,
        url: &str,
        token: &str,
    ) -> Result<reqwest::Response, reqwest::Error> {
        self.client
            .get(url)
            .bearer_auth(token)
            .header(header::ACCEPT, "application/json, text/plain, */*")
            .header(header::ORIGIN, WEB_APP_ORIGIN)
            .header(header::REFERER, format!("{WEB_APP_ORIGIN}/"))
            .send()
            .await
    }

    async fn ensure_authenticated(&mut self) -> Result<&Session, AuthError> {
        let fresh = self
            .session
            .as_ref()
            .is_some_and(|s| !s.needs_refresh(Utc::now()));
        if !fresh {
            self.authenticate().await?;
        }
        self.session
            .as_ref()
            .ok_or_else(|| AuthError::Parse("login produced no session".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
    #[serde(rename = "tokenExp")]
    token_exp: Option<i64>,
    user: Option<LoginUser>,
}

#[derive(Debug, Deserialize)]
struct LoginUser {
    email: Option<String>,
    #[serde(default)]
    devices: Vec<Value>,
}

/// Body of `/query/device/{id}/graph`
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphResponse {
    #[serde(default)]
    pub sample_size: Option<u64>,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub results: Vec<(i64, GraphFields)>,
}

/// Fields are reported in thousandths. The ones not listed here are unused by the device.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphFields {
    /// Alkalinity, dKH
    pub field22: Option<i64>,
    /// Cumulative dosing, ml
    pub field26: Option<i64>,
    /// pH
    pub field27: Option<i64>,
    /// pH after outgassing
    pub field28: Option<i64>,
}

/// Complete samples of a graph response. Samples missing a field, or
/// without a positive pH and pH(O), are dropped.
pub fn parse_graph(graph: &GraphResponse) -> Vec<Reading> {
    graph
        .results
        .iter()
        .filter_map(|(timestamp_ms, fields)| {
            let timestamp = Utc.timestamp_millis_opt(*timestamp_ms).single()?;
            let alkalinity = fields.field22?;
            let dosing = fields.field26?;
            let ph = fields.field27.filter(|v| *v > 0)?;
            let ph_outgassed = fields.field28.filter(|v| *v > 0)?;
            Some(Reading::new(
                timestamp,
                Milli::from_raw(alkalinity),
                Milli::from_raw(ph),
                Milli::from_raw(ph_outgassed),
                Milli::from_raw(dosing),
            ))
        })
        .collect()
}

fn parse_device(value: &Value) -> Option<Device> {
    let id = match value.get("id").or_else(|| value.get("device_id"))? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let name = value
        .get("name")
        .or_else(|| value.get("device_name"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Device {id}"));
    Some(Device { id, name })
}
