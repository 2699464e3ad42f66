use crate::aquawiz_api::AquaWizAPI;
use crate::config::PollInterval;
use crate::error::{ApiError, AuthError};
use crate::reading::{Reading, Snapshot};
use crate::statistics::{build_statistics, HistorySink};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub type ListenerId = u64;
pub type Listener = Box<dyn Fn(&CoordinatorData) + Send + Sync>;

/// What subscribers see after every poll
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinatorData {
    /// Latest successful reading, kept through failed polls
    pub snapshot: Option<Arc<Snapshot>>,
    pub last_update_success: bool,
    pub last_error: Option<String>,
    /// When the snapshot was last replaced
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Uninitialized,
    Active,
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub device_id: String,
    pub update_interval: PollInterval,
    pub lookback: chrono::Duration,
}

/// Owns polling for one device: backfills history once, then refreshes the snapshot on an interval
pub struct DataCoordinator {
    api: AquaWizAPI,
    settings: CoordinatorSettings,
    history: Box<dyn HistorySink>,
    state: CoordinatorState,
    history_watermark: Option<DateTime<Utc>>,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener_id: ListenerId,
    data_sender: watch::Sender<CoordinatorData>,
}

impl DataCoordinator {
    pub fn new(
        api: AquaWizAPI,
        settings: CoordinatorSettings,
        history: Box<dyn HistorySink>,
    ) -> Self {
        info!(
            "Initializing data coordinator for device {} every {}s",
            settings.device_id,
            settings.update_interval.as_secs()
        );
        let (data_sender, _) = watch::channel(CoordinatorData::default());
        Self {
            api,
            settings,
            history,
            state: CoordinatorState::Uninitialized,
            history_watermark: None,
            listeners: Vec::new(),
            next_listener_id: 0,
            data_sender,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn data(&self) -> CoordinatorData {
        self.data_sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinatorData> {
        self.data_sender.subscribe()
    }

    /// Registers a callback run after every poll, on the polling task
    pub fn add_listener<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(&CoordinatorData) + Send + Sync + 'static,
    {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    pub fn set_update_interval(&mut self, update_interval: PollInterval) {
        info!("Update interval changed to {}s", update_interval.as_secs());
        self.settings.update_interval = update_interval;
    }

    /// Activates the coordinator. Only a failed login is fatal here.
    pub async fn first_refresh(&mut self) -> Result<(), AuthError> {
        self.first_refresh_at(Utc::now()).await
    }

    pub async fn first_refresh_at(&mut self, now: DateTime<Utc>) -> Result<(), AuthError> {
        self.api.authenticate().await?;

        let history = match now.checked_sub_signed(self.settings.lookback) {
            Some(since) => {
                info!(
                    "Starting historical data backfill for device {} since {}",
                    self.settings.device_id, since
                );
                match self
                    .api
                    .get_history(&self.settings.device_id, since, now)
                    .await
                {
                    Ok(history) => history,
                    Err(ApiError::Auth(e)) => return Err(e),
                    Err(e) => {
                        warn!("Failed to backfill historical data: {e}");
                        Vec::new()
                    }
                }
            }
            None => {
                warn!(
                    "Lookback of {} days reaches past the supported date range, skipping backfill",
                    self.settings.lookback.num_days()
                );
                Vec::new()
            }
        };

        let snapshot = self.refresh().await.ok();
        // The polled reading is the current value, not history. Without one the
        // newest backfilled sample is left for the next poll to report.
        let cutoff = snapshot
            .map(|s| s.reading.timestamp)
            .or_else(|| history.last().map(|r| r.timestamp));
        let published = self.publish_history(&history, cutoff);
        info!(
            "Backfilled {published} historical data points for device {}",
            self.settings.device_id
        );

        self.state = CoordinatorState::Active;
        Ok(())
    }

    /// Polls once. A failure keeps the previous snapshot and marks the data stale.
    pub async fn refresh(&mut self) -> Result<Arc<Snapshot>, ApiError> {
        let result = self.api.get_latest(&self.settings.device_id).await;
        let previous = self.data();

        let (data, outcome) = match result {
            Ok(reading) => {
                if !previous.last_update_success && previous.last_error.is_some() {
                    info!("Fetching AquaWiz data recovered");
                }
                debug!(
                    "Device {} at {}: {} dKH, pH {}, pH(O) {}, ΔpH {}, dosed {} ml",
                    self.settings.device_id,
                    reading.timestamp,
                    reading.alkalinity,
                    reading.ph,
                    reading.ph_outgassed,
                    reading.delta_ph(),
                    reading.dosing
                );
                let now = Utc::now();
                let snapshot = Arc::new(Snapshot {
                    device_id: self.settings.device_id.clone(),
                    reading,
                    fetched_at: now,
                });
                let data = CoordinatorData {
                    snapshot: Some(snapshot.clone()),
                    last_update_success: true,
                    last_error: None,
                    last_update: Some(now),
                };
                (data, Ok(snapshot))
            }
            Err(e) => {
                warn!("Error communicating with API: {e}");
                let data = CoordinatorData {
                    last_update_success: false,
                    last_error: Some(e.to_string()),
                    ..previous
                };
                (data, Err(e))
            }
        };

        self.publish(data);
        outcome
    }

    /// Sends history older than `cutoff` and newer than anything sent before.
    /// Returns how many readings went to the sink. If any series fails to import
    /// nothing counts as sent, so the next backfill retries the whole batch.
    fn publish_history(&mut self, history: &[Reading], cutoff: Option<DateTime<Utc>>) -> usize {
        let watermark = self.history_watermark;
        let pending: Vec<Reading> = history
            .iter()
            .filter(|r| watermark.map_or(true, |w| r.timestamp > w))
            .filter(|r| cutoff.map_or(true, |c| r.timestamp < c))
            .cloned()
            .collect();
        let Some(last) = pending.last() else {
            return 0;
        };
        let newest = last.timestamp;

        let mut complete = true;
        for (metadata, points) in build_statistics(&self.settings.device_id, &pending) {
            if let Err(e) = self.history.import_statistics(&metadata, &points) {
                warn!("Failed to store history for {}: {e}", metadata.statistic_id);
                complete = false;
            }
        }
        if !complete {
            return 0;
        }
        self.history_watermark = Some(newest);
        pending.len()
    }

    fn publish(&self, data: CoordinatorData) {
        self.data_sender.send_replace(data);
        let data = self.data_sender.borrow().clone();
        for (_, listener) in &self.listeners {
            listener(&data);
        }
    }

    /// Moves the coordinator onto its own task. Activates it first if needed.
    pub fn spawn(mut self) -> CoordinatorHandle {
        let data = self.data_sender.subscribe();
        let (command_sender, command_receiver) = mpsc::channel(8);
        let task = tokio::spawn(async move {
            self.run(command_receiver).await;
        });
        CoordinatorHandle {
            data,
            commands: command_sender,
            task,
        }
    }

    async fn run(&mut self, mut commands: mpsc::Receiver<Command>) {
        if self.state == CoordinatorState::Uninitialized {
            if let Err(e) = self.first_refresh().await {
                error!("AquaWiz login failed, coordinator stopped: {e}");
                let data = CoordinatorData {
                    last_update_success: false,
                    last_error: Some(e.to_string()),
                    ..self.data()
                };
                self.publish(data);
                return;
            }
        }

        loop {
            let period = self.settings.update_interval.as_duration();
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let _ = self.refresh().await;
                    }
                    command = commands.recv() => match command {
                        Some(Command::Refresh) => {
                            let _ = self.refresh().await;
                        }
                        Some(Command::SetUpdateInterval(update_interval)) => {
                            self.set_update_interval(update_interval);
                            break;
                        }
                        None => {
                            info!("Coordinator handle dropped, polling stopped");
                            return;
                        }
                    },
                }
            }
        }
    }
}

#[derive(Debug)]
enum Command {
    Refresh,
    SetUpdateInterval(PollInterval),
}

#[derive(Debug, thiserror::Error)]
#[error("coordinator is no longer running")]
pub struct CoordinatorStopped;

/// Control of a spawned coordinator
pub struct CoordinatorHandle {
    data: watch::Receiver<CoordinatorData>,
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl CoordinatorHandle {
    pub fn data(&self) -> CoordinatorData {
        self.data.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinatorData> {
        self.data.clone()
    }

    /// Polls now instead of waiting for the next tick
    pub async fn request_refresh(&self) -> Result<(), CoordinatorStopped> {
        self.commands
            .send(Command::Refresh)
            .await
            .map_err(|_| CoordinatorStopped)
    }

    /// Restarts the tick schedule with a new interval
    pub async fn set_update_interval(
        &self,
        update_interval: PollInterval,
    ) -> Result<(), CoordinatorStopped> {
        self.commands
            .send(Command::SetUpdateInterval(update_interval))
            .await
            .map_err(|_| CoordinatorStopped)
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops polling. A poll in flight is abandoned.
    pub async fn shutdown(self) {
        info!("Shutting down data coordinator");
        self.task.abort();
        let _ = self.task.await;
    }
}
