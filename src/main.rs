use aquawiz_bridge::config::Config;
use aquawiz_bridge::sensors::{DeviceInfo, SensorEntity};
use aquawiz_bridge::setup_flow::entry_from_config;
use aquawiz_bridge::statistics::LogHistory;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    info!("Starting AquaWiz bridge");
    let config = Config::from_env()?;

    // Validates the login and the chosen device before anything polls
    let entry = entry_from_config(&config).await?;
    info!(
        "Configured {} for device {} ({}), polling every {}s",
        entry.title,
        entry.device_name,
        entry.device_id,
        entry.options.update_interval.as_secs()
    );
    info!(
        "Device info: {}",
        serde_json::to_string(&DeviceInfo::for_device(&entry.device_id))?
    );

    let mut coordinator = entry.create_coordinator(&config, Box::new(LogHistory))?;

    let entities = SensorEntity::all_for_device(&entry.device_id);
    coordinator.add_listener(move |data| {
        for entity in &entities {
            match serde_json::to_string(&entity.state(data)) {
                Ok(state) => info!("{state}"),
                Err(e) => error!("Cannot encode state of {}: {e}", entity.unique_id()),
            }
        }
    });

    if let Err(e) = coordinator.first_refresh().await {
        error!("AquaWiz login failed: {e}");
        return Err(e.into());
    }

    let handle = coordinator.spawn();

    tokio::signal::ctrl_c().await?;
    handle.shutdown().await;

    Ok(())
}
