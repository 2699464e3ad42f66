use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{net::TcpListener, sync::oneshot, time::timeout};

use aquawiz_bridge::{
    config::{Config, Credentials},
    data_coordinator::{CoordinatorData, CoordinatorState},
    error::ConfigError,
    sensors::{SensorEntity, SensorKind},
    setup_flow::entry_from_config,
    statistics::MemoryHistory,
};

const DEVICE: &str = "reef-001";
const TOKEN: &str = "integration_token";

#[derive(Clone, Copy)]
struct Sample {
    at: DateTime<Utc>,
    alkalinity: i64,
    ph: i64,
    ph_o: i64,
    dosing: i64,
}

/// Mock AquaWiz cloud serving per-day graphs
struct MockAquaWizServer {
    samples: Mutex<Vec<Sample>>,
    graph_requests: AtomicU32,
    login_requests: AtomicU32,
    should_fail: AtomicBool,
}

impl MockAquaWizServer {
    fn new(samples: Vec<Sample>) -> Self {
        Self {
            samples: Mutex::new(samples),
            graph_requests: AtomicU32::new(0),
            login_requests: AtomicU32::new(0),
            should_fail: AtomicBool::new(false),
        }
    }

    fn set_should_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::Relaxed);
    }

    fn push_sample(&self, sample: Sample) {
        self.samples.lock().unwrap().push(sample);
    }

    fn create_router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/api/v1/KH/auth", post(login))
            .route("/api/v1/query/device/:device_id/graph", get(graph))
            .with_state(self)
    }
}

async fn login(
    State(server): State<Arc<MockAquaWizServer>>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    server.login_requests.fetch_add(1, Ordering::Relaxed);
    if body["user"] != "reef@example.com" || body["password"] != "coralsarecool" {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(Json(json!({
        "access_token": TOKEN,
        "tokenExp": 3600,
        "user": {
            "email": "reef@example.com",
            "devices": [{ "id": DEVICE, "name": "Display Tank" }]
        }
    })))
}

async fn graph(
    State(server): State<Arc<MockAquaWizServer>>,
    Path(device_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    server.graph_requests.fetch_add(1, Ordering::Relaxed);

    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"));
    if !authorized {
        return Err(StatusCode::UNAUTHORIZED);
    }
    if server.should_fail.load(Ordering::Relaxed) {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    if device_id != DEVICE {
        return Err(StatusCode::NOT_FOUND);
    }

    let day = query
        .get("date")
        .map(|d| d.chars().take(10).collect::<String>())
        .ok_or(StatusCode::BAD_REQUEST)?;
    let results: Vec<Value> = server
        .samples
        .lock()
        .unwrap()
        .iter()
        .filter(|s| s.at.format("%Y-%m-%d").to_string() == day)
        .map(|s| {
            json!([
                s.at.timestamp_millis(),
                {
                    "field22": s.alkalinity,
                    "field23": 0,
                    "field24": 0,
                    "field25": 0,
                    "field26": s.dosing,
                    "field27": s.ph,
                    "field28": s.ph_o
                }
            ])
        })
        .collect();

    Ok(Json(json!({
        "sample_size": results.len(),
        "device": device_id,
        "results": results
    })))
}

/// Start mock AquaWiz HTTP server
async fn start_mock_aquawiz_server(
    samples: Vec<Sample>,
) -> (Arc<MockAquaWizServer>, SocketAddr, oneshot::Sender<()>) {
    let mock_server = Arc::new(MockAquaWizServer::new(samples));
    let app = mock_server.clone().create_router();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    tokio::spawn(async move {
        let server = axum::serve(listener, app);
        tokio::select! {
            _ = server => {},
            _ = shutdown_rx => {
                println!("Mock AquaWiz server shutting down");
            }
        }
    });

    (mock_server, addr, shutdown_tx)
}

fn config_for(addr: SocketAddr, password: &str) -> Config {
    let mut config = Config::new(Credentials::new("reef@example.com", password));
    config.api_url = format!("http://{addr}/api/v1");
    config.device_id = Some(DEVICE.to_string());
    config.request_timeout = Duration::from_secs(5);
    config
}

fn sample(at: DateTime<Utc>, alkalinity: i64, ph: i64, ph_o: i64, dosing: i64) -> Sample {
    Sample {
        at,
        alkalinity,
        ph,
        ph_o,
        dosing,
    }
}

async fn wait_for<F>(updates: &mut tokio::sync::watch::Receiver<CoordinatorData>, check: F)
where
    F: FnMut(&CoordinatorData) -> bool,
{
    timeout(Duration::from_secs(10), updates.wait_for(check))
        .await
        .expect("Timeout waiting for coordinator update")
        .expect("Coordinator stopped");
}

#[tokio::test]
async fn test_full_integration() {
    let now = Utc::now();
    let too_old = now - ChronoDuration::days(8);
    let three_days_ago = now - ChronoDuration::days(3);
    let yesterday = now - ChronoDuration::days(1);
    let latest = now - ChronoDuration::hours(1);

    let (mock, addr, _shutdown) = start_mock_aquawiz_server(vec![
        sample(too_old, 7600, 8000, 7900, 100),
        sample(three_days_ago, 7800, 8100, 7950, 1200),
        sample(yesterday, 7900, 8150, 7900, 2400),
        sample(latest, 8100, 8100, 7900, 2600),
    ])
    .await;

    // Setup: credentials and device are validated against the API
    let config = config_for(addr, "coralsarecool");
    let entry = entry_from_config(&config).await.expect("setup should succeed");
    assert_eq!(entry.title, "AquaWiz (reef@example.com)");
    assert_eq!(entry.device_name, "Display Tank");

    let history = Arc::new(Mutex::new(MemoryHistory::new()));
    let mut coordinator = entry
        .create_coordinator(&config, Box::new(history.clone()))
        .unwrap();

    let delta_values = Arc::new(Mutex::new(Vec::new()));
    let seen = delta_values.clone();
    let delta_sensor = SensorEntity::new(SensorKind::DeltaPh, DEVICE);
    coordinator.add_listener(move |data| {
        seen.lock().unwrap().push(delta_sensor.native_value(data));
    });

    // Test 1: first refresh backfills the window and publishes the latest reading
    coordinator.first_refresh().await.expect("first refresh");
    assert_eq!(coordinator.state(), CoordinatorState::Active);

    let snapshot = coordinator.data().snapshot.expect("snapshot after first refresh");
    assert_eq!(snapshot.reading.timestamp.timestamp_millis(), latest.timestamp_millis());
    assert_eq!(snapshot.alkalinity(), 8.1);
    assert_eq!(snapshot.delta_ph(), 0.2);

    let backfilled: Vec<i64> = history
        .lock()
        .unwrap()
        .series(&format!("aquawiz:{DEVICE}_alkalinity"))
        .iter()
        .map(|p| p.start.timestamp_millis())
        .collect();
    assert_eq!(
        backfilled,
        vec![three_days_ago.timestamp_millis(), yesterday.timestamp_millis()],
        "backfill should cover the lookback window and stop short of the live reading"
    );
    assert_eq!(*delta_values.lock().unwrap(), vec![Some(0.2)]);

    // Test 2: a failed poll keeps the snapshot and flags it unavailable
    let handle = coordinator.spawn();
    let mut updates = handle.subscribe();
    let entity = SensorEntity::new(SensorKind::Alkalinity, DEVICE);

    mock.set_should_fail(true);
    handle.request_refresh().await.unwrap();
    wait_for(&mut updates, |d| !d.last_update_success).await;

    let stale = handle.data();
    assert!(Arc::ptr_eq(stale.snapshot.as_ref().unwrap(), &snapshot));
    assert!(!entity.available(&stale));
    assert_eq!(entity.native_value(&stale), Some(8.1));

    // Test 3: recovery publishes the new reading
    mock.set_should_fail(false);
    mock.push_sample(sample(now - ChronoDuration::minutes(1), 9000, 8200, 7900, 2700));
    handle.request_refresh().await.unwrap();
    wait_for(&mut updates, |d| d.last_update_success).await;

    let recovered = handle.data();
    assert!(entity.available(&recovered));
    assert_eq!(entity.native_value(&recovered), Some(9.0));
    assert_eq!(recovered.snapshot.as_ref().unwrap().delta_ph(), 0.3);

    // Test 4: setup and the coordinator each logged in once
    assert!(mock.graph_requests.load(Ordering::Relaxed) >= 10);
    assert_eq!(mock.login_requests.load(Ordering::Relaxed), 2);

    assert_eq!(
        *delta_values.lock().unwrap(),
        vec![Some(0.2), Some(0.2), Some(0.3)]
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn test_invalid_credentials_abort_setup() {
    let (mock, addr, _shutdown) = start_mock_aquawiz_server(Vec::new()).await;

    let err = entry_from_config(&config_for(addr, "wrong"))
        .await
        .expect_err("setup should fail");
    assert_eq!(err.form_key(), "invalid_auth");
    assert_eq!(mock.graph_requests.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn test_unknown_device_is_rejected() {
    let (_mock, addr, _shutdown) = start_mock_aquawiz_server(Vec::new()).await;

    let mut config = config_for(addr, "coralsarecool");
    config.device_id = Some("not-mine".to_string());
    let err = entry_from_config(&config).await.expect_err("setup should fail");
    assert!(err.to_string().contains("not-mine"));
}

#[test]
fn test_poll_interval_out_of_range_is_rejected() {
    let vars: HashMap<&str, &str> = [
        ("AQUAWIZ_USERNAME", "reef@example.com"),
        ("AQUAWIZ_PASSWORD", "coralsarecool"),
        ("AQUAWIZ_UPDATE_INTERVAL", "30"),
    ]
    .into_iter()
    .collect();

    let result = Config::from_lookup(|name| vars.get(name).map(|v| v.to_string()));
    assert_eq!(result, Err(ConfigError::PollIntervalOutOfRange(30)));
}
