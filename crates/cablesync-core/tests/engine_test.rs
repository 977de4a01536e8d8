#![allow(clippy::unwrap_used)]

// End-to-end engine behavior over an in-memory transport, with tokio's
// clock paused so timing assertions are exact.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cablesync_api::websocket::ConnectFuture;
use cablesync_api::{Connection, Connector, WireEvent};
use cablesync_core::{
    ChannelKind, ConnectionState, DeviceBatch, DeviceSource, DeviceState, DeviceStatus,
    EngineConfig, GiveUp, ListenerFilter, ReconnectPolicy, SeedFuture, Subscription, SyncEngine,
    events,
};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, timeout};
use url::Url;

// ── Fake transport ───────────────────────────────────────────────────

enum Script {
    /// Complete the handshake; the server side has these events queued.
    Accept(Vec<WireEvent>),
    Refuse,
}

struct FakeState {
    attempts: usize,
    script: VecDeque<Script>,
    servers: mpsc::UnboundedSender<Connection>,
}

#[derive(Clone)]
struct FakeConnector {
    state: Arc<Mutex<FakeState>>,
}

impl FakeConnector {
    fn new() -> (Self, mpsc::UnboundedReceiver<Connection>) {
        let (servers, server_rx) = mpsc::unbounded_channel();
        let connector = Self {
            state: Arc::new(Mutex::new(FakeState {
                attempts: 0,
                script: VecDeque::new(),
                servers,
            })),
        };
        (connector, server_rx)
    }

    fn script(&self, step: Script) {
        self.state.lock().unwrap().script.push_back(step);
    }

    fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }
}

impl Connector for FakeConnector {
    fn connect(&self, _endpoint: &Url, _token: &SecretString) -> ConnectFuture {
        let mut state = self.state.lock().unwrap();
        state.attempts += 1;
        match state.script.pop_front().unwrap_or(Script::Accept(Vec::new())) {
            Script::Accept(queued) => {
                let (client, server) = Connection::duplex();
                for event in queued {
                    server.send(event);
                }
                state.servers.send(server).unwrap();
                Box::pin(async move { Ok(client) })
            }
            Script::Refuse => Box::pin(async {
                Err(cablesync_api::Error::WebSocketConnect("connection refused".into()))
            }),
        }
    }
}

struct StaticSeed(Vec<DeviceStatus>);

impl DeviceSource for StaticSeed {
    fn fetch(&self, _token: &SecretString) -> SeedFuture {
        let records = self.0.clone();
        Box::pin(async move { Ok(records) })
    }
}

// ── Harness ──────────────────────────────────────────────────────────

struct Harness {
    engine: SyncEngine,
    connector: FakeConnector,
    servers: mpsc::UnboundedReceiver<Connection>,
    batches: mpsc::UnboundedReceiver<DeviceBatch>,
}

fn config() -> EngineConfig {
    let mut config = EngineConfig::new("ws://devices.test/socket".parse().unwrap()).with_token("t0ken");
    config.reconnect = ReconnectPolicy {
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        max_attempts: 3,
    };
    config
}

fn start(config: EngineConfig) -> Harness {
    start_with(config, None, &[])
}

fn start_with(config: EngineConfig, seed: Option<Vec<DeviceStatus>>, script: &[fn() -> Script]) -> Harness {
    let (connector, servers) = FakeConnector::new();
    for step in script {
        connector.script(step());
    }
    let seed = seed.map(|records| Arc::new(StaticSeed(records)) as Arc<dyn DeviceSource>);
    let engine = SyncEngine::with_seed_source(config, Arc::new(connector.clone()), seed);

    let (tx, batches) = mpsc::unbounded_channel();
    engine
        .on_devices(move |batch| {
            let _ = tx.send(batch.clone());
        })
        .unwrap();

    Harness {
        engine,
        connector,
        servers,
        batches,
    }
}

async fn wait_for_state(
    engine: &SyncEngine,
    predicate: impl FnMut(&ConnectionState) -> bool,
) -> ConnectionState {
    let mut state = engine.connection_state();
    let current = state.wait_for(predicate).await.unwrap().clone();
    current
}

async fn connected(h: &mut Harness) -> Connection {
    h.engine.connect().unwrap();
    let server = h.servers.recv().await.unwrap();
    wait_for_state(&h.engine, ConnectionState::is_connected).await;
    server
}

fn drain(server: &mut Connection) -> Vec<WireEvent> {
    std::iter::from_fn(|| server.try_recv()).collect()
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn status(id: &str, state: &str, battery: f64) -> Value {
    json!({
        "deviceId": id,
        "status": state,
        "lastSeen": "2026-03-01T12:00:00Z",
        "batteryLevel": battery
    })
}

fn changed(id: &str, state: &str, battery: f64) -> WireEvent {
    WireEvent::new(events::DEVICE_STATUS_CHANGED, status(id, state, battery))
}

fn record(id: &str, state: &str, battery: f64) -> DeviceStatus {
    serde_json::from_value(status(id, state, battery)).unwrap()
}

fn ids(batch: &DeviceBatch) -> Vec<&str> {
    batch.devices.iter().map(|d| d.device_id.as_str()).collect()
}

// ── Connection lifecycle ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn repeated_connect_opens_one_transport() {
    let mut h = start(config());
    for _ in 0..3 {
        h.engine.connect().unwrap();
    }
    let _server = h.servers.recv().await.unwrap();
    wait_for_state(&h.engine, ConnectionState::is_connected).await;

    h.engine.connect().unwrap();
    h.engine.subscriptions().await.unwrap();
    assert_eq!(h.connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_without_token_fails_fast() {
    let mut config = config();
    config.token = None;
    let h = start(config);

    h.engine.connect().unwrap();
    let state = wait_for_state(&h.engine, ConnectionState::is_failed).await;
    assert_eq!(state, ConnectionState::Failed(GiveUp::AuthMissing));

    sleep(Duration::from_secs(60)).await;
    assert_eq!(h.connector.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn retries_stop_after_budget_and_reconnect_makes_one_attempt() {
    let h = start_with(config(), None, &[|| Script::Refuse, || Script::Refuse, || Script::Refuse]);
    let errors = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&errors);
    h.engine
        .on(ListenerFilter::event(events::CONNECT_ERROR), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    let t0 = Instant::now();
    h.engine.connect().unwrap();
    let state = wait_for_state(&h.engine, ConnectionState::is_failed).await;
    assert_eq!(
        state,
        ConnectionState::Failed(GiveUp::MaxAttemptsExceeded { attempts: 3 })
    );
    assert_eq!(h.connector.attempts(), 3);
    assert_eq!(errors.load(Ordering::SeqCst), 3);
    // 1s after the first failure, 2s after the second.
    assert!(t0.elapsed() >= Duration::from_secs(3));
    assert!(t0.elapsed() < Duration::from_secs(4));

    sleep(Duration::from_secs(120)).await;
    assert_eq!(h.connector.attempts(), 3);

    h.engine.reconnect().unwrap();
    wait_for_state(&h.engine, ConnectionState::is_connected).await;
    assert_eq!(h.connector.attempts(), 4);
}

#[tokio::test(start_paused = true)]
async fn subscriptions_are_reissued_after_transport_reset() {
    let mut h = start(config());
    h.engine.subscribe("dev-2", "obs-A").unwrap();
    h.engine.subscribe("dev-1", "obs-A").unwrap();
    h.engine.subscribe_all("dashboard").unwrap();

    let mut first = connected(&mut h).await;
    let expected = vec![
        WireEvent::new(events::SUBSCRIBE_DEVICE, json!("dev-1")),
        WireEvent::new(events::SUBSCRIBE_DEVICE, json!("dev-2")),
        WireEvent::bare(events::SUBSCRIBE_DEVICE_UPDATES),
    ];
    assert_eq!(drain(&mut first), expected);

    first.send(changed("dev-1", "online", 50.0));
    let batch = h.batches.recv().await.unwrap();
    assert_eq!(batch.changed, vec!["dev-1"]);

    // Server goes away: cache is evicted and observers hear about it at once.
    let dropped_at = Instant::now();
    drop(first);
    let evicted = h.batches.recv().await.unwrap();
    assert!(dropped_at.elapsed() < ms(100));
    assert!(evicted.devices.is_empty());
    assert_eq!(evicted.changed, vec!["dev-1"]);
    assert!(matches!(
        h.engine.state(),
        ConnectionState::Reconnecting { attempt: 1, .. }
    ));

    let mut second = h.servers.recv().await.unwrap();
    wait_for_state(&h.engine, ConnectionState::is_connected).await;
    assert_eq!(drain(&mut second), expected);
    assert_eq!(h.connector.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn disconnect_clears_cache_and_cancels_timers() {
    let mut h = start(config());
    h.engine.subscribe("dev-1", "obs-A").unwrap();
    let server = connected(&mut h).await;

    server.send(changed("dev-1", "online", 50.0));
    h.batches.recv().await.unwrap();

    // Deferred by the throttle floor; must never be delivered.
    server.send(changed("dev-1", "offline", 40.0));
    sleep(ms(10)).await;
    assert_eq!(h.engine.device("dev-1").unwrap().status, DeviceState::Offline);

    let t = Instant::now();
    h.engine.disconnect().unwrap();
    let batch = h.batches.recv().await.unwrap();
    assert!(t.elapsed() < ms(100));
    assert!(batch.devices.is_empty());
    assert_eq!(batch.changed, vec!["dev-1"]);
    assert_eq!(h.engine.state(), ConnectionState::Disconnected);
    assert!(h.engine.device("dev-1").is_none());

    assert!(timeout(Duration::from_secs(30), h.batches.recv()).await.is_err());
    assert_eq!(h.connector.attempts(), 1);
}

// ── Batching ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn burst_is_debounced_into_one_batch() {
    let mut h = start(config());
    h.engine.subscribe("dev-1", "obs-A").unwrap();
    let server = connected(&mut h).await;

    let t0 = Instant::now();
    server.send(changed("dev-1", "online", 90.0));
    sleep(ms(30)).await;
    server.send(changed("dev-1", "offline", 80.0));
    sleep(ms(30)).await;
    server.send(changed("dev-1", "error", 70.0));

    let batch = h.batches.recv().await.unwrap();
    assert!(t0.elapsed() >= ms(160));
    assert_eq!(batch.changed, vec!["dev-1"]);

    // Replace semantics: the cached record is exactly the last input.
    assert_eq!(**batch.device("dev-1").unwrap(), record("dev-1", "error", 70.0));

    assert!(timeout(Duration::from_secs(10), h.batches.recv()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn repeated_record_restarts_the_debounce_window() {
    let mut h = start(config());
    h.engine.subscribe("dev-1", "obs-A").unwrap();
    let server = connected(&mut h).await;

    let t0 = Instant::now();
    server.send(changed("dev-1", "online", 90.0));
    sleep(ms(60)).await;
    server.send(changed("dev-1", "online", 90.0));

    let batch = h.batches.recv().await.unwrap();
    assert!(t0.elapsed() >= ms(160), "flushed at {:?}", t0.elapsed());
    assert_eq!(batch.changed, vec!["dev-1"]);
    assert!(timeout(Duration::from_secs(10), h.batches.recv()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn continuous_stream_is_throttled_without_losing_the_latest_state() {
    let mut h = start(config());
    h.engine.subscribe("dev-1", "obs-A").unwrap();
    let server = connected(&mut h).await;

    for i in 0..2000_u32 {
        server.send(changed("dev-1", "online", f64::from(i)));
        sleep(ms(10)).await;
    }
    sleep(Duration::from_secs(6)).await;

    let flushes: Vec<DeviceBatch> = std::iter::from_fn(|| h.batches.try_recv().ok()).collect();
    assert!(flushes.len() >= 4, "only {} flushes", flushes.len());
    assert!(flushes.len() <= 5, "{} flushes under a 5s floor", flushes.len());

    let last = flushes.last().unwrap().device("dev-1").unwrap();
    assert_eq!(last.battery_level, Some(1999.0));
}

#[tokio::test(start_paused = true)]
async fn identical_resend_does_not_notify() {
    let mut h = start(config());
    h.engine.subscribe("dev-1", "obs-A").unwrap();
    let server = connected(&mut h).await;

    server.send(changed("dev-1", "online", 90.0));
    h.batches.recv().await.unwrap();

    server.send(changed("dev-1", "online", 90.0));
    assert!(timeout(Duration::from_secs(10), h.batches.recv()).await.is_err());
}

// ── Subscriptions ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn shared_subscription_sends_one_subscribe_and_one_unsubscribe() {
    let mut h = start(config());
    let mut server = connected(&mut h).await;

    h.engine.subscribe("dev-1", "obs-A").unwrap();
    h.engine.subscribe("dev-1", "obs-B").unwrap();
    assert_eq!(
        h.engine.subscriptions().await.unwrap(),
        vec![Subscription {
            device_id: "dev-1".into(),
            ref_count: 2
        }]
    );
    assert_eq!(
        drain(&mut server),
        vec![WireEvent::new(events::SUBSCRIBE_DEVICE, json!("dev-1"))]
    );

    server.send(changed("dev-1", "online", 90.0));
    h.batches.recv().await.unwrap();

    h.engine.unsubscribe("dev-1", "obs-A").unwrap();
    assert_eq!(h.engine.subscriptions().await.unwrap()[0].ref_count, 1);
    assert!(drain(&mut server).is_empty());
    assert!(h.engine.device("dev-1").is_some());

    h.engine.unsubscribe("dev-1", "obs-B").unwrap();
    assert!(h.engine.subscriptions().await.unwrap().is_empty());
    assert_eq!(
        drain(&mut server),
        vec![WireEvent::new(events::UNSUBSCRIBE_DEVICE, json!("dev-1"))]
    );
    assert!(h.engine.device("dev-1").is_none());

    let eviction = h.batches.recv().await.unwrap();
    assert!(eviction.devices.is_empty());
    assert_eq!(eviction.evicted().collect::<Vec<_>>(), vec!["dev-1"]);
}

#[tokio::test(start_paused = true)]
async fn updates_for_unwatched_devices_are_ignored() {
    let mut h = start(config());
    h.engine.subscribe("dev-1", "obs-A").unwrap();
    let server = connected(&mut h).await;

    server.send(WireEvent::new(
        events::DEVICE_STATUS_UPDATE,
        json!([status("dev-1", "online", 1.0), status("dev-2", "online", 2.0)]),
    ));
    let batch = h.batches.recv().await.unwrap();
    assert_eq!(ids(&batch), vec!["dev-1"]);
}

#[tokio::test(start_paused = true)]
async fn ending_fleet_interest_keeps_only_subscribed_devices() {
    let mut h = start(config());
    h.engine.subscribe("dev-1", "obs-A").unwrap();
    h.engine.subscribe_all("dashboard").unwrap();
    h.engine
        .seed(vec![record("dev-1", "online", 1.0), record("dev-2", "offline", 2.0)])
        .unwrap();
    let batch = h.batches.recv().await.unwrap();
    assert_eq!(ids(&batch), vec!["dev-1", "dev-2"]);

    h.engine.unsubscribe_all("dashboard").unwrap();
    h.engine.subscriptions().await.unwrap();
    let remaining: Vec<String> = h
        .engine
        .devices_snapshot()
        .iter()
        .map(|d| d.device_id.clone())
        .collect();
    assert_eq!(remaining, vec!["dev-1"]);
}

// ── Payloads and listeners ───────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn malformed_payloads_do_not_corrupt_the_cache() {
    let mut h = start(config());
    h.engine.subscribe_all("dashboard").unwrap();
    let server = connected(&mut h).await;

    server.send(changed("dev-1", "online", 10.0));
    server.send(WireEvent::new(
        events::DEVICE_STATUS_CHANGED,
        json!({ "deviceId": "dev-1", "status": "melted" }),
    ));
    server.send(WireEvent::new(events::DEVICE_STATUS_UPDATE, json!("not an array")));
    server.send(WireEvent::new(
        events::DEVICE_STATUS_UPDATE,
        json!([status("dev-2", "offline", 5.0), { "deviceId": 3 }]),
    ));
    server.send(WireEvent::new(
        "device:dev-3:status",
        status("dev-9", "online", 1.0),
    ));
    server.send(WireEvent::new("device:dev-1:error", json!({ "code": "E_USB" })));

    let batch = h.batches.recv().await.unwrap();
    assert_eq!(ids(&batch), vec!["dev-1", "dev-2"]);
    assert_eq!(batch.device("dev-1").unwrap().battery_level, Some(10.0));
}

#[tokio::test(start_paused = true)]
async fn failing_listeners_do_not_block_others() {
    let mut h = start(config());
    let (tx, mut seen) = mpsc::unbounded_channel();
    h.engine
        .on(ListenerFilter::Any, |_| Err("listener refused".into()))
        .unwrap();
    h.engine
        .on(ListenerFilter::kind(ChannelKind::Activity), |_| {
            panic!("listener bug")
        })
        .unwrap();
    h.engine
        .on(ListenerFilter::parse("device:*:activity"), move |event| {
            tx.send(event.payload.clone()).unwrap();
            Ok(())
        })
        .unwrap();

    let server = connected(&mut h).await;
    server.send(WireEvent::new("device:dev-1:activity", json!("plugged in")));
    server.send(WireEvent::new("device:dev-1:activity", json!("unplugged")));
    server.send(WireEvent::new("device:dev-2:activity", json!("docked")));

    assert_eq!(seen.recv().await.unwrap(), json!("plugged in"));
    assert_eq!(seen.recv().await.unwrap(), json!("unplugged"));
    assert_eq!(seen.recv().await.unwrap(), json!("docked"));
    assert!(h.engine.devices_snapshot().is_empty());
}

#[tokio::test(start_paused = true)]
async fn lifecycle_signals_reach_listeners() {
    let mut h = start(config());
    let (tx, mut seen) = mpsc::unbounded_channel();
    for name in [events::CONNECT, events::DISCONNECT] {
        let tx = tx.clone();
        h.engine
            .on(ListenerFilter::event(name), move |event| {
                tx.send(event.name.clone()).unwrap();
                Ok(())
            })
            .unwrap();
    }

    let _server = connected(&mut h).await;
    h.engine.disconnect().unwrap();

    assert_eq!(seen.recv().await.unwrap(), events::CONNECT);
    assert_eq!(seen.recv().await.unwrap(), events::DISCONNECT);
}

// ── Seeding and streams ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn seed_is_applied_before_the_first_delta() {
    let seed = vec![record("dev-1", "online", 90.0), record("dev-2", "online", 80.0)];
    let mut h = start_with(
        config(),
        Some(seed),
        &[|| Script::Accept(vec![changed("dev-1", "offline", 20.0)])],
    );
    h.engine.subscribe_all("dashboard").unwrap();
    h.engine.connect().unwrap();

    let batch = h.batches.recv().await.unwrap();
    assert_eq!(ids(&batch), vec!["dev-1", "dev-2"]);
    assert_eq!(batch.device("dev-1").unwrap().status, DeviceState::Offline);
}

#[tokio::test(start_paused = true)]
async fn device_stream_ticks_once_per_flush() {
    let h = start(config());
    let mut stream = h.engine.devices();
    assert!(stream.current().is_empty());

    h.engine.subscribe_all("cli").unwrap();
    h.engine
        .seed(vec![record("dev-1", "online", 1.0), record("dev-2", "error", 2.0)])
        .unwrap();

    let snapshot = stream.changed().await.unwrap();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(stream.latest().len(), 2);

    // Shutdown evicts everything once more, then the stream ends.
    h.engine.shutdown().await;
    assert!(stream.changed().await.unwrap().is_empty());
    assert!(stream.changed().await.is_none());
    assert!(h.engine.connect().is_err());
}
