// ── Sync engine ──
//
// `SyncEngine` is a cheap, cloneable handle. All mutable state (the
// connection, listeners, cache contents, batcher, subscriptions) lives on
// one background task that handles commands one at a time, so nothing on
// the mutation path takes a lock. Handles enqueue commands and read the
// cache and watch channels directly.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cablesync_api::{Connection, Connector, WireEvent, WsConnector};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use url::Url;

use crate::config::EngineConfig;
use crate::connection::{Attempt, ConnectionManager};
use crate::error::CoreError;
use crate::model::{
    ConnectionState, DeviceBatch, DeviceStatus, Snapshot, Subscription, events,
};
use crate::router::{EventRouter, InboundEvent, Listener, ListenerError, ListenerFilter, ListenerId};
use crate::seed::{DeviceSource, RestSeed};
use crate::store::{DeviceCache, UpdateBatcher, decode};
use crate::stream::DeviceStream;
use crate::subscription::{self, SubscriptionRegistry};

/// Callback invoked on the engine task with each flushed batch.
pub type Observer = Box<dyn Fn(&DeviceBatch) + Send>;

// ── Commands ─────────────────────────────────────────────────────────

enum Command {
    Connect {
        endpoint: Url,
        token: Option<SecretString>,
    },
    Disconnect,
    Reconnect,
    Subscribe {
        device_id: String,
        subscriber_id: String,
    },
    Unsubscribe {
        device_id: String,
        subscriber_id: String,
    },
    SubscribeAll {
        subscriber_id: String,
    },
    UnsubscribeAll {
        subscriber_id: String,
    },
    AddListener {
        id: ListenerId,
        filter: ListenerFilter,
        listener: Listener,
    },
    RemoveListener {
        id: ListenerId,
    },
    AddObserver {
        id: ListenerId,
        observer: Observer,
    },
    RemoveObserver {
        id: ListenerId,
    },
    Ingest {
        records: Vec<DeviceStatus>,
    },
    Subscriptions {
        reply: oneshot::Sender<Vec<Subscription>>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

// ── SyncEngine handle ────────────────────────────────────────────────

/// Handle to a running synchronization engine.
///
/// Cheaply cloneable; all clones talk to the same background task. The
/// task stops when [`shutdown`](Self::shutdown) is called or the last
/// handle is dropped.
///
/// # Example
///
/// ```rust,ignore
/// use cablesync_core::{EngineConfig, SyncEngine};
///
/// let config = EngineConfig::new("wss://console.local/socket".parse()?).with_token("t0ken");
/// let engine = SyncEngine::with_websocket(config);
///
/// engine.on_devices(|batch| println!("{} devices, {} changed", batch.devices.len(), batch.changed.len()))?;
/// engine.subscribe("cable-1", "dashboard")?;
/// engine.connect()?;
/// ```
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    commands: mpsc::UnboundedSender<Command>,
    cache: Arc<DeviceCache>,
    state: watch::Receiver<ConnectionState>,
    snapshot: watch::Receiver<Snapshot>,
    next_id: AtomicU64,
}

impl SyncEngine {
    /// Start an engine that connects through `connector`.
    ///
    /// If `config.seed` is set, the device list is fetched over REST after
    /// every handshake. Must be called from within a tokio runtime.
    pub fn new(config: EngineConfig, connector: Arc<dyn Connector>) -> Self {
        let seed = config
            .seed
            .clone()
            .map(|seed| Arc::new(RestSeed::new(seed)) as Arc<dyn DeviceSource>);
        Self::with_seed_source(config, connector, seed)
    }

    /// Start an engine that speaks websocket to `config.endpoint`.
    pub fn with_websocket(config: EngineConfig) -> Self {
        let connector =
            Arc::new(WsConnector::new(config.handshake_timeout).with_tls(config.tls.clone()));
        Self::new(config, connector)
    }

    /// Start an engine with an explicit seed source (or none).
    pub fn with_seed_source(
        config: EngineConfig,
        connector: Arc<dyn Connector>,
        seed: Option<Arc<dyn DeviceSource>>,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (outcomes_tx, outcomes) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(Snapshot::default());
        let cache = Arc::new(DeviceCache::new());
        let connection = ConnectionManager::new(config.reconnect.clone());
        let state = connection.subscribe_state();

        let event_loop = EngineLoop {
            connector,
            seed,
            commands: command_rx,
            outcomes_tx,
            outcomes,
            attempt_task: None,
            connection,
            router: EventRouter::new(),
            cache: Arc::clone(&cache),
            batcher: UpdateBatcher::new(config.batch.clone()),
            registry: SubscriptionRegistry::new(),
            observers: Vec::new(),
            snapshot: snapshot_tx,
        };
        tokio::spawn(event_loop.run());

        Self {
            inner: Arc::new(EngineInner {
                config,
                commands,
                cache,
                state,
                snapshot,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Connect to the configured endpoint with the configured token.
    pub fn connect(&self) -> Result<(), CoreError> {
        self.connect_to(self.inner.config.endpoint.clone(), self.inner.config.token.clone())
    }

    /// Connect to `endpoint`. A no-op while connecting or connected.
    ///
    /// Without a token the engine logs, publishes
    /// `Failed(GiveUp::AuthMissing)` and does not retry.
    pub fn connect_to(&self, endpoint: Url, token: Option<SecretString>) -> Result<(), CoreError> {
        self.send(Command::Connect { endpoint, token })
    }

    /// Drop the connection, cancel every pending timer and clear the cache.
    pub fn disconnect(&self) -> Result<(), CoreError> {
        self.send(Command::Disconnect)
    }

    /// Reset the retry budget and connect again immediately, even after
    /// the engine gave up.
    pub fn reconnect(&self) -> Result<(), CoreError> {
        self.send(Command::Reconnect)
    }

    /// Disconnect and stop the background task. Waits until it is gone.
    pub async fn shutdown(&self) {
        let (done, stopped) = oneshot::channel();
        if self.send(Command::Shutdown { done }).is_ok() {
            let _ = stopped.await;
        }
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Register `subscriber_id`'s interest in one device.
    pub fn subscribe(
        &self,
        device_id: impl Into<String>,
        subscriber_id: impl Into<String>,
    ) -> Result<(), CoreError> {
        self.send(Command::Subscribe {
            device_id: device_id.into(),
            subscriber_id: subscriber_id.into(),
        })
    }

    pub fn unsubscribe(
        &self,
        device_id: impl Into<String>,
        subscriber_id: impl Into<String>,
    ) -> Result<(), CoreError> {
        self.send(Command::Unsubscribe {
            device_id: device_id.into(),
            subscriber_id: subscriber_id.into(),
        })
    }

    /// Register interest in every device's status.
    pub fn subscribe_all(&self, subscriber_id: impl Into<String>) -> Result<(), CoreError> {
        self.send(Command::SubscribeAll {
            subscriber_id: subscriber_id.into(),
        })
    }

    pub fn unsubscribe_all(&self, subscriber_id: impl Into<String>) -> Result<(), CoreError> {
        self.send(Command::UnsubscribeAll {
            subscriber_id: subscriber_id.into(),
        })
    }

    /// Live per-device subscriptions, sorted by device id.
    pub async fn subscriptions(&self) -> Result<Vec<Subscription>, CoreError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Subscriptions { reply })?;
        response.await.map_err(|_| CoreError::EngineStopped)
    }

    // ── Callbacks ────────────────────────────────────────────────────

    /// Register a listener for raw events matching `filter`.
    ///
    /// Listeners run on the engine task. An `Err` or a panic is logged
    /// and does not affect other listeners. A listener that captures a
    /// clone of this handle keeps the engine alive until `shutdown`.
    pub fn on<F>(&self, filter: ListenerFilter, listener: F) -> Result<ListenerId, CoreError>
    where
        F: Fn(&InboundEvent) -> Result<(), ListenerError> + Send + 'static,
    {
        let id = self.next_id();
        self.send(Command::AddListener {
            id,
            filter,
            listener: Box::new(listener),
        })?;
        Ok(id)
    }

    pub fn off(&self, id: ListenerId) -> Result<(), CoreError> {
        self.send(Command::RemoveListener { id })
    }

    /// Register an observer for batched cache changes.
    pub fn on_devices<F>(&self, observer: F) -> Result<ListenerId, CoreError>
    where
        F: Fn(&DeviceBatch) + Send + 'static,
    {
        let id = self.next_id();
        self.send(Command::AddObserver {
            id,
            observer: Box::new(observer),
        })?;
        Ok(id)
    }

    pub fn off_devices(&self, id: ListenerId) -> Result<(), CoreError> {
        self.send(Command::RemoveObserver { id })
    }

    /// Feed records from an external source through the normal ingest
    /// path (interest filter, dedup, batching).
    pub fn seed(&self, records: Vec<DeviceStatus>) -> Result<(), CoreError> {
        self.send(Command::Ingest { records })
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    /// Stream of snapshots, one per notification.
    pub fn devices(&self) -> DeviceStream {
        DeviceStream::new(self.inner.snapshot.clone())
    }

    /// Latest cached record. Reflects ingested updates immediately, ahead
    /// of the batched notification.
    pub fn device(&self, device_id: &str) -> Option<Arc<DeviceStatus>> {
        self.inner.cache.get(device_id)
    }

    /// Every cached record right now, sorted by id.
    pub fn devices_snapshot(&self) -> Snapshot {
        self.inner.cache.snapshot()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn send(&self, command: Command) -> Result<(), CoreError> {
        self.inner
            .commands
            .send(command)
            .map_err(|_| CoreError::EngineStopped)
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

// ── Event loop ───────────────────────────────────────────────────────

struct Established {
    connection: Connection,
    seed: Option<Vec<DeviceStatus>>,
}

struct AttemptOutcome {
    generation: u64,
    result: Result<Established, CoreError>,
}

struct EngineLoop {
    connector: Arc<dyn Connector>,
    seed: Option<Arc<dyn DeviceSource>>,
    commands: mpsc::UnboundedReceiver<Command>,
    outcomes_tx: mpsc::UnboundedSender<AttemptOutcome>,
    outcomes: mpsc::UnboundedReceiver<AttemptOutcome>,
    attempt_task: Option<JoinHandle<()>>,
    connection: ConnectionManager,
    router: EventRouter,
    cache: Arc<DeviceCache>,
    batcher: UpdateBatcher,
    registry: SubscriptionRegistry,
    observers: Vec<(ListenerId, Observer)>,
    snapshot: watch::Sender<Snapshot>,
}

impl EngineLoop {
    async fn run(mut self) {
        tracing::debug!("sync engine started");

        loop {
            let flush_at = self.batcher.due_at();
            let retry_at = self.connection.retry_at();

            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { done }) => {
                        self.teardown();
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.teardown();
                        break;
                    }
                },
                Some(outcome) = self.outcomes.recv() => self.handle_outcome(outcome),
                event = next_inbound(self.connection.connection_mut()) => match event {
                    Some(event) => self.handle_inbound(event),
                    None => self.handle_transport_lost(),
                },
                () = sleep_until(flush_at) => self.flush(),
                () = sleep_until(retry_at) => self.retry(),
            }
        }

        tracing::debug!("sync engine stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { endpoint, token } => {
                if let Some(attempt) = self.connection.connect(endpoint, token) {
                    self.spawn_attempt(attempt);
                }
            }
            Command::Disconnect => self.disconnect(),
            Command::Reconnect => {
                let was_connected = self.connection.is_connected();
                let attempt = self.connection.reconnect();
                if was_connected {
                    self.connection_closed();
                }
                match attempt {
                    Some(attempt) => self.spawn_attempt(attempt),
                    None => self.abort_attempt(),
                }
            }
            Command::Subscribe {
                device_id,
                subscriber_id,
            } => {
                if self.registry.subscribe(&device_id, &subscriber_id) {
                    tracing::info!(device_id = %device_id, "first subscriber, subscribing");
                    self.connection.send(subscription::subscribe_device(&device_id));
                }
            }
            Command::Unsubscribe {
                device_id,
                subscriber_id,
            } => {
                if self.registry.unsubscribe(&device_id, &subscriber_id) {
                    tracing::info!(device_id = %device_id, "last subscriber left, unsubscribing");
                    self.connection.send(subscription::unsubscribe_device(&device_id));
                    if !self.registry.is_interested(&device_id) && self.cache.evict(&device_id) {
                        self.batcher.mark(device_id, Instant::now());
                    }
                }
            }
            Command::SubscribeAll { subscriber_id } => {
                if self.registry.subscribe_fleet(&subscriber_id) {
                    tracing::info!("fleet interest started");
                    self.connection
                        .send(WireEvent::bare(events::SUBSCRIBE_DEVICE_UPDATES));
                }
            }
            Command::UnsubscribeAll { subscriber_id } => {
                if self.registry.unsubscribe_fleet(&subscriber_id) {
                    tracing::info!("fleet interest ended");
                    self.connection
                        .send(WireEvent::bare(events::UNSUBSCRIBE_DEVICE_UPDATES));
                    let registry = &self.registry;
                    let evicted = self.cache.retain(|id| registry.is_interested(id));
                    self.batcher.mark_all(evicted, Instant::now());
                }
            }
            Command::AddListener {
                id,
                filter,
                listener,
            } => self.router.add(id, filter, listener),
            Command::RemoveListener { id } => {
                self.router.remove(id);
            }
            Command::AddObserver { id, observer } => self.observers.push((id, observer)),
            Command::RemoveObserver { id } => self.observers.retain(|(oid, _)| *oid != id),
            Command::Ingest { records } => self.ingest(records),
            Command::Subscriptions { reply } => {
                let _ = reply.send(self.registry.subscriptions());
            }
            // Handled by the loop before dispatch.
            Command::Shutdown { done } => {
                let _ = done.send(());
            }
        }
    }

    // ── Connection ───────────────────────────────────────────────────

    fn spawn_attempt(&mut self, attempt: Attempt) {
        self.abort_attempt();
        let connector = Arc::clone(&self.connector);
        let seed = self.seed.clone();
        let outcomes = self.outcomes_tx.clone();

        self.attempt_task = Some(tokio::spawn(async move {
            let generation = attempt.generation;
            let result = establish(connector, seed, attempt).await;
            let _ = outcomes.send(AttemptOutcome { generation, result });
        }));
    }

    fn abort_attempt(&mut self) {
        if let Some(task) = self.attempt_task.take() {
            task.abort();
        }
    }

    fn handle_outcome(&mut self, outcome: AttemptOutcome) {
        match outcome.result {
            Ok(Established { connection, seed }) => {
                if !self.connection.established(outcome.generation, connection) {
                    return;
                }
                // Seed lands before the first socket delta is read.
                if let Some(records) = seed {
                    self.ingest(records);
                }
                for message in self.registry.resync() {
                    self.connection.send(message);
                }
                self.signal(events::CONNECT, Value::Null);
            }
            Err(error) => {
                if self
                    .connection
                    .attempt_failed(outcome.generation, &error, Instant::now())
                {
                    self.signal(events::CONNECT_ERROR, json!({ "message": error.to_string() }));
                }
            }
        }
    }

    fn retry(&mut self) {
        if let Some(attempt) = self.connection.retry_due(Instant::now()) {
            self.spawn_attempt(attempt);
        }
    }

    fn handle_transport_lost(&mut self) {
        tracing::warn!("connection to device server lost");
        self.connection.transport_lost(Instant::now());
        self.connection_closed();
    }

    fn disconnect(&mut self) {
        self.abort_attempt();
        let was_connected = self.connection.disconnect();
        self.evict_all();
        self.batcher.cancel();
        if was_connected {
            self.signal(events::DISCONNECT, Value::Null);
        }
    }

    fn teardown(&mut self) {
        self.disconnect();
        self.observers.clear();
    }

    /// An established connection is gone: the cache no longer reflects
    /// the server.
    fn connection_closed(&mut self) {
        self.evict_all();
        self.signal(events::DISCONNECT, Value::Null);
    }

    // ── Data path ────────────────────────────────────────────────────

    fn handle_inbound(&mut self, wire: WireEvent) {
        let event = InboundEvent::from(wire);
        tracing::trace!(event = %event.name, "inbound event");

        match decode::status_records(&event) {
            Some(Ok(records)) => self.ingest(records),
            Some(Err(error)) => {
                tracing::warn!(event = %event.name, error = %error, "dropping malformed payload");
                return;
            }
            None => {}
        }
        self.router.dispatch(&event);
    }

    fn ingest(&mut self, records: Vec<DeviceStatus>) {
        let now = Instant::now();
        for record in records {
            if !self.registry.is_interested(&record.device_id) {
                tracing::trace!(device_id = %record.device_id, "no interest, skipping update");
                continue;
            }
            let device_id = record.device_id.clone();
            if self.cache.apply(record) {
                tracing::trace!(device_id = %device_id, "device updated");
                self.batcher.mark(device_id, now);
            } else {
                self.batcher.touch(now);
            }
        }
    }

    /// Clear the cache and tell observers right away.
    fn evict_all(&mut self) {
        let evicted = self.cache.clear();
        if evicted.is_empty() {
            return;
        }
        tracing::debug!(count = evicted.len(), "evicting all cached devices");
        let now = Instant::now();
        self.batcher.mark_all(evicted, now);
        if let Some(changed) = self.batcher.take_now(now) {
            self.notify(changed);
        }
    }

    fn flush(&mut self) {
        if let Some(changed) = self.batcher.take(Instant::now()) {
            self.notify(changed);
        }
    }

    fn notify(&self, changed: Vec<String>) {
        let devices = self.cache.snapshot();
        self.snapshot.send_replace(Arc::clone(&devices));

        let batch = DeviceBatch { devices, changed };
        tracing::debug!(
            devices = batch.devices.len(),
            changed = batch.changed.len(),
            observers = self.observers.len(),
            "flushing device batch"
        );
        for (id, observer) in &self.observers {
            let outcome = crate::router::isolated(|| {
                observer(&batch);
                Ok(())
            });
            if let Err(reason) = outcome {
                tracing::warn!(observer = id.0, %reason, "observer failed");
            }
        }
    }

    fn signal(&self, name: &str, payload: Value) {
        self.router.dispatch(&InboundEvent::new(name, payload));
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Open the connection, then fetch the seed. A failed seed is logged and
/// the connection kept; live updates fill the cache anyway.
async fn establish(
    connector: Arc<dyn Connector>,
    seed: Option<Arc<dyn DeviceSource>>,
    attempt: Attempt,
) -> Result<Established, CoreError> {
    let connection = connector.connect(&attempt.endpoint, &attempt.token).await?;

    let seed = match seed {
        Some(source) => match source.fetch(&attempt.token).await {
            Ok(records) => Some(records),
            Err(e) => {
                tracing::warn!(error = %e, "device seed failed, continuing with live updates");
                None
            }
        },
        None => None,
    };

    Ok(Established { connection, seed })
}

async fn next_inbound(connection: Option<&mut Connection>) -> Option<WireEvent> {
    match connection {
        Some(connection) => connection.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
