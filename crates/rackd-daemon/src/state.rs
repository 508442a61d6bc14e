//! Application state management
//!
//! Owns the two long-running activities of the daemon:
//! - the scan task, driven from the async runtime through `spawn_blocking`
//! - the reconcile worker, a dedicated thread holding the blocking cluster client

use anyhow::{anyhow, Result};
use rackd_cluster::{Breaker, ClusterConfig, HttpClusterClient, Reconciler, StopHandle};
use rackd_core::{Device, Rack, RackIdentity, RackKey};
use rackd_discovery::{
    DeviceRegistry, ResourceProvider, ScanError, ScanTask, Scanner, SimulatedProvider,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::Config;

pub type BoxedProvider = Box<dyn ResourceProvider>;
type SharedScanTask = Arc<Mutex<ScanTask<BoxedProvider>>>;

/// Rack registration state reported by the status API
#[derive(Debug, Clone, Serialize)]
pub struct RackStatus {
    /// Name used when registering a new rack
    pub name: String,
    pub identity: RackIdentity,
    /// Rack record from the last successful reconciliation
    pub rack: Option<Rack>,
    pub last_error: Option<String>,
}

enum ReconcileCommand {
    Reconcile,
    Shutdown,
}

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub registry: DeviceRegistry,
    scan_task: Option<SharedScanTask>,
    rack: watch::Receiver<RackStatus>,
    reconcile_tx: mpsc::Sender<ReconcileCommand>,
    breaker_stop: StopHandle,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AppState {
    /// Create application state and start the reconcile worker
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let identity = RackIdentity::load_or_create(&config.daemon.state_path)?;
        let name = config.rack_name();
        info!(
            rack = %identity.rack_key,
            cluster = %identity.cluster_key,
            name = %name,
            "Loaded rack identity"
        );

        let scan_task = config.scanner.enabled.then(|| {
            // No vendor service binding is available; configured devices are served instead
            let provider: BoxedProvider = Box::new(SimulatedProvider::new(config.simulated_devices.clone()));
            let scanner = Scanner::new(provider, config.to_scanner_config(), identity.rack_key);
            Arc::new(Mutex::new(
                ScanTask::new(scanner).with_stale_after(config.scanner.stale_after_secs),
            ))
        });
        let registry = scan_task
            .as_ref()
            .map(|task| lock(task).registry())
            .unwrap_or_default();

        let (rack_tx, rack) = watch::channel(RackStatus {
            name: name.clone(),
            identity,
            rack: None,
            last_error: None,
        });
        let (reconcile_tx, reconcile_rx) = mpsc::channel();
        let breaker = Breaker::new(config.breaker.clone());
        let breaker_stop = breaker.stop_handle();

        let worker = ReconcileWorker {
            cluster: config.cluster.clone(),
            state_path: config.daemon.state_path.clone(),
            reconnect_interval: config.daemon.reconnect_interval(),
            reconciler: Reconciler::new(name),
            identity,
            breaker,
            status: rack_tx,
            commands: reconcile_rx,
        };
        let worker = std::thread::Builder::new()
            .name("rackd-reconcile".to_string())
            .spawn(move || worker.run())?;

        Ok(Arc::new(Self {
            config,
            registry,
            scan_task,
            rack,
            reconcile_tx,
            breaker_stop,
            worker: Mutex::new(Some(worker)),
        }))
    }

    /// Get current device list
    pub async fn devices(&self) -> Vec<Device> {
        self.registry.devices().await
    }

    pub async fn get_device(&self, key: &str) -> Option<Device> {
        self.registry.get(key).await
    }

    pub fn rack_status(&self) -> RackStatus {
        self.rack.borrow().clone()
    }

    /// Receiver notified whenever the rack status changes
    pub fn rack_updates(&self) -> watch::Receiver<RackStatus> {
        self.rack.clone()
    }

    /// Ask the reconcile worker for another pass. Returns `false` when it has exited.
    pub fn trigger_reconcile(&self) -> bool {
        self.reconcile_tx.send(ReconcileCommand::Reconcile).is_ok()
    }

    /// Run one scan pass, tagging devices with the current rack
    pub async fn scan(&self) -> Result<Vec<Device>> {
        let task = self
            .scan_task
            .clone()
            .ok_or_else(|| anyhow!("scanner is disabled"))?;
        let rack = self.rack.borrow().identity.rack_key;
        let devices = tokio::task::spawn_blocking(move || {
            let mut task = lock(&task);
            run_pass(&mut task, rack)
        })
        .await??;
        Ok(devices)
    }

    /// Scan at the configured rate until the runtime shuts down
    pub fn spawn_scan_loop(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        if self.scan_task.is_none() {
            info!("Scanner disabled");
            return None;
        }
        let state = self.clone();
        let period = self.config.daemon.scan_interval();
        Some(tokio::spawn(async move {
            info!(interval_ms = period.as_millis() as u64, "Starting scan loop");
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if let Err(e) = state.scan().await {
                    error!(error = %e, "Scan pass failed");
                }
            }
        }))
    }

    /// Stop the reconcile worker and close the hardware session
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.breaker_stop.stop();
        let _ = self.reconcile_tx.send(ReconcileCommand::Shutdown);

        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(worker) = worker {
            if !matches!(tokio::task::spawn_blocking(move || worker.join()).await, Ok(Ok(()))) {
                warn!("Reconcile worker did not exit cleanly");
            }
        }
        if let Some(task) = self.scan_task.clone() {
            let _ = tokio::task::spawn_blocking(move || {
                let mut task = lock(&task);
                task.stop();
            })
            .await;
        }
    }
}

fn lock(task: &SharedScanTask) -> std::sync::MutexGuard<'_, ScanTask<BoxedProvider>> {
    task.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Open the session if needed and run one pass. Blocks.
fn run_pass(task: &mut ScanTask<BoxedProvider>, rack: RackKey) -> Result<Vec<Device>, ScanError> {
    task.set_rack(rack);
    if !task.scanner().is_started() {
        task.start()?;
    }
    task.scan_once()
}

/// Reconciles the rack identity on its own thread
struct ReconcileWorker {
    cluster: ClusterConfig,
    state_path: PathBuf,
    reconnect_interval: Duration,
    reconciler: Reconciler,
    identity: RackIdentity,
    breaker: Breaker,
    status: watch::Sender<RackStatus>,
    commands: mpsc::Receiver<ReconcileCommand>,
}

impl ReconcileWorker {
    fn run(mut self) {
        let mut client = match HttpClusterClient::new(self.cluster.clone()) {
            Ok(client) => client,
            Err(e) => {
                error!(error = %e, "Failed to create cluster client");
                self.publish(None, Some(e.to_string()));
                return;
            }
        };

        loop {
            let committed = match self
                .reconciler
                .reconcile(&mut self.identity, &mut client, &mut self.breaker)
            {
                Ok(rack) => {
                    if let Err(e) = self.identity.save(&self.state_path) {
                        warn!(error = %e, path = %self.state_path.display(), "Failed to persist rack identity");
                    }
                    self.publish(Some(rack), None);
                    true
                }
                Err(e) => {
                    self.publish(None, Some(e.to_string()));
                    false
                }
            };

            if !self.breaker.running() {
                break;
            }

            // Committed identities wait for a trigger; failures retry on the reconnect interval
            let command = if committed {
                self.commands.recv().ok()
            } else {
                warn!(
                    retry_secs = self.reconnect_interval.as_secs(),
                    "Rack not registered, will retry"
                );
                match self.commands.recv_timeout(self.reconnect_interval) {
                    Ok(command) => Some(command),
                    Err(RecvTimeoutError::Timeout) => Some(ReconcileCommand::Reconcile),
                    Err(RecvTimeoutError::Disconnected) => None,
                }
            };
            match command {
                Some(ReconcileCommand::Reconcile) => {
                    debug!("Reconciling rack identity");
                    self.breaker.reset();
                }
                Some(ReconcileCommand::Shutdown) | None => break,
            }
        }
        debug!("Reconcile worker stopped");
    }

    fn publish(&self, rack: Option<Rack>, last_error: Option<String>) {
        let identity = self.identity;
        self.status.send_modify(|status| {
            status.identity = identity;
            status.last_error = last_error;
            if rack.is_some() || !identity.is_registered() {
                status.rack = rack;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rackd_discovery::SimulatedResource;
    use tempfile::TempDir;

    fn resource(serial: &str, alias: &str) -> SimulatedResource {
        SimulatedResource {
            is_simulated: Some(false),
            serial_number: Some(serial.to_string()),
            product_name: Some("NI 9205".to_string()),
            user_alias: Some(alias.to_string()),
            resource_name: Some(alias.to_string()),
            ..Default::default()
        }
    }

    /// Config whose cluster refuses connections and whose breaker gives up at once
    fn offline_config(temp_dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.daemon.state_path = temp_dir.path().join("rackd-state.json");
        config.cluster.port = 1;
        config.cluster.timeout_ms = 2_000;
        config.breaker.max_retries = Some(0);
        config.rack.name = Some("bench-host".to_string());
        config.simulated_devices = vec![resource("01A2B3C4", "Mod1"), resource("05D6E7F8", "Mod2")];
        config
    }

    async fn wait_for_error(state: &AppState) -> RackStatus {
        let mut updates = state.rack_updates();
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let status = updates.borrow_and_update().clone();
                if status.last_error.is_some() {
                    return status;
                }
                if updates.changed().await.is_err() {
                    return status;
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_scan_tags_devices_with_stored_rack() {
        let temp_dir = TempDir::new().unwrap();
        let config = offline_config(&temp_dir);
        let identity = RackIdentity::new(RackKey(9), rackd_core::ClusterKey::nil());
        identity.save(&config.daemon.state_path).unwrap();

        let state = AppState::new(config).unwrap();
        let devices = state.scan().await.unwrap();

        assert_eq!(devices.len(), 2);
        assert!(devices.iter().all(|d| d.rack == RackKey(9)));
        assert_eq!(state.devices().await.len(), 2);
        assert_eq!(state.get_device("05D6E7F8").await.unwrap().name, "Mod2");

        state.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unreachable_cluster_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let state = AppState::new(offline_config(&temp_dir)).unwrap();

        let status = wait_for_error(&state).await;
        assert_eq!(status.name, "bench-host");
        assert!(status.rack.is_none());
        assert!(status.last_error.unwrap().contains("unreachable"));
        assert!(!status.identity.is_registered());
        // Nothing is persisted until a rack is committed
        assert!(!state.config.daemon.state_path.exists());

        state.shutdown().await;
        assert!(!state.trigger_reconcile());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_disabled_scanner() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = offline_config(&temp_dir);
        config.scanner.enabled = false;

        let state = AppState::new(config).unwrap();
        assert!(state.scan().await.is_err());
        assert!(state.spawn_scan_loop().is_none());
        assert!(state.devices().await.is_empty());

        state.shutdown().await;
    }
}
