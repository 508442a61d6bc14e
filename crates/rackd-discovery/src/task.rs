//! Scan task: runs scan passes and tracks devices across them

use rackd_core::{merge_properties, Device, DeviceStatus, RackKey};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::provider::ResourceProvider;
use crate::scanner::{ScanError, Scanner, ScannerContext};

/// Empty passes between "no devices found" reports
pub const EMPTY_SCAN_REPORT_INTERVAL: usize = 12;

/// Discovery event for real-time updates
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// Scan started
    ScanStarted,
    /// New device discovered
    DeviceDiscovered(Device),
    /// Known device seen again
    DeviceUpdated(Device),
    /// Known device missing from the latest scan
    DeviceDisconnected(String),
    /// Disconnected device evicted from the registry
    DeviceRemoved(String),
    /// Scan completed
    ScanCompleted { found: usize, total: usize },
}

/// Devices seen by the scan task, shared with readers
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: Arc<RwLock<HashMap<String, Device>>>,
}

impl DeviceRegistry {
    /// Get current device list, ordered by key
    pub async fn devices(&self) -> Vec<Device> {
        sorted(self.devices.read().await.values().cloned().collect())
    }

    /// Get a specific device
    pub async fn get(&self, key: &str) -> Option<Device> {
        self.devices.read().await.get(key).cloned()
    }

    /// Blocking variant of [`DeviceRegistry::devices`] for use off the async runtime
    pub fn blocking_devices(&self) -> Vec<Device> {
        sorted(self.devices.blocking_read().values().cloned().collect())
    }
}

fn sorted(mut devices: Vec<Device>) -> Vec<Device> {
    devices.sort_by(|a, b| a.key.cmp(&b.key));
    devices
}

/// Whether an empty pass should be reported: the first one, then every
/// [`EMPTY_SCAN_REPORT_INTERVAL`] consecutive empty passes.
fn should_report_empty(empty_passes: usize) -> bool {
    empty_passes % EMPTY_SCAN_REPORT_INTERVAL == 1
}

/// Runs scan passes and keeps a registry of discovered devices
pub struct ScanTask<P: ResourceProvider> {
    scanner: Scanner<P>,
    ctx: ScannerContext,
    empty_passes: usize,
    registry: DeviceRegistry,
    event_tx: broadcast::Sender<DiscoveryEvent>,
    /// Seconds a disconnected device is kept before eviction
    stale_after_secs: Option<i64>,
}

impl<P: ResourceProvider> ScanTask<P> {
    pub fn new(scanner: Scanner<P>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            scanner,
            ctx: ScannerContext::default(),
            empty_passes: 0,
            registry: DeviceRegistry::default(),
            event_tx,
            stale_after_secs: None,
        }
    }

    /// Evict devices that have been disconnected for longer than `secs`
    pub fn with_stale_after(mut self, secs: Option<i64>) -> Self {
        self.stale_after_secs = secs;
        self
    }

    /// Subscribe to discovery events
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.event_tx.subscribe()
    }

    pub fn registry(&self) -> DeviceRegistry {
        self.registry.clone()
    }

    pub fn context(&self) -> &ScannerContext {
        &self.ctx
    }

    pub fn scanner(&self) -> &Scanner<P> {
        &self.scanner
    }

    pub fn start(&mut self) -> Result<(), ScanError> {
        self.scanner.start()
    }

    pub fn stop(&mut self) {
        self.scanner.stop();
    }

    /// Move this host's devices to a new rack
    pub fn set_rack(&mut self, rack: RackKey) {
        if self.scanner.rack() == rack {
            return;
        }
        info!(rack = %rack, "Tagging scanned devices with rack");
        self.scanner.set_rack(rack);
        for device in self.registry.devices.blocking_write().values_mut() {
            device.rack = rack;
        }
    }

    /// Run a single scan pass and fold the result into the registry.
    ///
    /// Blocks the calling thread; run it off the async runtime.
    pub fn scan_once(&mut self) -> Result<Vec<Device>, ScanError> {
        let _ = self.event_tx.send(DiscoveryEvent::ScanStarted);
        self.ctx.count += 1;

        let scanned = self.scanner.scan(&self.ctx)?;

        if scanned.is_empty() {
            self.empty_passes += 1;
            if should_report_empty(self.empty_passes) {
                info!(passes = self.empty_passes, "No hardware devices found");
            }
        } else {
            self.empty_passes = 0;
        }

        let mut devices = self.registry.devices.blocking_write();
        let seen: HashSet<&str> = scanned.iter().map(|d| d.key.as_str()).collect();

        for device in &scanned {
            match devices.get_mut(&device.key) {
                Some(existing) => {
                    let properties = merge_properties(&existing.properties, &device.properties);
                    *existing = Device {
                        properties,
                        ..device.clone()
                    };
                    let _ = self.event_tx.send(DiscoveryEvent::DeviceUpdated(existing.clone()));
                }
                None => {
                    info!(device = %device.key, model = %device.model, "Discovered device");
                    devices.insert(device.key.clone(), device.clone());
                    let _ = self.event_tx.send(DiscoveryEvent::DeviceDiscovered(device.clone()));
                }
            }
        }

        for device in devices.values_mut() {
            if device.status.is_present() && !seen.contains(device.key.as_str()) {
                warn!(device = %device.key, "Device disconnected");
                device.status = DeviceStatus::disconnected(&device.key);
                let _ = self
                    .event_tx
                    .send(DiscoveryEvent::DeviceDisconnected(device.key.clone()));
            }
        }

        if let Some(secs) = self.stale_after_secs {
            let event_tx = &self.event_tx;
            devices.retain(|key, device| {
                if device.status.is_present() || !device.is_stale(secs) {
                    return true;
                }
                info!(device = %key, "Removing stale device");
                let _ = event_tx.send(DiscoveryEvent::DeviceRemoved(key.clone()));
                false
            });
        }

        let total = devices.len();
        let _ = self.event_tx.send(DiscoveryEvent::ScanCompleted {
            found: scanned.len(),
            total,
        });
        debug!(found = scanned.len(), total, "Scan complete");

        Ok(scanned)
    }
}
