//! C6 — the capture manager: reconciles the desired set of interfaces
//! against the running engines, using a `regex`-based autodetect matcher in
//! place of a fixed interface list (spec.md §4.6, §6 `interfaces` config).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::RwLock;
use regex::Regex;
use tracing::{info, warn};

use super::engine::{self, EngineHandle, EngineStatsSnapshot};
use super::ringbuffer::RingBufferPool;
use super::source::PacketSource;
use super::CaptureError;
use crate::config::CaptureConfig;
use crate::writeout::{TaggedMap, WriteoutSink};

/// One entry in the interface → engine registry.
struct Managed {
    handle: Arc<EngineHandle>,
    config: CaptureConfig,
}

/// The per-interface result of a [`CaptureManager::update`] call, stably
/// sorted by interface name (spec.md §4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfaceChange {
    pub name: String,
    pub success: bool,
    pub error: Option<String>,
}

pub type IfaceChanges = Vec<IfaceChange>;

/// Owns the live interface → capture engine map. Reads (status, rotate) take
/// the read lock; only add/remove/update take the write lock, mirroring the
/// registry pattern used elsewhere in this crate for infrequently-mutated,
/// frequently-read shared state. No lock is held across an `.await` into a
/// capture task (spec.md §5 "concurrency").
pub struct CaptureManager {
    engines: RwLock<HashMap<String, Managed>>,
    pool: Arc<RingBufferPool>,
    writeout: Arc<dyn WriteoutSink>,
}

#[derive(Debug, Clone)]
pub struct InterfaceStatus {
    pub iface: String,
    pub stats: EngineStatsSnapshot,
}

impl CaptureManager {
    pub fn new(pool: Arc<RingBufferPool>, writeout: Arc<dyn WriteoutSink>) -> Arc<Self> {
        Arc::new(Self {
            engines: RwLock::new(HashMap::new()),
            pool,
            writeout,
        })
    }

    pub fn active_interfaces(&self) -> Vec<String> {
        self.engines.read().keys().cloned().collect()
    }

    pub fn status(&self) -> Vec<InterfaceStatus> {
        self.engines
            .read()
            .iter()
            .map(|(iface, managed)| InterfaceStatus {
                iface: iface.clone(),
                stats: managed.handle.stats(),
            })
            .collect()
    }

    /// Starts capture on `iface` using `make_source` to construct the
    /// concrete [`PacketSource`], unless it is already running.
    pub fn add_interface<S, F>(
        &self,
        iface: &str,
        config: CaptureConfig,
        make_source: F,
    ) -> Result<(), CaptureError>
    where
        S: PacketSource + 'static,
        F: FnOnce(&str) -> S,
    {
        let mut guard = self.engines.write();
        if guard.contains_key(iface) {
            return Ok(());
        }
        let source = make_source(iface);
        let handle = Arc::new(engine::spawn(iface, source));
        info!(iface, "capture engine started");
        guard.insert(iface.to_string(), Managed { handle, config });
        Ok(())
    }

    /// Stops `iface`, first draining whatever it has accumulated with one
    /// final rotation so that data is not silently lost (spec.md §4.6,
    /// "perform one final rotation").
    pub async fn remove_interface(&self, iface: &str, unblock: impl Fn()) -> Result<(), CaptureError> {
        let handle = {
            let guard = self.engines.read();
            guard
                .get(iface)
                .map(|m| Arc::clone(&m.handle))
                .ok_or_else(|| CaptureError::UnknownInterface(iface.to_string()))?
        };
        self.rotate_one(iface, &handle).await;

        let mut guard = self.engines.write();
        let managed = guard
            .remove(iface)
            .ok_or_else(|| CaptureError::UnknownInterface(iface.to_string()))?;
        drop(guard);
        // `handle` above still holds an Arc; drop it before consuming the
        // only other owner by value so `stop` doesn't have to block on a
        // reference count it can never bring to one.
        drop(handle);
        match Arc::try_unwrap(managed.handle) {
            Ok(handle) => handle.stop(unblock),
            Err(handle) => {
                unblock();
                drop(handle);
            }
        }
        info!(iface, "capture engine stopped");
        Ok(())
    }

    /// Reconciles `desired` (explicit names, or regex patterns when
    /// `autodetect` is set) against `available` devices, starting, stopping,
    /// and restarting engines as needed, and returns the per-interface
    /// outcome stably sorted by name (spec.md §4.6).
    pub async fn update<S, F>(
        &self,
        desired: &[String],
        autodetect: bool,
        available: &[String],
        configs: &HashMap<String, CaptureConfig>,
        make_source: F,
    ) -> Result<IfaceChanges, CaptureError>
    where
        S: PacketSource + 'static,
        F: Fn(&str) -> S,
    {
        let wanted = if autodetect {
            resolve_patterns(desired, available)?
        } else {
            desired.to_vec()
        };
        let autodetect_template = configs.get("autodetect").cloned().unwrap_or_default();
        let config_for = |iface: &str| -> CaptureConfig {
            if autodetect {
                autodetect_template.clone()
            } else {
                configs.get(iface).cloned().unwrap_or_default()
            }
        };

        let current: Vec<String> = self.active_interfaces();
        let mut changes: HashMap<String, IfaceChange> = HashMap::new();

        for iface in &current {
            if !wanted.contains(iface) {
                let result = self.remove_interface(iface, || {}).await;
                changes.insert(iface.clone(), outcome(iface, result));
            }
        }

        for iface in &wanted {
            let desired_config = config_for(iface);
            let changed_config = self
                .engines
                .read()
                .get(iface)
                .map(|managed| managed.config != desired_config);

            match changed_config {
                None => {
                    // not running yet: spawn.
                    let result = self.add_interface(iface, desired_config, |name| make_source(name));
                    changes.insert(iface.clone(), outcome(iface, result));
                }
                Some(false) => {
                    // running, identical config: no action.
                    changes.insert(
                        iface.clone(),
                        IfaceChange { name: iface.clone(), success: true, error: None },
                    );
                }
                Some(true) => {
                    // running, changed config: stop (with final rotation)
                    // and respawn.
                    if let Err(err) = self.remove_interface(iface, || {}).await {
                        changes.insert(iface.clone(), outcome(iface, Err(err)));
                        continue;
                    }
                    let result = self.add_interface(iface, desired_config, |name| make_source(name));
                    changes.insert(iface.clone(), outcome(iface, result));
                }
            }
        }

        let mut out: IfaceChanges = changes.into_values().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Drives a three-point lock against each of `ifaces` (in parallel),
    /// tags every resulting flow map with its interface name and this
    /// sweep's timestamp, and delivers them to the writeout sink in one
    /// batch (spec.md §4.6 `rotate(ifaces...)`).
    pub async fn rotate(&self, ifaces: &[String]) -> Vec<(String, Result<(), CaptureError>)> {
        let rotation_ts = Utc::now();
        let targets: Vec<(String, Arc<EngineHandle>)> = {
            let guard = self.engines.read();
            ifaces
                .iter()
                .filter_map(|name| guard.get(name).map(|m| (name.clone(), Arc::clone(&m.handle))))
                .collect()
        };

        let pool = Arc::clone(&self.pool);
        let rotated = join_all(targets.into_iter().map(|(iface, handle)| {
            let pool = Arc::clone(&pool);
            async move {
                let result = tokio::task::spawn_blocking(move || handle.rotate(&pool))
                    .await
                    .unwrap_or_else(|_| Err(CaptureError::LockTimeout(iface.clone())));
                (iface, result)
            }
        }))
        .await;

        let mut tagged = Vec::new();
        let mut outcomes = Vec::new();
        for (iface, result) in rotated {
            match result {
                Ok(output) => {
                    tagged.push(TaggedMap { iface: iface.clone(), map: output.map, stats: output.stats });
                    outcomes.push((iface, Ok(())));
                }
                Err(err) => {
                    warn!(iface, %err, "rotation failed");
                    outcomes.push((iface, Err(err)));
                }
            }
        }
        if !tagged.is_empty() {
            self.writeout.handle_writeout(rotation_ts, tagged).await;
        }
        outcomes
    }

    /// Convenience wrapper over [`Self::rotate`] against every active
    /// interface — the manager's periodic rotation timer uses this.
    pub async fn rotate_all(&self) -> Vec<(String, Result<(), CaptureError>)> {
        let ifaces = self.active_interfaces();
        self.rotate(&ifaces).await
    }

    /// Single-interface rotation used by `remove_interface`'s "final
    /// rotation" step. Errors are logged, not propagated: a rotation
    /// failure must not block removing an interface the caller no longer
    /// wants.
    async fn rotate_one(&self, iface: &str, handle: &Arc<EngineHandle>) {
        let rotation_ts = Utc::now();
        let pool = Arc::clone(&self.pool);
        let handle = Arc::clone(handle);
        let iface_owned = iface.to_string();
        let result = tokio::task::spawn_blocking(move || handle.rotate(&pool))
            .await
            .unwrap_or_else(|_| Err(CaptureError::LockTimeout(iface_owned)));
        match result {
            Ok(output) => {
                self.writeout
                    .handle_writeout(
                        rotation_ts,
                        vec![TaggedMap { iface: iface.to_string(), map: output.map, stats: output.stats }],
                    )
                    .await;
            }
            Err(err) => warn!(iface, %err, "final rotation before removal failed"),
        }
    }
}

fn outcome(name: &str, result: Result<(), CaptureError>) -> IfaceChange {
    match result {
        Ok(()) => IfaceChange { name: name.to_string(), success: true, error: None },
        Err(err) => IfaceChange { name: name.to_string(), success: false, error: Some(err.to_string()) },
    }
}

/// Expands `patterns` (literal names or regexes) against `available` device
/// names, per spec.md's autodetect config knob.
fn resolve_patterns(patterns: &[String], available: &[String]) -> Result<Vec<String>, CaptureError> {
    let mut out = Vec::new();
    for pattern in patterns {
        let re = Regex::new(pattern)
            .map_err(|_| CaptureError::NoMatchingDevice(pattern.clone()))?;
        let mut matched_any = false;
        for dev in available {
            if re.is_match(dev) && !out.contains(dev) {
                out.push(dev.clone());
                matched_any = true;
            }
        }
        if !matched_any {
            return Err(CaptureError::NoMatchingDevice(pattern.clone()));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::source::SyntheticSource;
    use crate::writeout::InMemoryWriteoutSink;

    fn manager(num_buffers: usize) -> (Arc<CaptureManager>, Arc<InMemoryWriteoutSink>) {
        let pool = Arc::new(RingBufferPool::new(num_buffers, 4096));
        let sink = Arc::new(InMemoryWriteoutSink::new());
        let mgr = CaptureManager::new(pool, sink.clone());
        (mgr, sink)
    }

    #[tokio::test]
    async fn add_and_remove_interface_round_trip() {
        let (manager, _sink) = manager(2);
        manager
            .add_interface("eth0", CaptureConfig::default(), |name: &str| SyntheticSource::new(name))
            .unwrap();
        assert_eq!(manager.active_interfaces(), vec!["eth0".to_string()]);
        manager.remove_interface("eth0", || {}).await.unwrap();
        assert!(manager.active_interfaces().is_empty());
    }

    #[tokio::test]
    async fn remove_unknown_interface_errors() {
        let (manager, _sink) = manager(1);
        assert!(matches!(
            manager.remove_interface("eth9", || {}).await,
            Err(CaptureError::UnknownInterface(_))
        ));
    }

    #[tokio::test]
    async fn remove_interface_performs_final_rotation() {
        let (manager, sink) = manager(2);
        manager
            .add_interface("eth0", CaptureConfig::default(), |name: &str| SyntheticSource::new(name))
            .unwrap();
        manager.remove_interface("eth0", || {}).await.unwrap();
        let drained = sink.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].1[0].iface, "eth0");
    }

    #[tokio::test]
    async fn update_starts_stops_and_restarts_on_config_change() {
        let (manager, sink) = manager(4);
        let mut configs = HashMap::new();
        configs.insert("eth0".to_string(), CaptureConfig { promisc: false, ..Default::default() });
        configs.insert("eth1".to_string(), CaptureConfig::default());

        let changes = manager
            .update::<SyntheticSource, _>(
                &["eth0".to_string(), "eth1".to_string()],
                false,
                &[],
                &configs,
                |name: &str| SyntheticSource::new(name),
            )
            .await
            .unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.success));
        assert_eq!(
            manager.active_interfaces().into_iter().collect::<std::collections::HashSet<_>>(),
            ["eth0".to_string(), "eth1".to_string()].into_iter().collect()
        );

        // drop eth1, change eth0's config: eth1 should be removed (with a
        // final rotation) and eth0 should be restarted.
        configs.remove("eth1");
        configs.insert("eth0".to_string(), CaptureConfig { promisc: true, ..Default::default() });
        let changes = manager
            .update::<SyntheticSource, _>(&["eth0".to_string()], false, &[], &configs, |name: &str| SyntheticSource::new(name))
            .await
            .unwrap();
        assert_eq!(changes.iter().map(|c| c.name.clone()).collect::<Vec<_>>(), vec!["eth0", "eth1"]);
        assert_eq!(manager.active_interfaces(), vec!["eth0".to_string()]);
        // eth1's removal and eth0's restart both trigger a final rotation.
        assert_eq!(sink.drain().len(), 2);
    }

    #[tokio::test]
    async fn autodetect_matches_regex_against_available_devices() {
        let available = vec!["eth0".to_string(), "eth1".to_string(), "wlan0".to_string()];
        let matched = resolve_patterns(&["eth.*".to_string()], &available).unwrap();
        assert_eq!(matched, vec!["eth0".to_string(), "eth1".to_string()]);
    }

    #[tokio::test]
    async fn autodetect_errors_when_pattern_matches_nothing() {
        let available = vec!["eth0".to_string()];
        assert!(matches!(
            resolve_patterns(&["ppp.*".to_string()], &available),
            Err(CaptureError::NoMatchingDevice(_))
        ));
    }

    #[tokio::test]
    async fn rotate_delivers_tagged_maps_to_writeout_sink() {
        let (manager, sink) = manager(2);
        manager
            .add_interface("eth0", CaptureConfig::default(), |name: &str| SyntheticSource::new(name))
            .unwrap();
        let outcomes = manager.rotate_all().await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].1.is_ok());
        let drained = sink.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].1[0].iface, "eth0");
        manager.remove_interface("eth0", || {}).await.unwrap();
    }
}
