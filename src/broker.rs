//! Broker client interface (spec §6.2): registration and discovery of
//! segments, consumed as a collaborator rather than implemented as a
//! network service by this crate. Generalizes
//! `evo_shared_memory::discovery::SegmentDiscovery`'s filesystem-scan
//! approach into a trait with one local, file-backed implementation.

use crate::error::{DataHubError, DataHubResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

/// Everything the broker knows about one registered segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentRecord {
    /// Segment name.
    pub name: String,
    /// Producer's OS pid at registration time.
    pub producer_pid: u32,
    /// When the segment was registered.
    pub registered_at: SystemTime,
    /// Consumers currently registered against this segment.
    pub consumers: Vec<u32>,
}

/// Lifecycle events a broker can emit to interested parties (spec §6.2).
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    /// A new segment was registered.
    SegmentRegistered(SegmentRecord),
    /// A segment was deregistered (producer shut down cleanly).
    SegmentDeregistered(String),
    /// A consumer registered against a known segment.
    ConsumerJoined { segment: String, pid: u32 },
}

/// Minimal broker surface this crate depends on. A real deployment is
/// expected to implement this against a networked registry; [`LocalBroker`]
/// is the only implementation this crate ships, backed by a JSON file
/// under `/dev/shm`, suitable for single-host use and tests.
pub trait BrokerClient {
    /// Register a newly created segment.
    fn register(&self, name: &str, producer_pid: u32) -> DataHubResult<()>;

    /// Discover a previously registered segment by name.
    fn discover(&self, name: &str) -> DataHubResult<Option<SegmentRecord>>;

    /// List every segment currently known to the broker.
    fn list(&self) -> DataHubResult<Vec<SegmentRecord>>;

    /// Register a consumer against a known segment.
    fn register_consumer(&self, name: &str, consumer_pid: u32) -> DataHubResult<()>;

    /// Remove a segment's registration (producer shutdown).
    fn deregister(&self, name: &str) -> DataHubResult<()>;

    /// Drain events accumulated since the last call.
    fn poll_events(&self) -> Vec<BrokerEvent>;
}

/// A broker backed by a single JSON file under `/dev/shm`, guarded by an
/// in-process mutex. Not crash-safe across multiple producing processes
/// writing concurrently to the same file; adequate for the single-host,
/// cooperative-process deployments this crate targets.
pub struct LocalBroker {
    path: String,
    events: Mutex<Vec<BrokerEvent>>,
}

impl LocalBroker {
    /// Open (or create) the broker registry file at the default location.
    pub fn new() -> Self {
        Self::at_path("/dev/shm/datahub_broker.json".to_string())
    }

    /// Open (or create) the broker registry file at an explicit path,
    /// primarily for tests that need isolation between runs.
    pub fn at_path(path: String) -> Self {
        Self {
            path,
            events: Mutex::new(Vec::new()),
        }
    }

    fn load(&self) -> HashMap<String, SegmentRecord> {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    fn save(&self, records: &HashMap<String, SegmentRecord>) -> DataHubResult<()> {
        let json = serde_json::to_string_pretty(records)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    fn push_event(&self, event: BrokerEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerClient for LocalBroker {
    fn register(&self, name: &str, producer_pid: u32) -> DataHubResult<()> {
        let mut records = self.load();
        if records.contains_key(name) {
            return Err(DataHubError::AlreadyExists { name: name.into() });
        }
        let record = SegmentRecord {
            name: name.to_string(),
            producer_pid,
            registered_at: SystemTime::now(),
            consumers: Vec::new(),
        };
        records.insert(name.to_string(), record.clone());
        self.save(&records)?;
        self.push_event(BrokerEvent::SegmentRegistered(record));
        Ok(())
    }

    fn discover(&self, name: &str) -> DataHubResult<Option<SegmentRecord>> {
        Ok(self.load().get(name).cloned())
    }

    fn list(&self) -> DataHubResult<Vec<SegmentRecord>> {
        Ok(self.load().into_values().collect())
    }

    fn register_consumer(&self, name: &str, consumer_pid: u32) -> DataHubResult<()> {
        let mut records = self.load();
        let record = records
            .get_mut(name)
            .ok_or_else(|| DataHubError::NotFound { name: name.into() })?;
        if !record.consumers.contains(&consumer_pid) {
            record.consumers.push(consumer_pid);
        }
        self.save(&records)?;
        self.push_event(BrokerEvent::ConsumerJoined {
            segment: name.to_string(),
            pid: consumer_pid,
        });
        Ok(())
    }

    fn deregister(&self, name: &str) -> DataHubResult<()> {
        let mut records = self.load();
        if records.remove(name).is_some() {
            self.save(&records)?;
            self.push_event(BrokerEvent::SegmentDeregistered(name.to_string()));
        }
        Ok(())
    }

    fn poll_events(&self) -> Vec<BrokerEvent> {
        std::mem::take(&mut self.events.lock().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_path(tag: &str) -> String {
        format!("/dev/shm/datahub_broker_test_{tag}_{}.json", std::process::id())
    }

    #[test]
    fn register_then_discover() {
        let path = unique_path("discover");
        let broker = LocalBroker::at_path(path.clone());
        broker.register("alpha", 111).unwrap();

        let found = broker.discover("alpha").unwrap().unwrap();
        assert_eq!(found.producer_pid, 111);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn double_register_fails() {
        let path = unique_path("dupe");
        let broker = LocalBroker::at_path(path.clone());
        broker.register("beta", 1).unwrap();
        assert!(matches!(
            broker.register("beta", 2).unwrap_err(),
            DataHubError::AlreadyExists { .. }
        ));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn consumer_registration_tracks_pids() {
        let path = unique_path("consumer");
        let broker = LocalBroker::at_path(path.clone());
        broker.register("gamma", 1).unwrap();
        broker.register_consumer("gamma", 55).unwrap();

        let record = broker.discover("gamma").unwrap().unwrap();
        assert_eq!(record.consumers, vec![55]);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn deregister_removes_record_and_emits_event() {
        let path = unique_path("deregister");
        let broker = LocalBroker::at_path(path.clone());
        broker.register("delta", 1).unwrap();
        broker.deregister("delta").unwrap();
        assert!(broker.discover("delta").unwrap().is_none());

        let events = broker.poll_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, BrokerEvent::SegmentDeregistered(n) if n == "delta")));
        let _ = std::fs::remove_file(path);
    }
}
