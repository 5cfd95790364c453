//! Background health monitoring and alerting over segments known to a
//! broker (spec §6.4's diagnostic surface, run continuously rather than
//! on demand). Generalizes `evo_shared_memory::monitoring::MemoryMonitor`'s
//! alert/cooldown/history machinery from system-wide memory pressure to
//! per-segment integrity and liveness.

use crate::broker::BrokerClient;
use crate::diagnostics::{self, IntegrityReport};
use crate::error::{DataHubError, DataHubResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};
use std::time::{Duration, SystemTime};

/// Configuration for the segment health monitor.
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    /// Interval between health-check cycles.
    pub check_interval: Duration,
    /// Checksum failures observed in one cycle before raising an alert.
    pub checksum_failure_threshold: u64,
    /// Minimum time between repeats of the same alert type for the same
    /// segment.
    pub alert_cooldown: Duration,
    /// Maximum number of historical snapshots kept per segment.
    pub history_size: usize,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            checksum_failure_threshold: 1,
            alert_cooldown: Duration::from_secs(60),
            history_size: 200,
        }
    }
}

/// Alert types the monitor can raise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertType {
    /// The producer's heartbeat went stale and the OS liveness probe
    /// confirms the process is gone.
    ProducerDead,
    /// One or more stored checksums didn't match recomputed payload bytes.
    ChecksumFailure,
    /// The header's magic or checksum looked corrupt.
    HeaderCorrupt,
    /// A consumer attached with a mismatched schema fingerprint.
    SchemaMismatch,
}

/// Alert severity levels.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertSeverity {
    /// Informational only.
    Info,
    /// Needs attention but not urgent.
    Warning,
    /// Needs action.
    Error,
    /// Segment is unsafe to keep using.
    Critical,
}

/// One raised alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Which kind of condition triggered this alert.
    pub alert_type: AlertType,
    /// How severe.
    pub severity: AlertSeverity,
    /// Human-readable detail.
    pub message: String,
    /// The segment this alert concerns.
    pub segment_name: String,
    /// When it was generated.
    pub timestamp: SystemTime,
}

/// Receives alerts as the monitor raises them.
pub trait AlertHandler: Send + Sync {
    /// Handle one alert.
    fn handle_alert(&self, alert: &Alert) -> DataHubResult<()>;
}

/// Prints alerts to stdout.
pub struct ConsoleAlertHandler;

impl AlertHandler for ConsoleAlertHandler {
    fn handle_alert(&self, alert: &Alert) -> DataHubResult<()> {
        println!(
            "[{}] {:?} ({}): {}",
            alert
                .timestamp
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            alert.severity,
            alert.segment_name,
            alert.message
        );
        Ok(())
    }
}

/// Appends alerts as JSON lines to a log file.
pub struct LogFileAlertHandler {
    log_path: String,
}

impl LogFileAlertHandler {
    /// Log to the given path, creating it if needed.
    pub fn new(log_path: String) -> Self {
        Self { log_path }
    }
}

impl AlertHandler for LogFileAlertHandler {
    fn handle_alert(&self, alert: &Alert) -> DataHubResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        let json = serde_json::to_string(alert)?;
        writeln!(file, "{json}").map_err(DataHubError::from)?;
        Ok(())
    }
}

/// A point-in-time health snapshot for one segment.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    /// Segment name.
    pub name: String,
    /// Result of the last integrity check.
    pub report: IntegrityReport,
    /// When the snapshot was taken.
    pub timestamp: SystemTime,
}

/// Watches every segment a broker knows about, periodically validating
/// integrity and raising alerts through registered handlers.
pub struct SegmentMonitor<B: BrokerClient> {
    broker: B,
    config: MonitoringConfig,
    running: Arc<AtomicBool>,
    history: Arc<Mutex<HashMap<String, VecDeque<HealthSnapshot>>>>,
    alert_handlers: Vec<Box<dyn AlertHandler>>,
    last_alert_times: Arc<Mutex<HashMap<(String, AlertType), SystemTime>>>,
    total_alerts: AtomicU64,
    cycles_completed: AtomicU64,
}

impl<B: BrokerClient> SegmentMonitor<B> {
    /// Build a monitor over the given broker with default configuration.
    pub fn new(broker: B) -> Self {
        Self::with_config(broker, MonitoringConfig::default())
    }

    /// Build a monitor with explicit configuration.
    pub fn with_config(broker: B, config: MonitoringConfig) -> Self {
        Self {
            broker,
            config,
            running: Arc::new(AtomicBool::new(false)),
            history: Arc::new(Mutex::new(HashMap::new())),
            alert_handlers: Vec::new(),
            last_alert_times: Arc::new(Mutex::new(HashMap::new())),
            total_alerts: AtomicU64::new(0),
            cycles_completed: AtomicU64::new(0),
        }
    }

    /// Register a handler to receive future alerts.
    pub fn add_alert_handler(&mut self, handler: Box<dyn AlertHandler>) {
        self.alert_handlers.push(handler);
    }

    /// Whether [`Self::stop`] has not yet been called since the last start.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stop the monitor; a thread spawned by `start` (if any) exits at its
    /// next cycle boundary.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Total alerts raised since construction.
    pub fn total_alerts(&self) -> u64 {
        self.total_alerts.load(Ordering::Relaxed)
    }

    /// Total health-check cycles completed.
    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    /// Run one health-check cycle synchronously: list segments from the
    /// broker, attach read-only to each, validate integrity, and raise
    /// alerts for anything concerning.
    pub fn run_cycle(&self) -> DataHubResult<()> {
        for record in self.broker.list()? {
            if !crate::platform::is_process_alive(record.producer_pid) {
                self.raise(
                    &record.name,
                    AlertType::ProducerDead,
                    AlertSeverity::Critical,
                    format!("producer pid {} is no longer alive", record.producer_pid),
                )?;
                continue;
            }

            let segment = match crate::segment::Segment::attach(&record.name, Duration::from_millis(10))
            {
                Ok(s) => s,
                Err(_) => continue,
            };

            let report = diagnostics::integrity_validate(&segment);
            if !report.header_ok {
                self.raise(
                    &record.name,
                    AlertType::HeaderCorrupt,
                    AlertSeverity::Critical,
                    "segment header failed magic validation".into(),
                )?;
            }
            if report.checksum_failures as u64 >= self.config.checksum_failure_threshold {
                self.raise(
                    &record.name,
                    AlertType::ChecksumFailure,
                    AlertSeverity::Error,
                    format!("{} checksum failures observed", report.checksum_failures),
                )?;
            }

            let snapshot = HealthSnapshot {
                name: record.name.clone(),
                report,
                timestamp: SystemTime::now(),
            };
            let mut history = self.history.lock().unwrap();
            let entry = history.entry(record.name.clone()).or_default();
            if entry.len() >= self.config.history_size {
                entry.pop_front();
            }
            entry.push_back(snapshot);
        }

        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Historical snapshots recorded for one segment, oldest first.
    pub fn history_for(&self, name: &str) -> Vec<HealthSnapshot> {
        self.history
            .lock()
            .unwrap()
            .get(name)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn raise(
        &self,
        segment_name: &str,
        alert_type: AlertType,
        severity: AlertSeverity,
        message: String,
    ) -> DataHubResult<()> {
        let key = (segment_name.to_string(), alert_type.clone());
        let now = SystemTime::now();
        {
            let mut last_times = self.last_alert_times.lock().unwrap();
            if let Some(last) = last_times.get(&key) {
                if now.duration_since(*last).unwrap_or(Duration::ZERO) < self.config.alert_cooldown {
                    return Ok(());
                }
            }
            last_times.insert(key, now);
        }

        let alert = Alert {
            alert_type,
            severity,
            message,
            segment_name: segment_name.to_string(),
            timestamp: now,
        };

        for handler in &self.alert_handlers {
            handler.handle_alert(&alert)?;
        }
        self.total_alerts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Clone for HealthSnapshot {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            report: self.report.clone(),
            timestamp: self.timestamp,
        }
    }
}
