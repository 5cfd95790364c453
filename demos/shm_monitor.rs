//! Background monitor process: watches every segment a `LocalBroker`
//! knows about and prints alerts as producers die or slots fail checksum
//! verification.

use datahub::broker::{BrokerClient, LocalBroker};
use datahub::monitoring::{ConsoleAlertHandler, MonitoringConfig, SegmentMonitor};
use std::thread;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    datahub::init_tracing();

    let broker = LocalBroker::new();
    for record in broker.list()? {
        println!("known segment: {} (pid {})", record.name, record.producer_pid);
    }

    let config = MonitoringConfig {
        check_interval: Duration::from_secs(2),
        ..MonitoringConfig::default()
    };
    let mut monitor = SegmentMonitor::with_config(broker, config);
    monitor.add_alert_handler(Box::new(ConsoleAlertHandler));

    loop {
        monitor.run_cycle()?;
        println!(
            "cycle complete: {} alerts so far, {} cycles run",
            monitor.total_alerts(),
            monitor.cycles_completed()
        );
        thread::sleep(Duration::from_secs(2));
    }
}
