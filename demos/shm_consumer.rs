//! Minimal consumer: attaches to a segment created by `shm_producer` and
//! prints every value it observes until the producer stops committing.

use datahub::{Blds, DataBlockSchema, ConsumerHandle};
use std::time::Duration;

#[derive(Clone, Copy)]
#[repr(C)]
struct Reading {
    seq: u64,
    celsius_milli: i32,
}

unsafe impl DataBlockSchema for Reading {
    fn blds() -> Blds {
        Blds::builder().field("seq", "u64").field("celsius_milli", "i32")
    }
    fn schema_version() -> (u16, u16, u16) {
        (1, 0, 0)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    datahub::init_tracing();

    let secret: u64 = std::env::args()
        .nth(1)
        .expect("usage: shm_consumer <shared-secret>")
        .parse()?;

    let mut consumer = ConsumerHandle::<Reading>::attach("sensor_demo", secret, Duration::from_secs(2))?;
    println!("consumer attached: {}", consumer.name());

    loop {
        match consumer.next(Duration::from_secs(1)) {
            Ok(read) => {
                let reading = read.value()?;
                println!(
                    "seq={} celsius={:.3}",
                    reading.seq,
                    reading.celsius_milli as f64 / 1000.0
                );
            }
            Err(err) => {
                println!("no more commits ({err:?}); exiting");
                break;
            }
        }
    }

    Ok(())
}
