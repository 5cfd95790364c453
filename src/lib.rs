//! # DataHub: Shared Memory Data Exchange
//!
//! A single-producer, multi-consumer shared-memory IPC fabric for bulk
//! payload streaming, built around a lock-free-for-readers slot protocol
//! with crash-safe recovery.
//!
//! ## Features
//!
//! - **Single-Producer Multi-Consumer**: one process publishes, any number
//!   of processes attach as consumers under one of three sync policies.
//! - **Crash-Safe Locking**: the spin lock backing slot writes and segment
//!   management detects a dead holder via an OS liveness probe and
//!   reclaims ownership rather than deadlocking forever.
//! - **Schema Identity**: every payload type carries a BLAKE2b-256
//!   fingerprint of its field layout; producer and consumer must agree
//!   before a consumer is allowed to attach.
//! - **Heartbeat Liveness**: producer and consumer heartbeats gate the
//!   (comparatively expensive) OS liveness probe behind a cheap staleness
//!   check.
//! - **Recovery Diagnostics**: out-of-band tooling to inspect a segment's
//!   health and reclaim slots or locks left behind by a crashed peer,
//!   without needing a live handle.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────────────┐    ┌─────────────────┐
//! │  ProducerHandle  │    │      Shared Segment      │    │ ConsumerHandle  │
//! │                  │    │                          │    │                 │
//! │ WriteTransaction ├───►│ [Header|FlexZone|Slots]  ├───►│ ReadTransaction │
//! │                  │    │ commit_index / read_index│    │                 │
//! └─────────────────┘    │ Heartbeat Table           │    └─────────────────┘
//!                         └──────────────────────────┘            │
//!                                    │                             │
//!                         ┌──────────────────────────┐   ┌─────────────────┐
//!                         │ diagnostics / metrics     │   │ ConsumerHandle N│
//!                         │ (recovery tooling)        ├──►│                 │
//!                         └──────────────────────────┘   └─────────────────┘
//! ```
//!
//! ## Usage Patterns
//!
//! ### Basic Producer-Consumer
//!
//! ```rust,no_run
//! use datahub::config::{BlockPolicy, ChecksumPolicy, ConsumerSyncPolicy, DataBlockConfig, PhysicalPageSize};
//! use datahub::consumer::ConsumerHandle;
//! use datahub::producer::ProducerHandle;
//! use datahub::schema::{Blds, DataBlockSchema};
//! use std::time::Duration;
//!
//! #[derive(Clone, Copy)]
//! #[repr(C)]
//! struct Reading {
//!     celsius_milli: i32,
//! }
//!
//! unsafe impl DataBlockSchema for Reading {
//!     fn blds() -> Blds {
//!         Blds::builder().field("celsius_milli", "i32")
//!     }
//!     fn schema_version() -> (u16, u16, u16) {
//!         (1, 0, 0)
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = DataBlockConfig {
//!     physical_page_size: PhysicalPageSize::Page4Ki,
//!     logical_unit_size: 4096,
//!     ring_buffer_capacity: 8,
//!     flex_zone_size: 0,
//!     policy: BlockPolicy::RingBuffer,
//!     consumer_sync_policy: ConsumerSyncPolicy::SyncReader,
//!     checksum_policy: ChecksumPolicy::None,
//! };
//!
//! let mut producer = ProducerHandle::<Reading>::create("sensor_data", cfg)?;
//! let secret = producer.shared_secret();
//! let mut txn = producer.begin_write(Duration::from_millis(100))?;
//! txn.write_value(&Reading { celsius_milli: 25500 });
//! txn.commit()?;
//!
//! let mut consumer = ConsumerHandle::<Reading>::attach("sensor_data", secret, Duration::from_millis(100))?;
//! let read = consumer.next(Duration::from_millis(100))?;
//! let reading = read.value()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All fallible setup and attach operations return
//! `Result<T, DataHubError>`; expected runtime conditions (no slot ready,
//! a torn read) are returned from the slot/transaction layer as
//! [`slot::SlotError`] instead, so callers can tell "keep polling" apart
//! from "this segment is broken" (see [`error`]).
//!
//! ## Thread Safety
//!
//! - [`producer::ProducerHandle`]: not thread-safe; one producer per
//!   segment, matching the single-writer discipline the slot protocol is
//!   built around.
//! - [`consumer::ConsumerHandle`]: each handle is independent; many
//!   consumers, in many processes or threads, may attach concurrently.
//! - [`broker::LocalBroker`]: thread-safe for concurrent registration and
//!   discovery within one host.
//!
//! ## Platform Support
//!
//! Linux only today: segment creation relies on `/dev/shm`, liveness
//! checks on `kill(pid, 0)`, and lock ownership on Linux thread ids.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod broker;
pub mod config;
pub mod consumer;
pub mod diagnostics;
pub mod error;
pub mod header;
pub mod heartbeat;
pub mod metrics;
pub mod monitoring;
pub mod owner;
pub mod platform;
pub mod producer;
pub mod schema;
pub mod segment;
pub mod slot;
pub mod spinlock;

pub use broker::{BrokerClient, BrokerEvent, LocalBroker, SegmentRecord};
pub use config::{BlockPolicy, ChecksumPolicy, ConsumerSyncPolicy, DataBlockConfig, PhysicalPageSize};
pub use consumer::{ConsumerHandle, ReadTransaction};
pub use error::{DataHubError, DataHubResult};
pub use producer::{ProducerHandle, WriteTransaction};
pub use schema::{Blds, DataBlockSchema, SchemaInfo};
pub use segment::Segment;
pub use slot::{SlotError, SlotState};

/// BLAKE2b-256 over an arbitrary payload, used for per-slot and flex-zone
/// checksums (spec §4.4.1). Distinct from [`schema::Blds::hash`], which
/// hashes a type's layout description rather than its live bytes.
pub fn blake2_slot_hash(bytes: &[u8]) -> [u8; 32] {
    use blake2::digest::consts::U32;
    use blake2::{Blake2b, Digest};

    let mut hasher = Blake2b::<U32>::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Initialize tracing for RT-safe structured logging.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    #[test]
    fn slot_hash_is_deterministic() {
        let a = super::blake2_slot_hash(b"payload");
        let b = super::blake2_slot_hash(b"payload");
        assert_eq!(a, b);
    }

    #[test]
    fn slot_hash_differs_for_different_input() {
        let a = super::blake2_slot_hash(b"payload-a");
        let b = super::blake2_slot_hash(b"payload-b");
        assert_ne!(a, b);
    }
}
