//! Error taxonomy for the shared-memory data exchange hub.
//!
//! Errors are split the way spec §7 lays out: validation failures are fatal
//! and surface here; expected runtime conditions (timeout, no data, stale
//! read) are returned as dedicated `Result`-like enums from the slot and
//! transaction layers instead of through this type, so that iterators can
//! tell "keep going" apart from "stop".

use thiserror::Error;

/// Errors that can occur while creating, attaching to, or operating on a
/// DataBlock segment.
#[derive(Error, Debug)]
pub enum DataHubError {
    /// Segment configuration failed validation (spec §6.3).
    #[error("invalid config: {reason}")]
    InvalidConfig {
        /// Human-readable reason.
        reason: String,
    },

    /// A segment with this name already exists.
    #[error("segment already exists: {name}")]
    AlreadyExists {
        /// Segment name.
        name: String,
    },

    /// No segment with this name could be found.
    #[error("segment not found: {name}")]
    NotFound {
        /// Segment name.
        name: String,
    },

    /// The segment's magic value, version, or shared secret did not match
    /// on attach.
    #[error("segment identity check failed for {name}: {reason}")]
    IdentityMismatch {
        /// Segment name.
        name: String,
        /// What failed to match.
        reason: String,
    },

    /// Consumer and producer schema fingerprints disagree at attach time
    /// (spec §4.7, scenario §8.4.4).
    #[error("schema mismatch on {name}: {which} hash differs")]
    SchemaMismatch {
        /// Segment name.
        name: String,
        /// Which region's schema differed.
        which: SchemaRegion,
    },

    /// The stored full-header checksum does not match the header contents.
    #[error("header checksum mismatch for {name}")]
    HeaderCorrupt {
        /// Segment name.
        name: String,
    },

    /// The producer never completed initialization within the attach
    /// timeout.
    #[error("producer did not complete segment initialization for {name}")]
    InitTimeout {
        /// Segment name.
        name: String,
    },

    /// The consumer heartbeat table has no free slots (spec §8.3).
    #[error("consumer heartbeat table full for {name}")]
    HeartbeatTableFull {
        /// Segment name.
        name: String,
    },

    /// Layout constraints from spec §4.2 were violated.
    #[error("invalid segment layout: {reason}")]
    InvalidLayout {
        /// Human-readable reason.
        reason: String,
    },

    /// An operational failure that invalidates the handle: the segment was
    /// destroyed out from under us, or a fatal protocol violation occurred.
    #[error("operational failure on {name}: {reason}")]
    Operational {
        /// Segment name.
        name: String,
        /// Human-readable reason.
        reason: String,
    },

    /// The broker could not be reached (spec §6.2, consumed collaborator).
    #[error("broker unreachable: {reason}")]
    BrokerUnreachable {
        /// Human-readable reason.
        reason: String,
    },

    /// IO error.
    #[error("IO error: {source}")]
    Io {
        /// Source IO error.
        #[from]
        source: std::io::Error,
    },

    /// Nix system call error.
    #[error("system call error: {source}")]
    Nix {
        /// Source nix error.
        #[from]
        source: nix::Error,
    },

    /// JSON serialization/deserialization error (broker registration, slot
    /// diagnostics reports).
    #[error("JSON error: {source}")]
    Json {
        /// Source JSON error.
        #[from]
        source: serde_json::Error,
    },
}

/// Which schema region a [`DataHubError::SchemaMismatch`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaRegion {
    /// The flex-zone type's schema fingerprint.
    FlexZone,
    /// The ring-buffer payload type's schema fingerprint.
    DataBlock,
}

impl std::fmt::Display for SchemaRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaRegion::FlexZone => write!(f, "flex-zone"),
            SchemaRegion::DataBlock => write!(f, "datablock"),
        }
    }
}

/// Result type for DataHub operations.
pub type DataHubResult<T> = Result<T, DataHubError>;
