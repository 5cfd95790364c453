//! Schema identity: BLDS construction and BLAKE2b-256 fingerprinting
//! (spec §4.7).
//!
//! Every public payload type (flex-zone type, datablock type) is registered
//! with a deterministic textual encoding of its fields in declaration order.
//! The producer stores the resulting hash in the header; the consumer
//! recomputes its own and the two must match before attach succeeds.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

/// A BLAKE2b-256 digest.
pub type Hash32 = [u8; 32];

/// Basic Layout Description String: `name:typecode` pairs in field order,
/// joined with `;`. Deterministic within a process and across processes
/// compiled from the same source.
#[derive(Debug, Clone, Default)]
pub struct Blds {
    fields: Vec<(&'static str, &'static str)>,
}

impl Blds {
    /// Start building a BLDS.
    pub fn builder() -> Self {
        Self::default()
    }

    /// Register one field in declaration order.
    pub fn field(mut self, name: &'static str, type_code: &'static str) -> Self {
        self.fields.push((name, type_code));
        self
    }

    /// Render the deterministic textual encoding.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (i, (name, code)) in self.fields.iter().enumerate() {
            if i > 0 {
                out.push(';');
            }
            out.push_str(name);
            out.push(':');
            out.push_str(code);
        }
        out
    }

    /// BLAKE2b-256 hash of the encoded BLDS.
    pub fn hash(&self) -> Hash32 {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(self.encode().as_bytes());
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        out
    }
}

/// Semantic version packed the way spec §3.1/§6.1 requires:
/// `(major << 22) | (minor << 12) | patch`, major:10 minor:10 patch:12 bits.
pub fn pack_version(major: u16, minor: u16, patch: u16) -> u32 {
    debug_assert!(major < 1 << 10);
    debug_assert!(minor < 1 << 10);
    debug_assert!(patch < 1 << 12);
    ((major as u32) << 22) | ((minor as u32) << 12) | (patch as u32 & 0xFFF)
}

/// Unpack a `(major, minor, patch)` triple.
pub fn unpack_version(packed: u32) -> (u16, u16, u16) {
    let major = (packed >> 22) as u16 & 0x3FF;
    let minor = (packed >> 12) as u16 & 0x3FF;
    let patch = packed as u16 & 0xFFF;
    (major, minor, patch)
}

/// Schema identity for one registered type: its BLDS hash plus version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaInfo {
    /// BLAKE2b-256 of the type's BLDS.
    pub hash: Hash32,
    /// Packed `(major, minor, patch)`.
    pub version: u32,
}

impl SchemaInfo {
    /// Build schema info from an explicit BLDS and version triple.
    pub fn new(blds: &Blds, major: u16, minor: u16, patch: u16) -> Self {
        Self {
            hash: blds.hash(),
            version: pack_version(major, minor, patch),
        }
    }

    /// Major version component. Spec requires this to match exactly between
    /// producer and consumer; minor/patch are informational only.
    pub fn major(&self) -> u16 {
        unpack_version(self.version).0
    }
}

/// Marker for payload and flex-zone types usable with DataHub.
///
/// Implementors must be trivially copyable: flat POD with no internal
/// pointers, vtables, or OS handles, since the bytes are shared across
/// process boundaries verbatim. There's no way to statically assert this
/// from safe Rust alone, so the trait is unsafe to implement: the
/// implementor attests to the layout being safe to copy between address
/// spaces.
///
/// # Safety
/// The implementing type must not contain pointers, references, trait
/// objects, or any value whose validity depends on the address space it was
/// created in.
pub unsafe trait DataBlockSchema: Copy + 'static {
    /// Deterministic field-layout description for this type.
    fn blds() -> Blds;

    /// Semantic version of this type's layout.
    fn schema_version() -> (u16, u16, u16);

    /// Convenience accessor combining [`Self::blds`] and
    /// [`Self::schema_version`].
    fn schema_info() -> SchemaInfo {
        let (major, minor, patch) = Self::schema_version();
        SchemaInfo::new(&Self::blds(), major, minor, patch)
    }
}
