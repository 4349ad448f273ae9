//! Stable assignment of entities to chunks.
//!
//! The mapping must not change between processes, platforms or releases: the reorganize,
//! commit, validation and query phases run independently and all rely on an entity landing in
//! the same chunk. The hash is FNV-1a over the identifier bytes followed by the splitmix64
//! finalizer, which spreads the low bits used by the modulo reduction.

use serde::Serialize;

use crate::bail;
use crate::error::{ErrorKind, LakeResult};
use crate::types::ChunkId;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Returns the stable 64-bit hash of an entity identifier.
pub fn entity_hash(entity_id: &str) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in entity_id.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }

    splitmix64(hash)
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Maps `entity_id` to its chunk in `[0, chunk_count)`.
///
/// Fails with [`ErrorKind::HashConfigError`] when `chunk_count` is zero.
pub fn chunk_of(entity_id: &str, chunk_count: u32) -> LakeResult<ChunkId> {
    Ok(EntityHasher::new(chunk_count)?.chunk_of(entity_id))
}

/// Hasher bound to a validated chunk count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityHasher {
    chunk_count: u32,
}

impl EntityHasher {
    pub fn new(chunk_count: u32) -> LakeResult<Self> {
        if chunk_count == 0 {
            bail!(
                ErrorKind::HashConfigError,
                "Invalid chunk count",
                "chunk count must be greater than zero"
            );
        }

        Ok(Self { chunk_count })
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    pub fn chunk_of(&self, entity_id: &str) -> ChunkId {
        ChunkId((entity_hash(entity_id) % u64::from(self.chunk_count)) as u32)
    }
}

/// Number of chunks needed to hold `entity_count` entities at `chunk_size` entities per chunk.
pub fn derive_chunk_count(entity_count: u64, chunk_size: u32) -> LakeResult<u32> {
    if chunk_size == 0 {
        bail!(
            ErrorKind::HashConfigError,
            "Invalid chunk size",
            "chunk size must be greater than zero"
        );
    }

    let chunks = entity_count.div_ceil(u64::from(chunk_size)).max(1);
    match u32::try_from(chunks) {
        Ok(chunks) => Ok(chunks),
        Err(_) => bail!(
            ErrorKind::HashConfigError,
            "Derived chunk count is too large",
            format!("{entity_count} entities at {chunk_size} per chunk")
        ),
    }
}

/// Distribution of entities over chunks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SkewStats {
    pub mean: f64,
    pub max: u64,
    pub max_chunk: ChunkId,
    /// `max / mean`; 1.0 is a perfectly even distribution.
    pub ratio: f64,
}

impl SkewStats {
    /// Computes skew over per-chunk entity counts. Returns `None` when there is no entity.
    pub fn from_counts<I>(counts: I) -> Option<SkewStats>
    where
        I: IntoIterator<Item = (ChunkId, u64)>,
    {
        let mut total = 0u64;
        let mut chunks = 0u64;
        let mut largest: Option<(ChunkId, u64)> = None;

        for (chunk, count) in counts {
            total += count;
            chunks += 1;
            if largest.is_none_or(|(_, max)| count > max) {
                largest = Some((chunk, count));
            }
        }

        let (max_chunk, max) = largest?;
        if total == 0 {
            return None;
        }

        let mean = total as f64 / chunks as f64;
        Some(SkewStats {
            mean,
            max,
            max_chunk,
            ratio: max as f64 / mean,
        })
    }

    pub fn exceeds(&self, threshold: f64) -> bool {
        self.ratio > threshold
    }
}
