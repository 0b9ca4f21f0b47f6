//! Row form of a single ordered binary chunk.

use sqlx::FromRow;
use uuid::Uuid;

/// One chunk of a stored object's payload.
///
/// Chunks are written in arrival order; `n` is the 0-based sequence index
/// within the owning object.
#[derive(Clone, FromRow, Debug)]
pub struct ChunkRow {
    /// Owning object id.
    pub files_id: Uuid,

    /// Sequence index (0-based).
    pub n: i64,

    /// Raw payload bytes for this chunk.
    pub data: Vec<u8>,
}
