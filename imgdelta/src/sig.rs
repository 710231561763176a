//! In-memory model of an image signature: an ordered manifest of hash regions
//! covering the allocated content of a previously captured image.

use crate::hash::{HashKind, MAX_DIGEST_LEN};

/// Default hash block size in sectors, 64 KiB worth of content.
pub const DEFAULT_HASH_BLOCK_SIZE: u32 = 128;

/// Chunk membership of a hash region. The wire encoding is an `i32` whose
/// sign bit flags a region whose data continues into the following chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkRef(i32);

impl ChunkRef {

    const SPAN_BIT: i32 = i32::MIN;

    /// Reference to the given chunk number, span flag clear.
    pub fn new(chunk_no: i32) -> Self {
        assert!(chunk_no >= 0, "negative chunk number");
        Self(chunk_no)
    }

    /// Rebuild a reference from its wire encoding.
    pub fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// The wire encoding.
    pub fn raw(self) -> i32 {
        self.0
    }

    /// The chunk holding the first sector of the region.
    pub fn number(self) -> i32 {
        self.0 & !Self::SPAN_BIT
    }

    /// Return true when the region's data continues into the next chunk.
    pub fn spans(self) -> bool {
        self.0 & Self::SPAN_BIT != 0
    }

    pub fn mark_spanning(&mut self) {
        self.0 |= Self::SPAN_BIT;
    }

}

/// One entry of a signature: a sector range plus the digest of its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashRegion {
    /// First sector of the region. Absolute disk coordinates in memory, the
    /// codec rebases from/to partition-relative coordinates.
    pub start: u64,
    /// Number of sectors, never zero, at most the signature's hash block size.
    pub size: u32,
    /// Image chunk holding this region's data.
    pub chunk: ChunkRef,
    /// Digest of the region's bytes, truncated to the hash kind's length,
    /// remainder zeroed.
    pub digest: [u8; MAX_DIGEST_LEN],
}

impl HashRegion {

    /// Return the first sector past the end of the region.
    #[inline]
    pub fn end(&self) -> u64 {
        self.start + self.size as u64
    }

}

/// A signature normalized to its in-memory form: 64-bit sector addresses and
/// full-width digest fields, whatever file version it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Digest algorithm of every region.
    hash_kind: HashKind,
    /// Upper bound in sectors on the span of a single region.
    hash_block_size: u32,
    /// Regions sorted by start, non-overlapping.
    regions: Vec<HashRegion>,
}

impl Signature {

    /// Create an empty signature with the given parameters.
    pub fn new(hash_kind: HashKind, hash_block_size: u32) -> Self {
        assert!(hash_block_size != 0, "zero hash block size");
        Self { hash_kind, hash_block_size, regions: Vec::new() }
    }

    /// Internal constructor for the codec, which validates regions itself.
    pub(crate) fn from_parts(hash_kind: HashKind, hash_block_size: u32, regions: Vec<HashRegion>) -> Self {
        Self { hash_kind, hash_block_size, regions }
    }

    pub fn hash_kind(&self) -> HashKind {
        self.hash_kind
    }

    pub fn hash_block_size(&self) -> u32 {
        self.hash_block_size
    }

    pub fn regions(&self) -> &[HashRegion] {
        &self.regions
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Largest region size in sectors, the read buffer sizing hint. Zero for
    /// an empty signature.
    pub fn max_region_size(&self) -> u32 {
        self.regions.iter().map(|r| r.size).max().unwrap_or(0)
    }

    /// Append a region at the tail with a default chunk reference. Regions
    /// must be pushed in ascending, non-overlapping order.
    pub fn push_region(&mut self, start: u64, size: u32, digest: [u8; MAX_DIGEST_LEN]) {
        self.push_region_with_chunk(start, size, digest, ChunkRef::default());
    }

    /// Append a region carrying an explicit chunk reference.
    pub fn push_region_with_chunk(&mut self, start: u64, size: u32, digest: [u8; MAX_DIGEST_LEN], chunk: ChunkRef) {

        assert!(size != 0, "zero-size hash region");
        assert!(size <= self.hash_block_size, "hash region larger than the hash block");
        start.checked_add(size as u64).expect("hash region end overflows");

        if let Some(last) = self.regions.last() {
            assert!(start >= last.end(), "hash region starts before the signature tail");
        }

        self.regions.push(HashRegion { start, size, chunk, digest });

    }

    /// Annotate the signature with a chunk a downstream writer just emitted:
    /// every region contained in `[first_sect, last_sect)` is assigned
    /// `chunk_no`, and a region starting in range but ending past it
    /// additionally gets the span flag. A region straddling `first_sect` from
    /// below must have been flagged by the previous call.
    pub fn assign_chunk(&mut self, chunk_no: i32, first_sect: u64, last_sect: u64) {

        for region in &mut self.regions {

            if region.start < first_sect {
                if region.end() > first_sect {
                    assert!(region.chunk.spans(), "unmarked region straddles the chunk start");
                }
                continue;
            }

            if region.start >= last_sect {
                break;
            }

            region.chunk = ChunkRef::new(chunk_no);
            if region.end() > last_sect {
                region.chunk.mark_spanning();
            }

        }

    }

}
