//! The delta computer: walks the old signature and the currently allocated
//! ranges in a single forward pass, hashing candidate regions to decide what
//! must be captured again.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::trace;

use crate::fixup::FixupSet;
use crate::hash::{HashKind, MAX_DIGEST_LEN};
use crate::range::{sector_to_byte, Range, RangeList, SECTOR_SIZE};
use crate::sig::{HashRegion, Signature, DEFAULT_HASH_BLOCK_SIZE};
use crate::stats::{DeltaStats, DiagSink};

/// Tuning of one delta computation.
#[derive(Debug, Clone, Copy)]
pub struct DeltaOptions {
    /// Build a new signature covering the currently allocated ranges.
    pub emit_signature: bool,
    /// Attempt a digest comparison even when the allocated ranges only
    /// partially cover a hash region. A match then proves the whole region
    /// unchanged and keeps the still-allocated parts out of the delta, at
    /// the price of the extra disk read.
    pub hash_free: bool,
    /// Prefer SHA-256 over SHA-1 when starting without an old signature.
    pub new_format: bool,
}

impl Default for DeltaOptions {

    fn default() -> Self {
        Self {
            emit_signature: true,
            hash_free: true,
            new_format: true,
        }
    }

}

/// Outputs of a completed delta computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaOutput {
    /// The sector runs whose content must be captured.
    pub delta: RangeList,
    /// The signature describing the current content, when requested.
    pub signature: Option<Signature>,
    /// Accounting for the run.
    pub stats: DeltaStats,
}

/// What the walk decided about the span described by one hash region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    /// The digest matched, content unchanged.
    Unchanged,
    /// The digest was recomputed and differs.
    Changed,
    /// Partial coverage without a comparison, treated as changed.
    NoCompare,
    /// An overlapping fixup precludes a comparison, treated as changed.
    FixupForce,
}

/// Per-operation state bundle threaded through the walk.
struct DeltaContext<'a, D> {
    /// Reader over the whole disk, absolute sector coordinates.
    disk: &'a mut D,
    /// Sector where the logical partition begins, hash block boundaries are
    /// measured from it.
    partition_offset: u64,
    hash_kind: HashKind,
    hash_block_size: u32,
    fixups: &'a mut FixupSet,
    cancel: Option<&'a AtomicBool>,
    opts: DeltaOptions,
    /// Single read buffer of one hash block.
    scratch: Vec<u8>,
    stats: DeltaStats,
}

/// Compute the delta between the disk's currently allocated ranges and an
/// old signature, optionally emitting the successor signature.
///
/// `cur_ranges` is in ascending, non-overlapping, absolute-sector order.
/// The old signature may hold zero regions, in which case every allocated
/// range is delta; passing none instead selects the default parameters for
/// the successor signature (SHA-256 or SHA-1 depending on `new_format`,
/// 128-sector blocks) where an empty signature hands down its own.
///
/// The fixup set is snapshotted for the duration of the walk and rolled back
/// if the computation fails or is cancelled.
pub fn compute_delta<D: Read + Seek>(
    disk: &mut D,
    cur_ranges: &RangeList,
    old_sig: Option<&Signature>,
    partition_offset: u64,
    fixups: &mut FixupSet,
    opts: DeltaOptions,
    cancel: Option<&AtomicBool>,
    diag: &mut dyn DiagSink,
) -> Result<DeltaOutput, DeltaError> {

    // Successor signatures chain on the old parameters.
    let (hash_kind, hash_block_size) = match old_sig {
        Some(sig) => (sig.hash_kind(), sig.hash_block_size()),
        None if opts.new_format => (HashKind::Sha256, DEFAULT_HASH_BLOCK_SIZE),
        None => (HashKind::Sha1, DEFAULT_HASH_BLOCK_SIZE),
    };

    let scratch_len = hash_block_size as usize * SECTOR_SIZE as usize;
    let mut scratch = Vec::new();
    scratch.try_reserve_exact(scratch_len).map_err(|_| DeltaError::OutOfMemory)?;
    scratch.resize(scratch_len, 0);

    let mut ctx = DeltaContext {
        disk,
        partition_offset,
        hash_kind,
        hash_block_size,
        fixups,
        cancel,
        opts,
        scratch,
        stats: DeltaStats::default(),
    };

    let regions = old_sig.map(|sig| sig.regions()).unwrap_or(&[]);

    ctx.fixups.save();
    let result = ctx.walk(cur_ranges, regions);
    ctx.fixups.restore(result.is_ok());

    let output = result?;
    diag.stats(&output.stats);
    Ok(output)

}

impl<D: Read + Seek> DeltaContext<'_, D> {

    fn walk(&mut self, cur_ranges: &RangeList, old_regions: &[HashRegion]) -> Result<DeltaOutput, DeltaError> {

        let mut delta = RangeList::new();
        let mut new_sig = self.opts.emit_signature
            .then(|| Signature::new(self.hash_kind, self.hash_block_size));

        let mut ranges = cur_ranges.iter();
        let mut regions = old_regions.iter();
        let mut cur = ranges.next().copied();
        let mut region = regions.next();

        while let (Some(mut d), Some(h)) = (cur, region) {

            self.check_cancel()?;

            if d.end() <= h.start {
                // Allocated run with no signature coverage, all delta.
                self.emit_new(&mut delta, new_sig.as_mut(), d.start, d.size)?;
                cur = ranges.next().copied();
                continue;
            }

            if h.end() <= d.start {
                // Signature region with nothing allocated in it anymore.
                self.stats.orig_only_sectors += h.size as u64;
                region = regions.next();
                continue;
            }

            // The run and the region intersect. Carve off whatever the run
            // holds ahead of the region first.
            if d.start < h.start {
                let carve = (h.start - d.start) as u32;
                self.emit_new(&mut delta, new_sig.as_mut(), d.start, carve)?;
                d.start = h.start;
                d.size -= carve;
            }

            let verdict = self.judge(h, d, new_sig.as_mut())?;
            trace!("region {}+{}: {verdict:?}", h.start, h.size);

            // Walk the sub-runs the region covers.
            let h_end = h.end();
            let mut covered_total = 0u64;

            loop {

                let covered = (d.end().min(h_end) - d.start) as u32;
                covered_total += covered as u64;
                self.stats.shared_sectors += covered as u64;

                match verdict {
                    Verdict::Unchanged => {
                        self.stats.unchanged_sectors += covered as u64;
                    }
                    Verdict::Changed => {
                        // The recomputed digest already entered the new
                        // signature whole in `judge`.
                        self.stats.changed_sectors += covered as u64;
                        delta.append(d.start, covered);
                    }
                    Verdict::NoCompare | Verdict::FixupForce => {
                        self.stats.changed_sectors += covered as u64;
                        delta.append(d.start, covered);
                        if let Some(sig) = new_sig.as_mut() {
                            self.add_sig_entries(sig, d.start, covered)?;
                        }
                    }
                }

                if d.end() > h_end {
                    // The tail past the region is the next run to process.
                    d.start = h_end;
                    d.size -= covered;
                    cur = Some(d);
                    break;
                }

                match ranges.next() {
                    Some(next) => {
                        d = *next;
                        if d.start >= h_end {
                            cur = Some(d);
                            break;
                        }
                    }
                    None => {
                        cur = None;
                        break;
                    }
                }

            }

            self.stats.gap_sectors += h.size as u64 - covered_total;
            region = regions.next();

        }

        // Whatever runs remain have no signature coverage at all.
        while let Some(d) = cur {
            self.check_cancel()?;
            self.emit_new(&mut delta, new_sig.as_mut(), d.start, d.size)?;
            cur = ranges.next().copied();
        }

        // Remaining regions describe sectors no longer allocated.
        while let Some(h) = region {
            self.stats.orig_only_sectors += h.size as u64;
            region = regions.next();
        }

        Ok(DeltaOutput {
            delta,
            signature: new_sig,
            stats: self.stats,
        })

    }

    /// Decide whether the span described by a hash region changed. On a
    /// comparison the region immediately re-enters the new signature whole,
    /// keeping the old chunk reference when the digest matched.
    fn judge(&mut self, h: &HashRegion, d: Range, new_sig: Option<&mut Signature>) -> Result<Verdict, DeltaError> {

        if self.fixups.has_fixup(h.start, h.size) {
            // The stored digest was computed with the fixup applied, there
            // is no byte stream left on disk to compare it against.
            self.stats.fixup_forced += 1;
            return Ok(Verdict::FixupForce);
        }

        let full_cover = d.start == h.start && d.size >= h.size;
        if !self.opts.hash_free && !full_cover {
            self.stats.uncompared += 1;
            return Ok(Verdict::NoCompare);
        }

        let digest = self.read_and_hash(h.start, h.size)?;
        self.stats.hash_compares += 1;
        let len = self.hash_kind.digest_len();

        if digest[..len] == h.digest[..len] {
            self.stats.hash_matches += 1;
            if let Some(sig) = new_sig {
                // The digest still describes the region's bytes, carry the
                // region over with its chunk untouched.
                sig.push_region_with_chunk(h.start, h.size, digest, h.chunk);
            }
            Ok(Verdict::Unchanged)
        } else {
            if let Some(sig) = new_sig {
                sig.push_region(h.start, h.size, digest);
            }
            Ok(Verdict::Changed)
        }

    }

    /// Send a run with no signature coverage whole to the delta, hashing it
    /// into the new signature in hash-block-aligned pieces.
    fn emit_new(&mut self, delta: &mut RangeList, new_sig: Option<&mut Signature>, start: u64, size: u32) -> Result<(), DeltaError> {
        self.stats.cur_only_sectors += size as u64;
        delta.append(start, size);
        if let Some(sig) = new_sig {
            self.add_sig_entries(sig, start, size)?;
        }
        Ok(())
    }

    /// Append freshly hashed signature entries for a run, aligned to hash
    /// block boundaries relative to the partition base: the first entry runs
    /// to the next boundary, the last to the end of the run.
    fn add_sig_entries(&mut self, sig: &mut Signature, mut start: u64, mut size: u32) -> Result<(), DeltaError> {

        let block = self.hash_block_size as u64;

        while size != 0 {
            debug_assert!(start >= self.partition_offset, "range under the partition base");
            let misalign = (start - self.partition_offset) % block;
            let n = (block - misalign).min(size as u64) as u32;
            let digest = self.read_and_hash(start, n)?;
            sig.push_region(start, n, digest);
            start += n as u64;
            size -= n;
        }

        Ok(())

    }

    /// Read a run of at most one hash block from the disk, apply any
    /// overlapping fixups to the buffer and digest it.
    fn read_and_hash(&mut self, start: u64, size: u32) -> Result<[u8; MAX_DIGEST_LEN], DeltaError> {

        assert!(size != 0 && size <= self.hash_block_size, "run does not fit a hash block");

        let byte_start = sector_to_byte(start);
        let byte_len = size as usize * SECTOR_SIZE as usize;
        let buf = &mut self.scratch[..byte_len];

        self.disk.seek(SeekFrom::Start(byte_start))?;
        self.disk.read_exact(buf).map_err(|err| match err.kind() {
            io::ErrorKind::UnexpectedEof => DeltaError::ShortRead { start, size },
            _ => DeltaError::Io(err),
        })?;

        if self.fixups.has_fixup(start, size) {
            self.fixups.apply_range(byte_start, buf);
        }

        Ok(self.hash_kind.compute(buf))

    }

    fn check_cancel(&self) -> Result<(), DeltaError> {
        match self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(DeltaError::Cancelled),
            _ => Ok(()),
        }
    }

}

/// Error type for the delta computation. Any failure aborts the whole
/// operation, a partial delta is never returned.
#[derive(thiserror::Error, Debug)]
pub enum DeltaError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("short read at sector {start} ({size} sectors)")]
    ShortRead { start: u64, size: u32 },
    #[error("out of memory sizing the hash read buffer")]
    OutOfMemory,
    #[error("computation cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {

    use std::io::Cursor;

    use crate::stats::NullSink;

    use super::*;

    const SS: usize = SECTOR_SIZE as usize;

    /// Disk where each sector is filled with a marker byte derived from its
    /// index, so any two sectors differ.
    fn make_disk(sectors: usize) -> Cursor<Vec<u8>> {
        let mut bytes = vec![0u8; sectors * SS];
        for (index, sector) in bytes.chunks_mut(SS).enumerate() {
            sector.fill(index as u8 + 1);
        }
        Cursor::new(bytes)
    }

    fn ranges(list: &[(u64, u32)]) -> RangeList {
        list.iter().copied().collect()
    }

    fn opts(hash_free: bool) -> DeltaOptions {
        DeltaOptions { emit_signature: true, hash_free, new_format: false }
    }

    /// Run a computation against an empty 8-sector-block SHA-1 signature,
    /// yielding the signature the scenarios chain on.
    fn capture(disk: &mut Cursor<Vec<u8>>, cur: &[(u64, u32)]) -> Signature {
        let empty = Signature::new(HashKind::Sha1, 8);
        let out = compute_delta(
            disk, &ranges(cur), Some(&empty), 0,
            &mut FixupSet::new(), opts(true), None, &mut NullSink,
        ).unwrap();
        out.signature.unwrap()
    }

    fn run(
        disk: &mut Cursor<Vec<u8>>,
        cur: &[(u64, u32)],
        old_sig: &Signature,
        fixups: &mut FixupSet,
        hash_free: bool,
    ) -> DeltaOutput {
        compute_delta(
            disk, &ranges(cur), Some(old_sig), 0,
            fixups, opts(hash_free), None, &mut NullSink,
        ).unwrap()
    }

    fn starts_and_sizes(sig: &Signature) -> Vec<(u64, u32)> {
        sig.regions().iter().map(|r| (r.start, r.size)).collect()
    }

    #[test]
    fn empty_signature_sends_everything_to_the_delta() {

        let mut disk = make_disk(16);
        let empty = Signature::new(HashKind::Sha1, 8);
        let out = run(&mut disk, &[(0, 16)], &empty, &mut FixupSet::new(), true);

        assert_eq!(out.delta.as_slice(), &[Range { start: 0, size: 16 }]);
        let sig = out.signature.unwrap();
        assert_eq!(starts_and_sizes(&sig), [(0, 8), (8, 8)]);
        assert_eq!(sig.regions()[0].digest, HashKind::Sha1.compute(&disk.get_ref()[..8 * SS]));
        assert_eq!(sig.regions()[1].digest, HashKind::Sha1.compute(&disk.get_ref()[8 * SS..]));
        assert_eq!(out.stats.cur_only_sectors, 16);

    }

    #[test]
    fn matching_digests_yield_an_empty_delta() {

        let mut disk = make_disk(16);
        let old = capture(&mut disk, &[(0, 16)]);
        let out = run(&mut disk, &[(0, 16)], &old, &mut FixupSet::new(), true);

        assert!(out.delta.is_empty());
        assert_eq!(out.signature.unwrap(), old);
        assert_eq!(out.stats.unchanged_sectors, 16);
        assert_eq!(out.stats.hash_matches, 2);

    }

    #[test]
    fn a_changed_block_enters_the_delta_with_a_fresh_digest() {

        let mut disk = make_disk(16);
        let old = capture(&mut disk, &[(0, 16)]);

        // Rewrite the second hash block on disk.
        disk.get_mut()[8 * SS..].fill(0xcd);
        let out = run(&mut disk, &[(0, 16)], &old, &mut FixupSet::new(), true);

        assert_eq!(out.delta.as_slice(), &[Range { start: 8, size: 8 }]);
        let sig = out.signature.unwrap();
        assert_eq!(starts_and_sizes(&sig), [(0, 8), (8, 8)]);
        assert_eq!(sig.regions()[0].digest, old.regions()[0].digest);
        assert_eq!(sig.regions()[1].digest, HashKind::Sha1.compute(&vec![0xcd; 8 * SS]));
        assert_eq!(out.stats.changed_sectors, 8);
        assert_eq!(out.stats.unchanged_sectors, 8);

    }

    #[test]
    fn hash_free_mode_clears_partially_covered_blocks() {

        let mut disk = make_disk(8);
        let old = capture(&mut disk, &[(0, 8)]);

        // Half the block is no longer allocated but the content at the
        // whole-block granularity is unchanged.
        let out = run(&mut disk, &[(4, 4)], &old, &mut FixupSet::new(), true);

        assert!(out.delta.is_empty());
        let sig = out.signature.unwrap();
        assert_eq!(starts_and_sizes(&sig), [(0, 8)]);
        assert_eq!(sig.regions()[0].digest, old.regions()[0].digest);
        assert_eq!(sig.regions()[0].chunk.number(), 0);
        assert_eq!(out.stats.unchanged_sectors, 4);
        assert_eq!(out.stats.gap_sectors, 4);

    }

    #[test]
    fn partial_coverage_without_hash_free_goes_straight_to_the_delta() {

        let mut disk = make_disk(8);
        let old = capture(&mut disk, &[(0, 8)]);
        let out = run(&mut disk, &[(4, 4)], &old, &mut FixupSet::new(), false);

        assert_eq!(out.delta.as_slice(), &[Range { start: 4, size: 4 }]);
        let sig = out.signature.unwrap();
        assert_eq!(starts_and_sizes(&sig), [(4, 4)]);
        assert_eq!(sig.regions()[0].digest, HashKind::Sha1.compute(&disk.get_ref()[4 * SS..8 * SS]));
        assert_eq!(out.stats.uncompared, 1);
        assert_eq!(out.stats.hash_compares, 0);

    }

    #[test]
    fn an_overlapping_fixup_forces_the_block_into_the_delta() {

        let mut disk = make_disk(8);
        let old = capture(&mut disk, &[(0, 8)]);

        let mut fixups = FixupSet::new();
        fixups.add(256, vec![0xaa; 4]).unwrap();
        let out = run(&mut disk, &[(0, 8)], &old, &mut fixups, true);

        assert_eq!(out.delta.as_slice(), &[Range { start: 0, size: 8 }]);
        let sig = out.signature.unwrap();
        assert_eq!(starts_and_sizes(&sig), [(0, 8)]);

        // The fresh digest covers the fixed-up bytes, not the raw disk.
        let mut patched = disk.get_ref().clone();
        patched[256..260].fill(0xaa);
        assert_eq!(sig.regions()[0].digest, HashKind::Sha1.compute(&patched));
        assert_ne!(sig.regions()[0].digest, old.regions()[0].digest);
        assert_eq!(out.stats.fixup_forced, 1);
        assert_eq!(out.stats.hash_compares, 0);

    }

    #[test]
    fn a_run_straddling_a_matching_block_splits() {

        let mut disk = make_disk(16);
        let old = capture(&mut disk, &[(0, 8)]);

        // The run covers the matching block's tail and continues past it.
        let out = run(&mut disk, &[(4, 8)], &old, &mut FixupSet::new(), true);

        assert_eq!(out.delta.as_slice(), &[Range { start: 8, size: 4 }]);
        let sig = out.signature.unwrap();
        assert_eq!(starts_and_sizes(&sig), [(0, 8), (8, 4)]);
        assert_eq!(sig.regions()[0].digest, old.regions()[0].digest);

    }

    #[test]
    fn a_run_ahead_of_the_region_is_carved_off() {

        let mut disk = make_disk(24);
        let old = capture(&mut disk, &[(8, 8)]);

        let out = run(&mut disk, &[(0, 24)], &old, &mut FixupSet::new(), true);

        // Head and tail are new, the middle block matches.
        assert_eq!(out.delta.as_slice(), &[
            Range { start: 0, size: 8 },
            Range { start: 16, size: 8 },
        ]);
        let sig = out.signature.unwrap();
        assert_eq!(starts_and_sizes(&sig), [(0, 8), (8, 8), (16, 8)]);
        assert_eq!(out.stats.cur_only_sectors, 16);
        assert_eq!(out.stats.unchanged_sectors, 8);

    }

    #[test]
    fn deallocated_regions_are_skipped() {

        let mut disk = make_disk(32);
        let old = capture(&mut disk, &[(0, 8), (16, 8)]);

        let out = run(&mut disk, &[(16, 8)], &old, &mut FixupSet::new(), true);

        assert!(out.delta.is_empty());
        assert_eq!(starts_and_sizes(&out.signature.unwrap()), [(16, 8)]);
        assert_eq!(out.stats.orig_only_sectors, 8);

    }

    #[test]
    fn new_signature_entries_align_to_the_partition_base() {

        let mut disk = make_disk(32);
        let empty = Signature::new(HashKind::Sha1, 8);
        let out = compute_delta(
            &mut disk, &ranges(&[(6, 20)]), Some(&empty), 4,
            &mut FixupSet::new(), opts(true), None, &mut NullSink,
        ).unwrap();

        // First entry runs to the next block boundary past the partition
        // base at sector 4, the last to the end of the run.
        let sig = out.signature.unwrap();
        assert_eq!(starts_and_sizes(&sig), [(6, 6), (12, 8), (20, 6)]);
        for region in &sig.regions()[1..] {
            assert_eq!((region.start - 4) % 8, 0);
        }

    }

    #[test]
    fn default_parameters_apply_without_an_old_signature() {

        let mut disk = make_disk(16);
        let out = compute_delta(
            &mut disk, &ranges(&[(0, 16)]), None, 0,
            &mut FixupSet::new(), DeltaOptions::default(), None, &mut NullSink,
        ).unwrap();

        let sig = out.signature.unwrap();
        assert_eq!(sig.hash_kind(), HashKind::Sha256);
        assert_eq!(sig.hash_block_size(), DEFAULT_HASH_BLOCK_SIZE);
        assert_eq!(starts_and_sizes(&sig), [(0, 16)]);

        let out = compute_delta(
            &mut disk, &ranges(&[(0, 16)]), None, 0,
            &mut FixupSet::new(),
            DeltaOptions { new_format: false, ..DeltaOptions::default() },
            None, &mut NullSink,
        ).unwrap();
        assert_eq!(out.signature.unwrap().hash_kind(), HashKind::Sha1);

    }

    #[test]
    fn no_signature_is_built_unless_requested() {
        let mut disk = make_disk(16);
        let out = compute_delta(
            &mut disk, &ranges(&[(0, 16)]), None, 0,
            &mut FixupSet::new(),
            DeltaOptions { emit_signature: false, ..DeltaOptions::default() },
            None, &mut NullSink,
        ).unwrap();
        assert!(out.signature.is_none());
        assert_eq!(out.delta.as_slice(), &[Range { start: 0, size: 16 }]);
    }

    #[test]
    fn outputs_are_deterministic() {
        let mut disk = make_disk(32);
        let old = capture(&mut disk, &[(0, 8), (12, 10)]);
        let first = run(&mut disk, &[(2, 14), (20, 4)], &old, &mut FixupSet::new(), true);
        let second = run(&mut disk, &[(2, 14), (20, 4)], &old, &mut FixupSet::new(), true);
        assert_eq!(first, second);
    }

    #[test]
    fn a_read_past_the_disk_end_fails_short() {
        let mut disk = make_disk(8);
        let err = compute_delta(
            &mut disk, &ranges(&[(0, 16)]), None, 0,
            &mut FixupSet::new(), opts(true), None, &mut NullSink,
        ).unwrap_err();
        assert!(matches!(err, DeltaError::ShortRead { start: 0, size: 16 }));
    }

    #[test]
    fn errors_roll_the_fixup_set_back() {

        let mut disk = make_disk(8);
        let mut fixups = FixupSet::new();
        fixups.add(256, vec![0xaa; 4]).unwrap();

        // The first run consumes the fixup while hashing, the second run
        // reads past the disk end and aborts the operation.
        let err = compute_delta(
            &mut disk, &ranges(&[(0, 8), (16, 8)]), None, 0,
            &mut fixups, opts(true), None, &mut NullSink,
        ).unwrap_err();

        assert!(matches!(err, DeltaError::ShortRead { start: 16, size: 8 }));
        assert_eq!(fixups.len(), 1);
        assert_eq!(fixups.entries()[0].byte_start, 256);

    }

    #[test]
    fn success_commits_the_fixup_consumption() {

        let mut disk = make_disk(8);
        let mut fixups = FixupSet::new();
        fixups.add(256, vec![0xaa; 4]).unwrap();

        compute_delta(
            &mut disk, &ranges(&[(0, 8)]), None, 0,
            &mut fixups, opts(true), None, &mut NullSink,
        ).unwrap();

        assert!(fixups.is_empty());

    }

    #[test]
    fn cancellation_aborts_before_any_hashing() {

        let mut disk = make_disk(16);
        let old = capture(&mut disk, &[(0, 16)]);
        let cancel = AtomicBool::new(true);

        let err = compute_delta(
            &mut disk, &ranges(&[(0, 16)]), Some(&old), 0,
            &mut FixupSet::new(), opts(true), Some(&cancel), &mut NullSink,
        ).unwrap_err();
        assert!(matches!(err, DeltaError::Cancelled));

    }

    #[test]
    fn empty_range_list_yields_an_empty_delta() {

        let mut disk = make_disk(16);
        let old = capture(&mut disk, &[(0, 16)]);
        let out = run(&mut disk, &[], &old, &mut FixupSet::new(), true);

        assert!(out.delta.is_empty());
        assert!(out.signature.unwrap().is_empty());
        assert_eq!(out.stats.orig_only_sectors, 16);

    }

    #[test]
    fn delta_is_canonical_across_adjacent_decisions() {

        let mut disk = make_disk(32);
        let old = capture(&mut disk, &[(0, 24)]);

        // Change the first and second blocks, keep the third.
        disk.get_mut()[..16 * SS].fill(0xee);
        let out = run(&mut disk, &[(0, 24)], &old, &mut FixupSet::new(), true);

        // Two adjacent changed blocks coalesce into one delta range.
        assert_eq!(out.delta.as_slice(), &[Range { start: 0, size: 16 }]);

    }

}
