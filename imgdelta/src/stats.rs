//! Counters accumulated by the delta computer and the sink receiving
//! diagnostics. Never required for correctness.

use tracing::{info, warn};

/// Sector and compare accounting for one delta computation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeltaStats {
    /// Sectors allocated now with no old signature coverage.
    pub cur_only_sectors: u64,
    /// Sectors described by the old signature with nothing allocated in
    /// their region anymore.
    pub orig_only_sectors: u64,
    /// Sectors both allocated now and covered by the old signature.
    pub shared_sectors: u64,
    /// Shared sectors proven unchanged by a digest match.
    pub unchanged_sectors: u64,
    /// Shared sectors that entered the delta.
    pub changed_sectors: u64,
    /// No-longer-allocated sectors inside signature regions that still had
    /// allocated neighbors.
    pub gap_sectors: u64,
    /// Digest comparisons performed.
    pub hash_compares: u64,
    /// Digest comparisons that matched.
    pub hash_matches: u64,
    /// Hash regions forced into the delta by an overlapping fixup.
    pub fixup_forced: u64,
    /// Hash regions sent to the delta without a comparison.
    pub uncompared: u64,
}

impl DeltaStats {

    /// Total number of sectors entering the delta.
    pub fn delta_sectors(&self) -> u64 {
        self.cur_only_sectors + self.changed_sectors
    }

}

/// Receiver for non-fatal diagnostics and end-of-run statistics.
pub trait DiagSink {

    /// A non-fatal condition worth surfacing, such as a format downgrade.
    fn warning(&mut self, message: &str);

    /// Statistics of a finished delta computation.
    fn stats(&mut self, stats: &DeltaStats);

}

/// Sink discarding everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagSink for NullSink {

    fn warning(&mut self, _message: &str) {}

    fn stats(&mut self, _stats: &DeltaStats) {}

}

/// Sink routing diagnostics to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TraceSink;

impl DiagSink for TraceSink {

    fn warning(&mut self, message: &str) {
        warn!("{message}");
    }

    fn stats(&mut self, stats: &DeltaStats) {
        info!("sectors: {} only in current, {} only in original, {} shared, {} gap",
            stats.cur_only_sectors, stats.orig_only_sectors, stats.shared_sectors, stats.gap_sectors);
        info!("shared: {} unchanged, {} changed",
            stats.unchanged_sectors, stats.changed_sectors);
        info!("compares: {} done, {} matched, {} fixup forced, {} skipped",
            stats.hash_compares, stats.hash_matches, stats.fixup_forced, stats.uncompared);
        info!("delta total: {} sectors", stats.delta_sectors());
    }

}
