use std::time::Instant;

use cairn::checksum::Checksum;
use cairn::sign::Verification;

/// Counter snapshot published to the progress sink once a second (and
/// once per dry run).
#[derive(Clone, Copy, Debug)]
pub struct Snapshot {
    /// Fetches in flight, summed across every category.
    pub outstanding_fetches: u32,
    /// Writes in flight, summed across every category.
    pub outstanding_writes: u32,
    pub fetched: u32,
    pub requested: u32,
    pub scanned_metadata: u32,
    pub bytes_transferred: u64,
    pub start_time: Instant,

    pub fetched_delta_parts: u32,
    pub total_delta_parts: u32,
    pub total_delta_part_size: u64,
    pub total_delta_part_usize: u64,
    pub total_delta_superblocks: u32,

    // Metadata is fetched before content; these report that phase
    // specifically.
    pub outstanding_metadata_fetches: u32,
    pub metadata_fetched: u32,
}

/// External progress sink. All methods are optional except the counter
/// update.
pub trait Progress {
    fn update(&mut self, snapshot: &Snapshot);

    /// Human-readable status, published once at the end of a pull.
    fn status(&mut self, message: &str) {
        let _ = message;
    }

    /// Per-commit signature verification outcome, emitted for every
    /// scanned commit when commit verification is enabled.
    fn commit_verified(&mut self, checksum: &Checksum, verification: &Verification) {
        let _ = (checksum, verification);
    }
}

/// A sink that accumulates everything it is told; used by tests and by
/// callers that only want the final totals.
#[derive(Debug, Default)]
pub struct Collector {
    pub snapshots: Vec<Snapshot>,
    pub statuses: Vec<String>,
    pub verified: Vec<(Checksum, Verification)>,
}

impl Progress for Collector {
    fn update(&mut self, snapshot: &Snapshot) {
        self.snapshots.push(*snapshot);
    }

    fn status(&mut self, message: &str) {
        self.statuses.push(message.to_owned());
    }

    fn commit_verified(&mut self, checksum: &Checksum, verification: &Verification) {
        self.verified.push((*checksum, *verification));
    }
}
