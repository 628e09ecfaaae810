use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

use cairn::checksum::{Checksum, ObjectId, ObjectType};
use cairn::refname::RefName;
use cairn::store::RepoMode;
use cairn::summary::Summary;

use crate::fetcher::Cancel;
use crate::Error;

/// Categories of fetch traffic; every counter array is indexed by one
/// of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FetchKind {
    Metadata,
    Content,
    DeltaPart,
    DeltaSuper,
    Ref,
    Summary,
    SummarySig,
    Config,
    Metalink,
}

pub(crate) const FETCH_KINDS: usize = 9;

impl FetchKind {
    fn index(self) -> usize {
        self as usize
    }

    pub fn for_object(objtype: ObjectType) -> Self {
        if objtype.is_meta() {
            Self::Metadata
        } else {
            Self::Content
        }
    }
}

/// One queued scan: an object to (re)consider expanding.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ScanEntry {
    pub checksum: Checksum,
    pub objtype: ObjectType,
    pub depth: u32,
}

/// All mutable state of one pull invocation. Created per pull, touched
/// only from the loop thread, torn down on both success and failure.
pub(crate) struct Context {
    pub outstanding_fetches: [u32; FETCH_KINDS],
    pub outstanding_writes: [u32; FETCH_KINDS],
    pub fetched: [u32; FETCH_KINDS],
    pub requested: [u32; FETCH_KINDS],

    pub scan_queue: VecDeque<ScanEntry>,
    pub requested_metadata: HashSet<Checksum>,
    pub requested_content: HashSet<Checksum>,
    pub scanned_metadata: HashSet<ObjectId>,
    pub n_scanned_metadata: u32,

    /// Ref name to target commit; the target is filled in when the ref
    /// resolves.
    pub requested_refs_to_fetch: HashMap<RefName, Option<Checksum>>,
    pub commits_to_fetch: HashSet<Checksum>,
    pub expected_commit_sizes: HashMap<Checksum, u64>,
    pub commit_to_depth: HashMap<Checksum, i32>,

    pub summary_deltas_checksums: HashMap<String, Checksum>,
    pub n_delta_superblocks: u32,
    pub n_total_deltaparts: u32,
    pub total_deltapart_size: u64,
    pub total_deltapart_usize: u64,

    pub summary_data: Option<Vec<u8>>,
    pub summary_data_sig: Option<Vec<u8>>,
    pub summary: Option<Summary>,
    pub remote_mode: Option<RepoMode>,
    pub has_tombstone_commits: bool,

    /// Subdirectory restriction; consumed component by component as the
    /// tree scan descends.
    pub dir: Option<String>,
    pub maxdepth: i32,

    pub is_mirror: bool,
    pub is_commit_only: bool,
    pub is_untrusted: bool,
    pub dry_run: bool,
    pub dry_run_emitted_progress: bool,
    pub require_static_deltas: bool,
    pub disable_static_deltas: bool,
    pub gpg_verify: bool,
    pub gpg_verify_summary: bool,
    pub fetch_only_summary: bool,
    pub commitpartial_exists: bool,
    pub legacy_transaction_resuming: bool,

    pub caught_error: bool,
    pub error: Option<Error>,
    pub cancel: Cancel,
    pub start_time: Instant,
}

impl Context {
    pub fn new(cancel: Cancel) -> Self {
        Self {
            outstanding_fetches: [0; FETCH_KINDS],
            outstanding_writes: [0; FETCH_KINDS],
            fetched: [0; FETCH_KINDS],
            requested: [0; FETCH_KINDS],
            scan_queue: VecDeque::new(),
            requested_metadata: HashSet::new(),
            requested_content: HashSet::new(),
            scanned_metadata: HashSet::new(),
            n_scanned_metadata: 0,
            requested_refs_to_fetch: HashMap::new(),
            commits_to_fetch: HashSet::new(),
            expected_commit_sizes: HashMap::new(),
            commit_to_depth: HashMap::new(),
            summary_deltas_checksums: HashMap::new(),
            n_delta_superblocks: 0,
            n_total_deltaparts: 0,
            total_deltapart_size: 0,
            total_deltapart_usize: 0,
            summary_data: None,
            summary_data_sig: None,
            summary: None,
            remote_mode: None,
            has_tombstone_commits: false,
            dir: None,
            maxdepth: 0,
            is_mirror: false,
            is_commit_only: false,
            is_untrusted: false,
            dry_run: false,
            dry_run_emitted_progress: false,
            require_static_deltas: false,
            disable_static_deltas: false,
            gpg_verify: false,
            gpg_verify_summary: false,
            fetch_only_summary: false,
            commitpartial_exists: false,
            legacy_transaction_resuming: false,
            caught_error: false,
            error: None,
            cancel,
            start_time: Instant::now(),
        }
    }

    pub fn fetch_started(&mut self, kind: FetchKind) {
        self.outstanding_fetches[kind.index()] += 1;
    }

    pub fn fetch_finished(&mut self, kind: FetchKind) {
        debug_assert!(self.outstanding_fetches[kind.index()] > 0);
        self.outstanding_fetches[kind.index()] -= 1;
    }

    pub fn write_started(&mut self, kind: FetchKind) {
        self.outstanding_writes[kind.index()] += 1;
    }

    pub fn write_finished(&mut self, kind: FetchKind) {
        debug_assert!(self.outstanding_writes[kind.index()] > 0);
        self.outstanding_writes[kind.index()] -= 1;
    }

    pub fn count_requested(&mut self, kind: FetchKind) {
        self.requested[kind.index()] += 1;
    }

    pub fn count_fetched(&mut self, kind: FetchKind) {
        self.fetched[kind.index()] += 1;
    }

    pub fn n_fetched(&self, kind: FetchKind) -> u32 {
        self.fetched[kind.index()]
    }

    pub fn n_outstanding(&self, kind: FetchKind) -> u32 {
        self.outstanding_fetches[kind.index()]
    }

    pub fn total_outstanding_fetches(&self) -> u32 {
        self.outstanding_fetches.iter().sum()
    }

    /// The termination predicate: nothing queued, nothing in flight
    /// (and, for a dry run, the reporter has had its say).
    pub fn is_idle(&self) -> bool {
        let mut idle = self.scan_queue.is_empty();
        for i in 0..FETCH_KINDS {
            idle = idle && self.outstanding_fetches[i] == 0 && self.outstanding_writes[i] == 0;
        }
        if self.dry_run {
            idle = idle && self.dry_run_emitted_progress;
        }
        idle
    }

    /// Latch the first error, fan out cancellation, drop the rest.
    pub fn handle_error(&mut self, result: Result<(), Error>) {
        let Err(err) = result else { return };
        if self.caught_error {
            log::debug!(target: "pull", "dropping secondary error: {err}");
            return;
        }
        log::debug!(target: "pull", "caught error: {err}");
        self.caught_error = true;
        self.error = Some(err);
        self.cancel.cancel();
    }

    pub fn queue_scan(&mut self, checksum: Checksum, objtype: ObjectType, depth: u32) {
        if self.dry_run {
            return;
        }
        self.scan_queue.push_back(ScanEntry {
            checksum,
            objtype,
            depth,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_requires_all_counters_drained() {
        let mut ctx = Context::new(Cancel::new());
        assert!(ctx.is_idle());

        ctx.fetch_started(FetchKind::Summary);
        assert!(!ctx.is_idle());
        ctx.fetch_finished(FetchKind::Summary);
        assert!(ctx.is_idle());

        ctx.write_started(FetchKind::DeltaPart);
        assert!(!ctx.is_idle());
        ctx.write_finished(FetchKind::DeltaPart);

        ctx.queue_scan(Checksum::digest(b"c"), ObjectType::Commit, 0);
        assert!(!ctx.is_idle());
    }

    #[test]
    fn test_dry_run_waits_for_report() {
        let mut ctx = Context::new(Cancel::new());
        ctx.dry_run = true;
        assert!(!ctx.is_idle());
        ctx.dry_run_emitted_progress = true;
        assert!(ctx.is_idle());
    }

    #[test]
    fn test_first_error_wins() {
        let mut ctx = Context::new(Cancel::new());
        ctx.handle_error(Ok(()));
        assert!(!ctx.caught_error);
        assert!(!ctx.cancel.is_cancelled());

        ctx.handle_error(Err(Error::Cancelled));
        ctx.handle_error(Err(Error::MissingRemoteName));
        assert!(ctx.cancel.is_cancelled());
        assert!(matches!(ctx.error, Some(Error::Cancelled)));
    }

    #[test]
    fn test_dry_run_skips_scan_queue() {
        let mut ctx = Context::new(Cancel::new());
        ctx.dry_run = true;
        ctx.queue_scan(Checksum::digest(b"c"), ObjectType::Commit, 0);
        assert!(ctx.scan_queue.is_empty());
    }
}
