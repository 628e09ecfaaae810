//! The pull driver: a single-threaded cooperative loop.
//!
//! All state lives in [`Context`] and is touched only from the loop
//! thread. Concurrency is expressed as in-flight fetches and writes
//! whose completions arrive as [`Event`]s on a channel; the scanner
//! runs at idle priority, strictly after pending completions have
//! drained, so I/O stays ahead of graph expansion.

use std::path::PathBuf;
use std::time::Duration;

use crossbeam_channel::{select, tick, unbounded, Receiver, Sender, TryRecvError};
use url::Url;

use cairn::checksum::{Checksum, ObjectId};
use cairn::content::ContentObject;
use cairn::delta::Part;
use cairn::refname::RefName;
use cairn::remote::Remote;
use cairn::sign::Verifier;
use cairn::store::Store;

use crate::context::{Context, FetchKind, FETCH_KINDS};
use crate::fetcher::{self, Fetcher, Priority, Request};
use crate::progress::{Progress, Snapshot};
use crate::{Error, SummaryBytes};

/// A completion or deferred job scheduled onto the loop.
pub(crate) enum Event {
    Metalink(Result<fetcher::Metalink, fetcher::Error>),
    Config(Result<Vec<u8>, fetcher::Error>),
    SummarySig(Result<Vec<u8>, fetcher::Error>),
    Summary(Result<Vec<u8>, fetcher::Error>),
    Ref {
        branch: RefName,
        from: Option<Checksum>,
        result: Result<Vec<u8>, fetcher::Error>,
    },
    DeltaSuperblock {
        from: Option<Checksum>,
        to: Checksum,
        result: Result<Vec<u8>, fetcher::Error>,
    },
    Object {
        id: ObjectId,
        result: Result<PathBuf, fetcher::Error>,
    },
    DeltaPart {
        expected: Checksum,
        objects: Vec<ObjectId>,
        result: Result<PathBuf, fetcher::Error>,
    },
    WriteMetadata {
        id: ObjectId,
        data: Vec<u8>,
    },
    WriteContent {
        checksum: Checksum,
        object: ContentObject,
    },
    ApplyDeltaPart {
        objects: Vec<ObjectId>,
        part: Part,
        trusted: bool,
    },
}

pub(crate) struct Pull<'a, 'b, S, F, V> {
    pub repo: &'a mut S,
    pub remote_repo_local: Option<S>,
    pub fetcher: &'a mut F,
    pub verifier: &'a V,
    pub progress: Option<&'b mut dyn Progress>,
    pub remote: Remote,
    pub remote_name: Option<String>,
    pub base: Option<Url>,
    pub had_subdir: bool,
    pub ctx: Context,
    pub tx: Sender<Event>,
    rx: Receiver<Event>,
}

impl<'a, 'b, S, F, V> Pull<'a, 'b, S, F, V>
where
    S: Store,
    F: Fetcher,
    V: Verifier,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: &'a mut S,
        fetcher: &'a mut F,
        verifier: &'a V,
        progress: Option<&'b mut dyn Progress>,
        remote: Remote,
        remote_name: Option<String>,
        base: Option<Url>,
        ctx: Context,
        had_subdir: bool,
    ) -> Self {
        let (tx, rx) = unbounded();
        Self {
            repo,
            remote_repo_local: None,
            fetcher,
            verifier,
            progress,
            remote,
            remote_name,
            base,
            had_subdir,
            ctx,
            tx,
            rx,
        }
    }

    /// Kick off the stage pipeline and iterate the loop to completion.
    pub fn run(&mut self) -> Result<(), Error> {
        let kickoff = self.start();
        self.ctx.handle_error(kickoff);
        self.drive();

        if self.ctx.caught_error {
            return Err(self
                .ctx
                .error
                .take()
                .expect("caught_error implies a latched error"));
        }
        for i in 0..FETCH_KINDS {
            debug_assert_eq!(self.ctx.outstanding_fetches[i], 0);
            debug_assert_eq!(self.ctx.outstanding_writes[i], 0);
        }
        Ok(())
    }

    fn drive(&mut self) {
        let events = self.rx.clone();
        let period = if self.ctx.dry_run {
            Duration::from_millis(10)
        } else {
            Duration::from_secs(1)
        };
        let ticker = tick(period);

        loop {
            if self.ctx.caught_error {
                log::debug!(target: "pull", "error latched, exiting loop");
                break;
            }
            if self.ctx.cancel.is_cancelled() {
                self.ctx.handle_error(Err(Error::Cancelled));
                continue;
            }
            if self.ctx.is_idle() {
                log::debug!(target: "pull", "idle, exiting loop");
                break;
            }
            if ticker.try_recv().is_ok() {
                self.report_progress();
            }
            // Completions drain ahead of the scanner.
            match events.try_recv() {
                Ok(event) => {
                    self.dispatch(event);
                    continue;
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => break,
            }
            if let Some(entry) = self.ctx.scan_queue.pop_front() {
                let result = self.scan_one(entry);
                self.ctx.handle_error(result);
                continue;
            }
            // Nothing runnable; wait for I/O or the next progress tick.
            select! {
                recv(events) -> event => {
                    if let Ok(event) = event {
                        self.dispatch(event);
                    }
                }
                recv(ticker) -> _ => self.report_progress(),
            }
        }
    }

    fn dispatch(&mut self, event: Event) {
        match event {
            Event::Metalink(result) => {
                let outcome = self.metalink_resolved(result);
                self.ctx.fetch_finished(FetchKind::Metalink);
                self.ctx.count_fetched(FetchKind::Metalink);
                self.ctx.handle_error(outcome);
            }
            Event::Config(result) => {
                let outcome = self.config_fetched(result);
                self.ctx.fetch_finished(FetchKind::Config);
                self.ctx.count_fetched(FetchKind::Config);
                self.ctx.handle_error(outcome);
            }
            Event::SummarySig(result) => {
                let outcome = self.summary_sig_fetched(result);
                self.ctx.fetch_finished(FetchKind::SummarySig);
                self.ctx.count_fetched(FetchKind::SummarySig);
                self.ctx.handle_error(outcome);
            }
            Event::Summary(result) => {
                let outcome = self.summary_fetched(result);
                self.ctx.fetch_finished(FetchKind::Summary);
                self.ctx.count_fetched(FetchKind::Summary);
                self.ctx.handle_error(outcome);
            }
            Event::Ref {
                branch,
                from,
                result,
            } => {
                let outcome = self.ref_fetched(branch, from, result);
                self.ctx.fetch_finished(FetchKind::Ref);
                self.ctx.count_fetched(FetchKind::Ref);
                self.ctx.handle_error(outcome);
            }
            Event::DeltaSuperblock { from, to, result } => {
                let outcome = self.delta_superblock_fetched(from, to, result);
                self.ctx.fetch_finished(FetchKind::DeltaSuper);
                self.ctx.count_fetched(FetchKind::DeltaSuper);
                self.ctx.handle_error(outcome);
            }
            Event::Object { id, result } => {
                let kind = FetchKind::for_object(id.objtype);
                let outcome = if id.objtype.is_meta() {
                    self.meta_fetched(id, result)
                } else {
                    self.content_fetched(id.checksum, result)
                };
                self.ctx.fetch_finished(kind);
                if id.objtype.is_meta() {
                    self.ctx.count_fetched(kind);
                }
                self.ctx.handle_error(outcome);
            }
            Event::DeltaPart {
                expected,
                objects,
                result,
            } => {
                let outcome = self.delta_part_fetched(expected, objects, result);
                self.ctx.fetch_finished(FetchKind::DeltaPart);
                self.ctx.count_fetched(FetchKind::DeltaPart);
                self.ctx.handle_error(outcome);
            }
            Event::WriteMetadata { id, data } => {
                let outcome = self.metadata_written(id, data);
                self.ctx.write_finished(FetchKind::Metadata);
                self.ctx.handle_error(outcome);
            }
            Event::WriteContent { checksum, object } => {
                let outcome = self.content_written(checksum, object);
                self.ctx.write_finished(FetchKind::Content);
                self.ctx.handle_error(outcome);
            }
            Event::ApplyDeltaPart {
                objects,
                part,
                trusted,
            } => {
                let outcome = cairn::delta::apply_part(&mut *self.repo, &objects, &part, trusted)
                    .map_err(Error::from);
                self.ctx.write_finished(FetchKind::DeltaPart);
                self.ctx.handle_error(outcome);
            }
        }
    }

    /// Success path after the loop: publish refs, mirror the summary,
    /// commit the transaction, report, and clean commitpartial markers.
    pub fn finish(&mut self) -> Result<(), Error> {
        if self.ctx.dry_run {
            // Nothing was written; the caller aborts the transaction.
            return Ok(());
        }

        for (name, target) in &self.ctx.requested_refs_to_fetch {
            let Some(target) = target else { continue };
            let remote_ref = match &self.remote_name {
                Some(remote) => format!("{remote}/{name}"),
                None => name.to_string(),
            };
            let current = self.repo.resolve_rev(&remote_ref)?;
            if current.as_ref() != Some(target) {
                let scope = if self.ctx.is_mirror {
                    None
                } else {
                    self.remote_name.as_deref()
                };
                self.repo.transaction_set_ref(scope, name, target)?;
            }
        }

        if self.ctx.is_mirror {
            if let Some(summary) = &self.ctx.summary_data {
                self.repo
                    .replace_summary(summary, self.ctx.summary_data_sig.as_deref())?;
            }
        }

        self.repo.commit_transaction()?;
        self.final_status();

        if !self.had_subdir && !self.ctx.is_commit_only {
            let targets = self
                .ctx
                .requested_refs_to_fetch
                .values()
                .flatten()
                .chain(self.ctx.commits_to_fetch.iter())
                .copied()
                .collect::<Vec<_>>();
            for checksum in targets {
                self.repo.clear_commit_partial(&checksum)?;
            }
        }
        Ok(())
    }

    /// Success path for the summary-only mode.
    pub fn finish_summary(&mut self) -> Result<SummaryBytes, Error> {
        self.repo.commit_transaction()?;
        Ok(SummaryBytes {
            summary: self.ctx.summary_data.take(),
            signature: self.ctx.summary_data_sig.take(),
        })
    }

    pub(crate) fn request(&self, url: Url, max_size: Option<u64>, priority: Priority) -> Request {
        Request {
            url,
            max_size,
            priority,
            cancel: self.ctx.cancel.clone(),
        }
    }

    /// Build an absolute URL under the remote's base.
    pub(crate) fn suburl(&self, path: &str) -> Url {
        let base = self.base.as_ref().expect("base url is set before fetching");
        let mut url = base.clone();
        url.path_segments_mut()
            .expect("base url was validated at startup")
            .pop_if_empty()
            .extend(path.split('/'));
        url
    }

    fn report_progress(&mut self) {
        if self.progress.is_none() {
            // A dry run with no sink has nothing to wait for.
            if self.ctx.dry_run {
                self.ctx.dry_run_emitted_progress = true;
            }
            return;
        }
        if self.ctx.dry_run
            && (self.ctx.dry_run_emitted_progress || self.ctx.total_outstanding_fetches() != 0)
        {
            return;
        }
        let snapshot = self.snapshot();
        if let Some(progress) = self.progress.as_deref_mut() {
            progress.update(&snapshot);
        }
        if self.ctx.dry_run {
            self.ctx.dry_run_emitted_progress = true;
        }
    }

    fn snapshot(&self) -> Snapshot {
        fn sum(counters: &[u32; FETCH_KINDS]) -> u32 {
            counters.iter().sum()
        }
        let ctx = &self.ctx;

        Snapshot {
            outstanding_fetches: sum(&ctx.outstanding_fetches),
            outstanding_writes: sum(&ctx.outstanding_writes),
            fetched: sum(&ctx.fetched),
            requested: sum(&ctx.requested),
            scanned_metadata: ctx.n_scanned_metadata,
            bytes_transferred: self.fetcher.bytes_transferred(),
            start_time: ctx.start_time,
            fetched_delta_parts: ctx.n_fetched(FetchKind::DeltaPart),
            total_delta_parts: ctx.n_total_deltaparts,
            total_delta_part_size: ctx.total_deltapart_size,
            total_delta_part_usize: ctx.total_deltapart_usize,
            total_delta_superblocks: ctx.n_delta_superblocks,
            outstanding_metadata_fetches: ctx.n_outstanding(FetchKind::Metadata),
            metadata_fetched: ctx.n_fetched(FetchKind::Metadata),
        }
    }

    fn final_status(&mut self) {
        let bytes = self.fetcher.bytes_transferred();
        let Some(progress) = self.progress.as_deref_mut() else {
            return;
        };
        if bytes == 0 {
            return;
        }
        let (shift, unit) = if bytes < 1024 { (1, "B") } else { (1024, "KiB") };
        let n_meta = self.ctx.n_fetched(FetchKind::Metadata);
        let n_content = self.ctx.n_fetched(FetchKind::Content);
        let n_parts = self.ctx.n_fetched(FetchKind::DeltaPart);
        let mut message = if n_parts > 0 {
            format!("{} delta parts, {} loose fetched", n_parts, n_meta + n_content)
        } else {
            format!("{n_meta} metadata, {n_content} content objects fetched")
        };
        message.push_str(&format!(
            "; {} {} transferred in {} seconds",
            bytes / shift,
            unit,
            self.ctx.start_time.elapsed().as_secs()
        ));
        progress.status(&message);
    }
}
