//! Recursive traversal of the commit/dirtree/dirmeta graph.
//!
//! Entries are drained from the context's FIFO scan queue at idle
//! priority. Scanning decides per object whether to fetch it, import
//! it from a local remote, or expand its children.

use cairn::checksum::{Checksum, ObjectId, ObjectType};
use cairn::sign::Verifier;
use cairn::store::Store;
use cairn::tree::DirTree;
use cairn::{wire, MAX_RECURSION};

use crate::context::ScanEntry;
use crate::engine::Pull;
use crate::fetcher::Fetcher;
use crate::Error;

impl<'a, 'b, S, F, V> Pull<'a, 'b, S, F, V>
where
    S: Store,
    F: Fetcher,
    V: Verifier,
{
    pub(crate) fn scan_one(&mut self, entry: ScanEntry) -> Result<(), Error> {
        let ScanEntry {
            checksum,
            objtype,
            depth,
        } = entry;
        let id = ObjectId::new(checksum, objtype);

        if self.ctx.scanned_metadata.contains(&id) {
            return Ok(());
        }

        let mut is_requested = self.ctx.requested_metadata.contains(&checksum);
        let mut is_stored = self.repo.has_object(&id)?;

        if let Some(local) = &self.remote_repo_local {
            if !is_stored {
                self.repo
                    .import_object_from(local, &id, !self.ctx.is_untrusted)?;
                if objtype == ObjectType::Commit {
                    self.repo.mark_commit_partial(&checksum)?;
                }
            }
            is_stored = true;
            is_requested = true;
        }

        if !is_stored && !is_requested {
            self.ctx.requested_metadata.insert(checksum);
            if objtype == ObjectType::Commit {
                self.fetch_object(checksum, ObjectType::CommitMeta);
            }
            self.fetch_object(checksum, objtype);
            // The scan happens once the write completes.
            return Ok(());
        }

        if objtype == ObjectType::Commit && self.ctx.is_commit_only {
            self.scan_commit(checksum, depth)?;
            self.ctx.scanned_metadata.insert(id);
            self.ctx.n_scanned_metadata += 1;
            return Ok(());
        }

        if is_stored {
            // Detached metadata may have been re-signed; always refresh
            // it for commits.
            if objtype == ObjectType::Commit {
                self.fetch_object(checksum, ObjectType::CommitMeta);
            }

            let mut do_scan = self.ctx.legacy_transaction_resuming
                || is_requested
                || self.ctx.commitpartial_exists;

            if !do_scan && objtype == ObjectType::Commit {
                let (_, state) = self.repo.load_commit(&checksum)?;
                if state.partial {
                    do_scan = true;
                    self.ctx.commitpartial_exists = true;
                } else if self.ctx.maxdepth != 0 {
                    // Coarse, but cheap: depth pulls re-scan every input
                    // commit; the precise depth check happens when the
                    // commit is parsed.
                    do_scan = true;
                }
            }

            if do_scan {
                match objtype {
                    ObjectType::Commit => self.scan_commit(checksum, depth)?,
                    ObjectType::DirTree => self.scan_dirtree(checksum, depth)?,
                    ObjectType::DirMeta => {}
                    _ => unreachable!("only commits, dirtrees and dirmetas are queued"),
                }
            }
            self.ctx.scanned_metadata.insert(id);
            self.ctx.n_scanned_metadata += 1;
        }
        Ok(())
    }

    pub(crate) fn scan_commit(&mut self, checksum: Checksum, depth: u32) -> Result<(), Error> {
        if depth > MAX_RECURSION {
            return Err(Error::MaxRecursion);
        }

        let depth_budget = match self.ctx.commit_to_depth.get(&checksum) {
            Some(budget) => *budget,
            None => {
                let budget = self.ctx.maxdepth;
                self.ctx.commit_to_depth.insert(checksum, budget);
                budget
            }
        };

        if self.ctx.gpg_verify {
            let id = ObjectId::new(checksum, ObjectType::Commit);
            let commit_bytes = self.repo.load_object(&id)?;
            let detached = self.repo.load_commit_detached_metadata(&checksum)?;
            let name = self
                .remote_name
                .as_deref()
                .expect("remote name is required when verification is enabled");
            let verification = self
                .verifier
                .verify_commit(name, &commit_bytes, detached.as_deref())
                .map_err(|err| Error::Verifier { err: Box::new(err) })?;
            if let Some(progress) = self.progress.as_deref_mut() {
                progress.commit_verified(&checksum, &verification);
            }
            if !verification.any_valid() {
                return Err(Error::NoTrustedSignature);
            }
        }

        let (commit, _) = self.repo.load_commit(&checksum)?;

        if let Some(parent) = commit.parent {
            if self.ctx.maxdepth == -1 {
                self.ctx.queue_scan(parent, ObjectType::Commit, depth + 1);
            } else if depth_budget > 0 {
                let parent_budget = match self.ctx.commit_to_depth.get(&parent) {
                    Some(budget) => *budget,
                    None => depth_budget - 1,
                };
                if parent_budget >= 0 {
                    self.ctx.commit_to_depth.insert(parent, parent_budget);
                    self.ctx.queue_scan(parent, ObjectType::Commit, depth + 1);
                }
            }
        }

        if !self.ctx.is_commit_only {
            self.ctx
                .queue_scan(commit.tree_contents, ObjectType::DirTree, depth + 1);
            self.ctx
                .queue_scan(commit.tree_meta, ObjectType::DirMeta, depth + 1);
        }
        Ok(())
    }

    pub(crate) fn scan_dirtree(&mut self, checksum: Checksum, depth: u32) -> Result<(), Error> {
        if depth > MAX_RECURSION {
            return Err(Error::MaxRecursion);
        }

        let id = ObjectId::new(checksum, ObjectType::DirTree);
        let bytes = self.repo.load_object(&id)?;
        let tree = wire::deserialize::<DirTree>(&bytes)?;

        for entry in &tree.files {
            // In a restricted pull, only the file the filter names at
            // this level is taken.
            if let Some(dir) = &self.ctx.dir {
                debug_assert!(dir.starts_with('/'));
                if &dir[1..] != entry.name.as_str() {
                    continue;
                }
            }

            let file_id = ObjectId::new(entry.checksum, ObjectType::File);
            if self.repo.has_object(&file_id)? {
                continue;
            }
            if let Some(local) = &self.remote_repo_local {
                self.repo
                    .import_object_from(local, &file_id, !self.ctx.is_untrusted)?;
            } else if !self.ctx.requested_content.contains(&entry.checksum) {
                self.ctx.requested_content.insert(entry.checksum);
                self.fetch_object(entry.checksum, ObjectType::File);
            }
        }

        // Consume one component of the subdir filter: this level only
        // descends into its head, the rest applies below.
        let mut subdir_target = None;
        if let Some(dir) = self.ctx.dir.take() {
            let subpath = &dir[1..];
            match subpath.split_once('/') {
                Some((head, rest)) => {
                    subdir_target = Some(head.to_owned());
                    self.ctx.dir = Some(format!("/{rest}"));
                }
                None => subdir_target = Some(subpath.to_owned()),
            }
        }

        for entry in &tree.dirs {
            if let Some(target) = &subdir_target {
                if target != &entry.name {
                    continue;
                }
            }
            self.ctx
                .queue_scan(entry.tree, ObjectType::DirTree, depth + 1);
            self.ctx
                .queue_scan(entry.meta, ObjectType::DirMeta, depth + 1);
        }
        Ok(())
    }
}
