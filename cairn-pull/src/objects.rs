//! Individual object fetches and their write completions.

use std::fs;
use std::path::PathBuf;

use cairn::checksum::{Checksum, ObjectId, ObjectType};
use cairn::commit::Commit;
use cairn::content::ContentObject;
use cairn::sign::Verifier;
use cairn::store::{RepoMode, Store};
use cairn::tree::{DirMeta, DirTree};
use cairn::{wire, MAX_METADATA_SIZE};

use crate::context::FetchKind;
use crate::engine::{Event, Pull};
use crate::fetcher::{self, Fetcher, Priority};
use crate::Error;

/// Check that fetched bytes decode as the claimed metadata kind before
/// anything is written.
fn validate_metadata(objtype: ObjectType, data: &[u8]) -> Result<(), Error> {
    match objtype {
        ObjectType::Commit => {
            wire::deserialize::<Commit>(data)?;
        }
        ObjectType::DirTree => {
            wire::deserialize::<DirTree>(data)?;
        }
        ObjectType::DirMeta => {
            wire::deserialize::<DirMeta>(data)?;
        }
        ObjectType::CommitMeta => {
            let mut reader = data;
            wire::decode_map(&mut reader)?;
        }
        ObjectType::TombstoneCommit | ObjectType::File => {}
    }
    Ok(())
}

impl<'a, 'b, S, F, V> Pull<'a, 'b, S, F, V>
where
    S: Store,
    F: Fetcher,
    V: Verifier,
{
    pub(crate) fn fetch_object(&mut self, checksum: Checksum, objtype: ObjectType) {
        let id = ObjectId::new(checksum, objtype);
        log::debug!(target: "pull", "queuing fetch of {id}");

        let kind = FetchKind::for_object(objtype);
        self.ctx.fetch_started(kind);
        self.ctx.count_requested(kind);

        // Detached metadata has no size bound; commits advertised by
        // the summary have a known size; other metadata is capped;
        // content is unbounded.
        let max_size = if objtype.is_detached() {
            None
        } else if let Some(size) = self.ctx.expected_commit_sizes.get(&checksum) {
            Some(*size)
        } else if objtype.is_meta() {
            Some(MAX_METADATA_SIZE)
        } else {
            None
        };
        let priority = if objtype.is_meta() {
            Priority::METADATA
        } else {
            Priority::CONTENT
        };

        let url = self.suburl(&id.loose_path());
        let request = self.request(url, max_size, priority);
        let tx = self.tx.clone();
        self.fetcher.fetch_to_temp(
            request,
            Box::new(move |result| {
                tx.send(Event::Object { id, result }).ok();
            }),
        );
    }

    pub(crate) fn meta_fetched(
        &mut self,
        id: ObjectId,
        result: Result<PathBuf, fetcher::Error>,
    ) -> Result<(), Error> {
        log::debug!(target: "pull", "fetch of {id} complete");

        let temp = match result {
            Ok(path) => path,
            Err(err) if err.is_not_found() => {
                if id.objtype == ObjectType::CommitMeta {
                    // There is no detached metadata; not an error.
                    return Ok(());
                }
                if id.objtype == ObjectType::Commit && self.ctx.maxdepth != 0 {
                    // Dangling parent reference in a partial remote. If
                    // the remote keeps tombstones, find out whether the
                    // commit was deleted on purpose.
                    if self.ctx.has_tombstone_commits {
                        self.fetch_object(id.checksum, ObjectType::TombstoneCommit);
                    }
                    return Ok(());
                }
                return Err(err.into());
            }
            Err(err) => return Err(err.into()),
        };

        if id.objtype == ObjectType::TombstoneCommit {
            // Tombstones are empty; nothing to process.
            let _ = fs::remove_file(&temp);
            return Ok(());
        }

        let data = fs::read(&temp)?;
        // The contents are in memory; drop the tempfile now.
        let _ = fs::remove_file(&temp);
        validate_metadata(id.objtype, &data)?;

        // Mark the commit partial while its closure is still arriving.
        if id.objtype == ObjectType::Commit {
            self.repo.mark_commit_partial(&id.checksum)?;
        }

        if id.objtype == ObjectType::CommitMeta {
            // Detached metadata is written synchronously; it has no
            // content address of its own.
            self.repo
                .write_commit_detached_metadata(&id.checksum, &data)?;
        } else {
            self.ctx.write_started(FetchKind::Metadata);
            self.tx.send(Event::WriteMetadata { id, data }).ok();
        }
        Ok(())
    }

    pub(crate) fn metadata_written(&mut self, id: ObjectId, data: Vec<u8>) -> Result<(), Error> {
        let actual = self.repo.write_metadata(id.objtype, &id.checksum, &data)?;
        log::debug!(target: "pull", "write of {id} complete");
        if actual != id.checksum {
            return Err(Error::CorruptMetadata {
                expected: id.checksum,
                actual,
            });
        }
        self.ctx.queue_scan(id.checksum, id.objtype, 0);
        Ok(())
    }

    pub(crate) fn content_fetched(
        &mut self,
        checksum: Checksum,
        result: Result<PathBuf, fetcher::Error>,
    ) -> Result<(), Error> {
        let temp = result?;
        log::debug!(target: "pull", "fetch of {checksum}.file complete");

        let id = ObjectId::new(checksum, ObjectType::File);
        if self.ctx.is_mirror && self.repo.mode() == RepoMode::ArchiveZ2 {
            // Mirrors adopt the wire representation as-is.
            if !self.repo.has_object(&id)? {
                self.repo.commit_loose_final(&id, &temp)?;
            } else {
                let _ = fs::remove_file(&temp);
            }
            self.ctx.count_fetched(FetchKind::Content);
            return Ok(());
        }

        let raw = fs::read(&temp)?;
        let object = match ContentObject::parse(&raw) {
            Ok(object) => object,
            Err(err) => {
                // Corrupted payload; drop it so it gets re-fetched.
                let _ = fs::remove_file(&temp);
                return Err(err.into());
            }
        };
        let _ = fs::remove_file(&temp);

        self.ctx.write_started(FetchKind::Content);
        self.tx.send(Event::WriteContent { checksum, object }).ok();
        Ok(())
    }

    pub(crate) fn content_written(
        &mut self,
        checksum: Checksum,
        object: ContentObject,
    ) -> Result<(), Error> {
        let actual = self.repo.write_content(&checksum, &object)?;
        log::debug!(target: "pull", "write of {checksum}.file complete");
        if actual != checksum {
            return Err(Error::CorruptContent {
                expected: checksum,
                actual,
            });
        }
        self.ctx.count_fetched(FetchKind::Content);
        Ok(())
    }
}
