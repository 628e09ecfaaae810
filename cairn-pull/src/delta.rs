//! The delta planner: turn a (from, to) revision pair into superblock
//! and part fetches, falling back to the object scanner when the remote
//! carries no delta.

use std::fs;
use std::path::PathBuf;

use cairn::checksum::{Checksum, ObjectId, ObjectType};
use cairn::delta::{self, Fallback, Part, Superblock, MAX_PART_VERSION};
use cairn::sign::Verifier;
use cairn::store::Store;

use crate::context::FetchKind;
use crate::engine::{Event, Pull};
use crate::fetcher::{self, Fetcher, Priority};
use crate::Error;

impl<'a, 'b, S, F, V> Pull<'a, 'b, S, F, V>
where
    S: Store,
    F: Fetcher,
    V: Verifier,
{
    pub(crate) fn delta_superblock_fetched(
        &mut self,
        from: Option<Checksum>,
        to: Checksum,
        result: Result<Vec<u8>, fetcher::Error>,
    ) -> Result<(), Error> {
        let data = match result {
            Ok(bytes) => Some(bytes),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err.into()),
        };
        self.process_delta_superblock(from, to, data)
    }

    /// Verify and expand a fetched superblock, or fall back to a plain
    /// commit scan when the remote has no delta for this pair.
    pub(crate) fn process_delta_superblock(
        &mut self,
        from: Option<Checksum>,
        to: Checksum,
        data: Option<Vec<u8>>,
    ) -> Result<(), Error> {
        let name = delta::name(from.as_ref(), &to);
        let Some(bytes) = data else {
            if self.ctx.require_static_deltas {
                return Err(Error::DeltasRequired(name));
            }
            log::debug!(target: "pull", "no delta superblock for {name}");
            self.ctx.queue_scan(to, ObjectType::Commit, 0);
            return Ok(());
        };

        let actual = Checksum::digest(&bytes);
        let advertised = self.ctx.summary_deltas_checksums.get(&name).copied();
        // The summary was signature-verified; a delta it does not
        // vouch for is a hard error, as is a digest mismatch.
        if self.ctx.gpg_verify_summary && advertised.is_none() {
            return Err(Error::DeltaChecksumMissing(name));
        }
        if let Some(expected) = advertised {
            if expected != actual {
                return Err(Error::DeltaChecksumMismatch(name));
            }
        }

        let superblock = Superblock::decode(&bytes)?;
        log::debug!(target: "pull", "processing delta superblock for {name}");
        self.ctx.n_delta_superblocks += 1;
        self.process_one_delta(from, to, &superblock)
    }

    fn process_one_delta(
        &mut self,
        from: Option<Checksum>,
        to: Checksum,
        superblock: &Superblock,
    ) -> Result<(), Error> {
        for fallback in &superblock.fallbacks {
            self.process_delta_fallback(fallback)?;
        }

        // Write the target commit from its embedded copy.
        if !self.ctx.dry_run {
            let id = ObjectId::new(superblock.to, ObjectType::Commit);
            if !self.repo.has_object(&id)? {
                let detached_key = delta::rel_path(from.as_ref(), &to, "commitmeta");
                if let Some(detached) = superblock.metadata_value(&detached_key) {
                    let detached = detached.to_vec();
                    self.repo
                        .write_commit_detached_metadata(&superblock.to, &detached)?;
                }
                self.ctx.write_started(FetchKind::Metadata);
                self.tx
                    .send(Event::WriteMetadata {
                        id,
                        data: superblock.commit.clone(),
                    })
                    .ok();
            }
        }

        self.ctx.n_total_deltaparts += superblock.parts.len() as u32;
        let trusted = self.ctx.gpg_verify_summary && self.ctx.summary_data_sig.is_some();

        for (index, header) in superblock.parts.iter().enumerate() {
            if header.version > MAX_PART_VERSION {
                return Err(Error::DeltaPartVersion(header.version));
            }

            let mut have_all = true;
            for object in &header.objects {
                if !self.repo.has_object(object)? {
                    have_all = false;
                    break;
                }
            }
            if have_all {
                log::debug!(
                    target: "pull",
                    "have all objects from delta {} part {index}",
                    delta::name(from.as_ref(), &to)
                );
                self.ctx.count_fetched(FetchKind::DeltaPart);
                continue;
            }

            let part_key = delta::part_path(from.as_ref(), &to, index);
            let inline = superblock.metadata_value(&part_key).map(<[u8]>::to_vec);

            self.ctx.total_deltapart_size += header.size;
            self.ctx.total_deltapart_usize += header.uncompressed_size;
            if self.ctx.dry_run {
                continue;
            }

            if let Some(inline) = inline {
                // Inline parts live inside the signed superblock; skip
                // the separate digest.
                let part = Part::open(&inline, None)?;
                self.ctx.write_started(FetchKind::DeltaPart);
                self.tx
                    .send(Event::ApplyDeltaPart {
                        objects: header.objects.clone(),
                        part,
                        trusted,
                    })
                    .ok();
            } else {
                self.ctx.fetch_started(FetchKind::DeltaPart);
                let url = self.suburl(&part_key);
                let request = self.request(url, Some(header.size), Priority::DEFAULT);
                let expected = header.checksum;
                let objects = header.objects.clone();
                let tx = self.tx.clone();
                self.fetcher.fetch_to_temp(
                    request,
                    Box::new(move |result| {
                        tx.send(Event::DeltaPart {
                            expected,
                            objects,
                            result,
                        })
                        .ok();
                    }),
                );
            }
        }
        Ok(())
    }

    fn process_delta_fallback(&mut self, fallback: &Fallback) -> Result<(), Error> {
        self.ctx.total_deltapart_size += fallback.size;
        self.ctx.total_deltapart_usize += fallback.uncompressed_size;
        if self.ctx.dry_run {
            return Ok(());
        }

        let id = ObjectId::new(fallback.checksum, fallback.objtype);
        if self.repo.has_object(&id)? {
            return Ok(());
        }
        if fallback.objtype.is_meta() {
            if !self.ctx.requested_metadata.contains(&fallback.checksum) {
                self.ctx.requested_metadata.insert(fallback.checksum);
                if fallback.objtype == ObjectType::Commit {
                    self.fetch_object(fallback.checksum, ObjectType::CommitMeta);
                }
                self.fetch_object(fallback.checksum, fallback.objtype);
            }
        } else if !self.ctx.requested_content.contains(&fallback.checksum) {
            self.ctx.requested_content.insert(fallback.checksum);
            self.fetch_object(fallback.checksum, ObjectType::File);
        }
        Ok(())
    }

    pub(crate) fn delta_part_fetched(
        &mut self,
        expected: Checksum,
        objects: Vec<ObjectId>,
        result: Result<PathBuf, fetcher::Error>,
    ) -> Result<(), Error> {
        log::debug!(target: "pull", "fetch of delta part {expected} complete");
        let temp = result?;
        let bytes = fs::read(&temp)?;
        // From here on a failed apply means a re-fetch.
        fs::remove_file(&temp)?;

        let part = Part::open(&bytes, Some(&expected))?;
        let trusted = self.ctx.gpg_verify_summary && self.ctx.summary_data_sig.is_some();
        self.ctx.write_started(FetchKind::DeltaPart);
        self.tx
            .send(Event::ApplyDeltaPart {
                objects,
                part,
                trusted,
            })
            .ok();
        Ok(())
    }
}
