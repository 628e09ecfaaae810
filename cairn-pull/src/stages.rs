//! The staged front half of a pull: discover the base URL, load the
//! remote configuration, acquire and verify the summary, and resolve
//! every requested ref to a commit before handing over to the delta
//! planner and the object scanner.

use url::Url;

use cairn::checksum::{Checksum, ObjectType};
use cairn::keyfile::KeyFile;
use cairn::refname::RefName;
use cairn::sign::Verifier;
use cairn::store::{RepoMode, Store};
use cairn::summary::Summary;
use cairn::{wire, MAX_METADATA_SIZE};

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
    /// Entry into the pipeline: resolve the metalink if one is
    /// configured, otherwise go straight to the remote config.
    pub(crate) fn start(&mut self) -> Result<(), Error> {
        if let Some(metalink) = self.remote.metalink.clone() {
            let url = Url::parse(&metalink).map_err(|err| Error::Url {
                url: metalink.clone(),
                err,
            })?;
            self.ctx.fetch_started(FetchKind::Metalink);
            let request = self.request(url, Some(MAX_METADATA_SIZE), Priority::METADATA);
            let tx = self.tx.clone();
            self.fetcher.resolve_metalink(
                request,
                Box::new(move |result| {
                    tx.send(Event::Metalink(result)).ok();
                }),
            );
            Ok(())
        } else {
            self.fetch_config()
        }
    }

    pub(crate) fn metalink_resolved(
        &mut self,
        result: Result<fetcher::Metalink, fetcher::Error>,
    ) -> Result<(), Error> {
        let resolved = result?;
        // The metalink names the summary itself; the repository base is
        // its parent.
        let mut base = resolved.target.clone();
        base.path_segments_mut()
            .map_err(|_| Error::UrlNotBase(resolved.target.to_string()))?
            .pop_if_empty()
            .pop();
        self.base = Some(base);
        self.ctx.summary_data = Some(resolved.summary);
        self.fetch_config()
    }

    fn fetch_config(&mut self) -> Result<(), Error> {
        let base = self
            .base
            .as_ref()
            .expect("base url is set before the config stage");
        if base.scheme() == "file" {
            let path = base
                .to_file_path()
                .map_err(|_| Error::UrlNotBase(base.to_string()))?;
            let local = self.repo.open_remote(&path)?;
            self.ctx.remote_mode = Some(local.mode());
            self.ctx.has_tombstone_commits = local.tombstone_commits();
            self.remote_repo_local = Some(local);
            return self.fetch_summary_sig();
        }

        self.ctx.fetch_started(FetchKind::Config);
        let url = self.suburl("config");
        let request = self.request(url, Some(MAX_METADATA_SIZE), Priority::METADATA);
        let tx = self.tx.clone();
        self.fetcher.stream(
            request,
            Box::new(move |result| {
                tx.send(Event::Config(result)).ok();
            }),
        );
        Ok(())
    }

    pub(crate) fn config_fetched(
        &mut self,
        result: Result<Vec<u8>, fetcher::Error>,
    ) -> Result<(), Error> {
        let bytes = result?;
        let text = String::from_utf8(bytes).map_err(|_| Error::ConfigEncoding)?;
        let keyfile = KeyFile::parse(&text)?;

        let mode_str = keyfile.string_or("core", "mode", "bare");
        self.ctx.has_tombstone_commits =
            keyfile.boolean_or("core", "tombstone-commits", false)?;
        let mode = mode_str
            .parse::<RepoMode>()
            .map_err(|_| Error::RemoteMode(mode_str.to_owned()))?;
        if mode != RepoMode::ArchiveZ2 {
            return Err(Error::RemoteMode(mode_str.to_owned()));
        }
        self.ctx.remote_mode = Some(mode);
        self.fetch_summary_sig()
    }

    fn fetch_summary_sig(&mut self) -> Result<(), Error> {
        if let Some(local) = &self.remote_repo_local {
            // Local remote: read the signature straight from the repo.
            self.ctx.summary_data_sig = local.summary_sig()?;
            return self.process_summary_sig();
        }
        self.ctx.fetch_started(FetchKind::SummarySig);
        let url = self.suburl("summary.sig");
        let request = self.request(url, Some(MAX_METADATA_SIZE), Priority::METADATA);
        let tx = self.tx.clone();
        self.fetcher.stream(
            request,
            Box::new(move |result| {
                tx.send(Event::SummarySig(result)).ok();
            }),
        );
        Ok(())
    }

    pub(crate) fn summary_sig_fetched(
        &mut self,
        result: Result<Vec<u8>, fetcher::Error>,
    ) -> Result<(), Error> {
        self.ctx.summary_data_sig = match result {
            Ok(bytes) => Some(bytes),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err.into()),
        };
        self.process_summary_sig()
    }

    fn process_summary_sig(&mut self) -> Result<(), Error> {
        if self.ctx.summary_data_sig.is_none() && self.ctx.gpg_verify_summary {
            return Err(Error::SummarySignatureRequired);
        }

        // If the freshly fetched signature matches the cached one, the
        // cached summary is current and a summary fetch is unnecessary.
        if self.ctx.summary_data.is_none() && self.remote_repo_local.is_none() {
            if let (Some(sig), Some(name)) = (&self.ctx.summary_data_sig, &self.remote_name) {
                self.ctx.summary_data = self.repo.cached_summary_matching_sig(name, sig)?;
            }
        }

        if self.ctx.summary_data.is_some() {
            return self.process_summary();
        }
        if let Some(local) = &self.remote_repo_local {
            self.ctx.summary_data = local.summary()?;
            return self.process_summary();
        }

        self.ctx.fetch_started(FetchKind::Summary);
        let url = self.suburl("summary");
        let request = self.request(url, Some(MAX_METADATA_SIZE), Priority::METADATA);
        let tx = self.tx.clone();
        self.fetcher.stream(
            request,
            Box::new(move |result| {
                tx.send(Event::Summary(result)).ok();
            }),
        );
        Ok(())
    }

    pub(crate) fn summary_fetched(
        &mut self,
        result: Result<Vec<u8>, fetcher::Error>,
    ) -> Result<(), Error> {
        self.ctx.summary_data = match result {
            Ok(bytes) => Some(bytes),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err.into()),
        };

        if let (Some(summary), Some(sig)) = (&self.ctx.summary_data, &self.ctx.summary_data_sig)
        {
            if self.remote_repo_local.is_none() {
                if let Some(name) = &self.remote_name {
                    self.repo.cache_summary(name, summary, sig)?;
                }
            }
        }
        self.process_summary()
    }

    fn process_summary(&mut self) -> Result<(), Error> {
        let fetch_all_refs =
            self.ctx.is_mirror && self.ctx.requested_refs_to_fetch.is_empty();

        if self.ctx.summary_data.is_none() {
            if self.ctx.gpg_verify_summary {
                return Err(Error::SummaryRequiredForVerify);
            }
            if self.ctx.require_static_deltas {
                return Err(Error::SummaryRequiredForDeltas);
            }
            if fetch_all_refs {
                return Err(Error::SummaryRequiredForMirror);
            }
        }

        if self.ctx.gpg_verify_summary {
            if let (Some(summary), Some(sig)) =
                (&self.ctx.summary_data, &self.ctx.summary_data_sig)
            {
                let name = self
                    .remote_name
                    .as_deref()
                    .expect("remote name is required when verification is enabled");
                let verification = self
                    .verifier
                    .verify_summary(name, summary, sig)
                    .map_err(|err| Error::Verifier { err: Box::new(err) })?;
                if !verification.any_valid() {
                    return Err(Error::NoTrustedSignature);
                }
            }
        }

        if let Some(bytes) = &self.ctx.summary_data {
            self.ctx.summary = Some(wire::deserialize::<Summary>(bytes)?);
        }

        if self.ctx.fetch_only_summary {
            return Ok(());
        }

        if let Some(summary) = &self.ctx.summary {
            if fetch_all_refs {
                for r in summary.refs() {
                    self.ctx
                        .requested_refs_to_fetch
                        .insert(r.name.clone(), None);
                }
            }
            for (name, checksum) in summary.static_deltas()? {
                self.ctx.summary_deltas_checksums.insert(name, checksum);
            }
        }

        let pending = self
            .ctx
            .requested_refs_to_fetch
            .iter()
            .map(|(name, target)| (name.clone(), *target))
            .collect::<Vec<_>>();
        for (branch, override_id) in pending {
            let from = self.repo.resolve_rev(branch.as_str())?;

            if let Some(to) = override_id {
                self.fetch_revision(branch, from, to)?;
            } else if let Some(summary) = &self.ctx.summary {
                let advertised = summary
                    .lookup(&branch)
                    .ok_or_else(|| Error::NoSuchBranch(branch.clone()))?;
                let (to, size) = (advertised.checksum, advertised.commit_size);
                self.ctx.expected_commit_sizes.insert(to, size);
                self.fetch_revision(branch, from, to)?;
            } else {
                log::debug!(target: "pull", "fetching ref {branch}");
                self.ctx.fetch_started(FetchKind::Ref);
                let url = self.suburl(&format!("refs/heads/{branch}"));
                let request = self.request(url, Some(MAX_METADATA_SIZE), Priority::METADATA);
                let tx = self.tx.clone();
                self.fetcher.stream(
                    request,
                    Box::new(move |result| {
                        tx.send(Event::Ref {
                            branch,
                            from,
                            result,
                        })
                        .ok();
                    }),
                );
            }
        }

        for commit in self.ctx.commits_to_fetch.clone() {
            self.ctx.queue_scan(commit, ObjectType::Commit, 0);
        }
        Ok(())
    }

    pub(crate) fn ref_fetched(
        &mut self,
        branch: RefName,
        from: Option<Checksum>,
        result: Result<Vec<u8>, fetcher::Error>,
    ) -> Result<(), Error> {
        let bytes = result?;
        let text = String::from_utf8(bytes)
            .map_err(|err| Error::InvalidRev(String::from_utf8_lossy(err.as_bytes()).into_owned()))?;
        let trimmed = text.trim_end();
        let to = trimmed
            .parse::<Checksum>()
            .map_err(|_| Error::InvalidRev(trimmed.to_owned()))?;
        self.fetch_revision(branch, from, to)
    }

    /// Record the resolved target for `branch` and fetch it, preferring
    /// a static delta over individual objects when allowed.
    pub(crate) fn fetch_revision(
        &mut self,
        branch: RefName,
        from: Option<Checksum>,
        to: Checksum,
    ) -> Result<(), Error> {
        self.ctx.requested_refs_to_fetch.insert(branch, Some(to));

        if !self.ctx.disable_static_deltas && from != Some(to) {
            log::debug!(target: "pull", "fetching delta {}", cairn::delta::name(from.as_ref(), &to));
            self.ctx.fetch_started(FetchKind::DeltaSuper);
            let url = self.suburl(&cairn::delta::superblock_path(from.as_ref(), &to));
            let request = self.request(url, Some(MAX_METADATA_SIZE), Priority::METADATA);
            let tx = self.tx.clone();
            self.fetcher.stream(
                request,
                Box::new(move |result| {
                    tx.send(Event::DeltaSuperblock { from, to, result }).ok();
                }),
            );
            Ok(())
        } else {
            self.process_delta_superblock(from, to, None)
        }
    }
}

/// Whether `remote` names a URL rather than a configured remote.
pub(crate) fn parse_remote_url(remote: &str) -> Option<Url> {
    let url = Url::parse(remote).ok()?;
    matches!(url.scheme(), "file" | "http" | "https").then_some(url)
}

pub(crate) fn parse_base_url(url: &str) -> Result<Url, Error> {
    let parsed = Url::parse(url).map_err(|err| Error::Url {
        url: url.to_owned(),
        err,
    })?;
    if parsed.cannot_be_a_base() {
        return Err(Error::UrlNotBase(url.to_owned()));
    }
    Ok(parsed)
}

