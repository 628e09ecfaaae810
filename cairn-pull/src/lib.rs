//! The pull engine: replicate a set of refs and their transitive
//! object closure from a remote repository into a local one.
//!
//! The engine is generic over the object store ([`cairn::Store`]), the
//! HTTP fetcher ([`Fetcher`]) and the signature verifier
//! ([`cairn::sign::Verifier`]); it owns ref resolution, summary and
//! config acquisition, static-delta planning, the recursive object
//! scan, checksum and signature enforcement, and the transactional
//! commit of the fetched state.

pub mod fetcher;
pub mod progress;

mod context;
mod delta;
mod engine;
mod objects;
mod scan;
mod stages;

use std::str::FromStr;

use thiserror::Error;

use cairn::checksum::Checksum;
use cairn::refname::RefName;
use cairn::remote::Remote;
use cairn::sign::Verifier;
use cairn::store::Store;

use context::Context;
use engine::Pull;
use stages::{parse_base_url, parse_remote_url};

pub use fetcher::{Cancel, Fetcher, FetcherConfig};
pub use progress::{Collector, Progress, Snapshot};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid pull options: {0}")]
    Options(&'static str),

    #[error("remote '{0}' is not configured")]
    UnknownRemote(String),

    #[error("no configured branches for remote '{0}'")]
    NoBranches(String),

    #[error("must specify remote name to enable signature verification")]
    MissingRemoteName,

    #[error("remote '{0}' must specify both tls-client-cert-path and tls-client-key-path")]
    TlsClientPair(String),

    #[error("remote '{0}' has no url configured")]
    MissingUrl(String),

    #[error("failed to parse url '{url}'")]
    Url {
        url: String,
        #[source]
        err: url::ParseError,
    },

    #[error("url '{0}' cannot serve as a repository base")]
    UrlNotBase(String),

    #[error("can't pull from remote archives with mode '{0}'")]
    RemoteMode(String),

    #[error("remote config is not valid UTF-8")]
    ConfigEncoding,

    #[error("invalid ref name")]
    RefName(#[from] cairn::refname::Error),

    #[error("invalid override commit id '{0}'")]
    OverrideCommitId(String),

    #[error("signature verification enabled, but no summary found (set gpg-verify-summary=false in the remote config to disable)")]
    SummaryRequiredForVerify,

    #[error("signature verification enabled, but no summary.sig found (set gpg-verify-summary=false in the remote config to disable)")]
    SummarySignatureRequired,

    #[error("static deltas required, but the remote has no summary")]
    SummaryRequiredForDeltas,

    #[error("fetching all refs was requested in mirror mode, but the remote has no summary")]
    SummaryRequiredForMirror,

    #[error("signatures found, but none are in the trusted keyring")]
    NoTrustedSignature,

    #[error("signature verification failed")]
    Verifier {
        #[source]
        err: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("summary advertises no checksum for static delta {0}")]
    DeltaChecksumMissing(String),

    #[error("invalid checksum for static delta {0}")]
    DeltaChecksumMismatch(String),

    #[error("corrupted metadata object; checksum expected={expected} actual={actual}")]
    CorruptMetadata {
        expected: Checksum,
        actual: Checksum,
    },

    #[error("corrupted content object; checksum expected={expected} actual={actual}")]
    CorruptContent {
        expected: Checksum,
        actual: Checksum,
    },

    #[error("no such branch '{0}' in repository summary")]
    NoSuchBranch(RefName),

    #[error("invalid rev '{0}'")]
    InvalidRev(String),

    #[error("delta part has too new version {0}")]
    DeltaPartVersion(u32),

    #[error("static deltas required, but none found for {0}")]
    DeltasRequired(String),

    #[error("exceeded maximum recursion depth")]
    MaxRecursion,

    #[error(transparent)]
    Wire(#[from] cairn::wire::Error),

    #[error(transparent)]
    Config(#[from] cairn::keyfile::Error),

    #[error(transparent)]
    RemoteConfig(#[from] cairn::remote::Error),

    #[error(transparent)]
    DeltaOpen(#[from] cairn::delta::error::Open),

    #[error(transparent)]
    DeltaApply(#[from] cairn::delta::error::Apply),

    #[error(transparent)]
    Fetch(#[from] fetcher::Error),

    #[error(transparent)]
    Store(#[from] cairn::store::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("pull cancelled")]
    Cancelled,
}

/// Pull behavior flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PullFlags {
    /// Replicate remote refs and the summary verbatim into the local
    /// repository root.
    pub mirror: bool,
    /// Fetch commit objects only; no trees or content.
    pub commit_only: bool,
    /// Re-verify checksums when importing from local remotes.
    pub untrusted: bool,
}

impl PullFlags {
    pub const MIRROR: u32 = 1;
    pub const COMMIT_ONLY: u32 = 1 << 1;
    pub const UNTRUSTED: u32 = 1 << 2;

    pub fn from_bits(bits: u32) -> Self {
        Self {
            mirror: bits & Self::MIRROR != 0,
            commit_only: bits & Self::COMMIT_ONLY != 0,
            untrusted: bits & Self::UNTRUSTED != 0,
        }
    }
}

/// Options accepted by [`pull_with_options`].
#[derive(Clone, Debug, Default)]
pub struct PullOptions {
    /// Refs to pull, overriding the remote's configured branches. A
    /// 64-character checksum string is pulled as a bare commit.
    pub refs: Vec<String>,
    pub flags: PullFlags,
    /// Restrict content fetches to this path; must start with `/`.
    pub subdir: Option<String>,
    /// For URL pulls, the remote identity to use for signatures and
    /// ref scoping.
    pub override_remote_name: Option<String>,
    /// Require valid per-commit signatures. Only consulted for URL
    /// pulls; configured remotes use their own setting.
    pub gpg_verify: Option<bool>,
    /// Require a valid summary signature. Only consulted for URL pulls.
    pub gpg_verify_summary: Option<bool>,
    /// History depth: 0 pulls only the tip, -1 is unbounded.
    pub depth: i32,
    pub disable_static_deltas: bool,
    pub require_static_deltas: bool,
    /// Force each ref in `refs` to a specific commit; empty strings
    /// leave the corresponding ref unpinned.
    pub override_commit_ids: Vec<String>,
    /// Report what would be transferred without writing; requires
    /// `require_static_deltas`.
    pub dry_run: bool,
    /// Base URL override, honored when the remote has no metalink.
    pub override_url: Option<String>,
}

/// Options accepted by [`remote_fetch_summary_with_options`].
#[derive(Clone, Debug, Default)]
pub struct SummaryOptions {
    pub gpg_verify_summary: Option<bool>,
    pub override_url: Option<String>,
}

/// Raw summary artifacts returned by the summary-only entry point.
#[derive(Clone, Debug, Default)]
pub struct SummaryBytes {
    pub summary: Option<Vec<u8>>,
    pub signature: Option<Vec<u8>>,
}

/// Replicate `remote` into `repo` according to `options`.
///
/// `remote` is either the name of a configured remote or a bare
/// `file://`/`http(s)://` URL. The transaction is committed on success
/// and aborted on error (and after a dry run).
pub fn pull_with_options<S, F, V>(
    repo: &mut S,
    remote: &str,
    options: PullOptions,
    fetcher: &mut F,
    verifier: &V,
    progress: Option<&mut dyn Progress>,
    cancel: Cancel,
) -> Result<(), Error>
where
    S: Store,
    F: Fetcher,
    V: Verifier,
{
    if options.depth < -1 {
        return Err(Error::Options("depth must be -1 or greater"));
    }
    if !options.refs.is_empty()
        && !options.override_commit_ids.is_empty()
        && options.refs.len() != options.override_commit_ids.len()
    {
        return Err(Error::Options("override-commit-ids must match refs in length"));
    }
    if let Some(subdir) = &options.subdir {
        if !subdir.starts_with('/') {
            return Err(Error::Options("subdir must start with '/'"));
        }
    }
    if options.disable_static_deltas && options.require_static_deltas {
        return Err(Error::Options(
            "disable-static-deltas conflicts with require-static-deltas",
        ));
    }
    // Without a delta superblock there is no size information to
    // report up front.
    if options.dry_run && !options.require_static_deltas {
        return Err(Error::Options("dry-run requires require-static-deltas"));
    }

    let mut ctx = Context::new(cancel);
    ctx.is_mirror = options.flags.mirror;
    ctx.is_commit_only = options.flags.commit_only;
    ctx.is_untrusted = options.flags.untrusted;
    ctx.maxdepth = options.depth;
    ctx.dir = options.subdir.clone();
    ctx.disable_static_deltas = options.disable_static_deltas;
    ctx.require_static_deltas = options.require_static_deltas;
    ctx.dry_run = options.dry_run;

    // A URL is an anonymous remote; a name is looked up in the
    // repository configuration, which also decides verification.
    let (remote_config, remote_name) = match parse_remote_url(remote) {
        Some(_) => {
            ctx.gpg_verify = options.gpg_verify.unwrap_or(false);
            ctx.gpg_verify_summary = options.gpg_verify_summary.unwrap_or(false);
            let name = options.override_remote_name.clone();
            if (ctx.gpg_verify || ctx.gpg_verify_summary) && name.is_none() {
                return Err(Error::MissingRemoteName);
            }
            (Remote::for_url(remote), name)
        }
        None => {
            let config = repo
                .remote(remote)?
                .ok_or_else(|| Error::UnknownRemote(remote.to_owned()))?;
            ctx.gpg_verify = config.gpg_verify;
            ctx.gpg_verify_summary = config.gpg_verify_summary;
            (config, Some(remote.to_owned()))
        }
    };

    // Refs come from the caller, or failing that the remote's
    // configured branches; checksum strings are pulled directly.
    if !options.refs.is_empty() {
        for (index, name) in options.refs.iter().enumerate() {
            if let Ok(checksum) = Checksum::from_str(name) {
                ctx.commits_to_fetch.insert(checksum);
                continue;
            }
            let branch = RefName::try_from(name.as_str())?;
            let override_id = match options.override_commit_ids.get(index).map(String::as_str) {
                None | Some("") => None,
                Some(id) => Some(
                    Checksum::from_str(id).map_err(|_| Error::OverrideCommitId(id.to_owned()))?,
                ),
            };
            ctx.requested_refs_to_fetch.insert(branch, override_id);
        }
    } else {
        if remote_config.branches.is_empty() && !ctx.is_mirror {
            return Err(Error::NoBranches(remote.to_owned()));
        }
        for branch in &remote_config.branches {
            ctx.requested_refs_to_fetch.insert(branch.clone(), None);
        }
    }

    configure_fetcher(fetcher, &remote_config, remote)?;
    let base = resolve_base(&remote_config, options.override_url.as_deref(), remote)?;

    ctx.legacy_transaction_resuming = repo.prepare_transaction()?;
    if ctx.legacy_transaction_resuming {
        log::debug!(target: "pull", "resuming interrupted transaction");
    }

    let had_subdir = options.subdir.is_some();
    let mut pull = Pull::new(
        repo,
        fetcher,
        verifier,
        progress,
        remote_config,
        remote_name,
        base,
        ctx,
        had_subdir,
    );
    let result = pull.run().and_then(|()| pull.finish());
    drop(pull);
    let _ = repo.abort_transaction();
    result
}

/// Fetch only the remote's summary and signature, without touching any
/// refs or objects.
pub fn remote_fetch_summary_with_options<S, F, V>(
    repo: &mut S,
    remote: &str,
    options: SummaryOptions,
    fetcher: &mut F,
    verifier: &V,
    cancel: Cancel,
) -> Result<SummaryBytes, Error>
where
    S: Store,
    F: Fetcher,
    V: Verifier,
{
    let mut ctx = Context::new(cancel);
    ctx.fetch_only_summary = true;

    let (remote_config, remote_name) = match parse_remote_url(remote) {
        Some(_) => {
            ctx.gpg_verify_summary = options.gpg_verify_summary.unwrap_or(false);
            if ctx.gpg_verify_summary {
                return Err(Error::MissingRemoteName);
            }
            (Remote::for_url(remote), None)
        }
        None => {
            let config = repo
                .remote(remote)?
                .ok_or_else(|| Error::UnknownRemote(remote.to_owned()))?;
            ctx.gpg_verify_summary = config.gpg_verify_summary;
            (config, Some(remote.to_owned()))
        }
    };

    configure_fetcher(fetcher, &remote_config, remote)?;
    let base = resolve_base(&remote_config, options.override_url.as_deref(), remote)?;

    ctx.legacy_transaction_resuming = repo.prepare_transaction()?;

    let mut pull = Pull::new(
        repo,
        fetcher,
        verifier,
        None,
        remote_config,
        remote_name,
        base,
        ctx,
        false,
    );
    let result = pull.run().and_then(|()| pull.finish_summary());
    drop(pull);
    let _ = repo.abort_transaction();
    result
}

fn configure_fetcher<F: Fetcher>(
    fetcher: &mut F,
    remote: &Remote,
    remote_name: &str,
) -> Result<(), Error> {
    if remote.tls_client_cert_path.is_some() != remote.tls_client_key_path.is_some() {
        return Err(Error::TlsClientPair(remote_name.to_owned()));
    }
    fetcher.configure(FetcherConfig {
        tls_permissive: remote.tls_permissive,
        tls_client_cert_path: remote.tls_client_cert_path.clone(),
        tls_client_key_path: remote.tls_client_key_path.clone(),
        tls_ca_path: remote.tls_ca_path.clone(),
        proxy: remote.proxy.clone(),
    });
    Ok(())
}

/// Resolve the base URL now unless a metalink will supply it later.
fn resolve_base(
    remote: &Remote,
    override_url: Option<&str>,
    remote_name: &str,
) -> Result<Option<url::Url>, Error> {
    if remote.metalink.is_some() {
        return Ok(None);
    }
    let url = override_url
        .map(str::to_owned)
        .or_else(|| remote.url.clone())
        .ok_or_else(|| Error::MissingUrl(remote_name.to_owned()))?;
    parse_base_url(&url).map(Some)
}
