//! The object-store contract.
//!
//! The pull engine drives a repository exclusively through [`Store`];
//! concrete backends decide layout, durability and locking. The
//! [`memory`] implementation backs the test suite and local pulls in
//! environments without an on-disk repository.

pub mod memory;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;

use crate::checksum::{Checksum, ObjectId, ObjectType};
use crate::commit::Commit;
use crate::content::ContentObject;
use crate::refname::RefName;
use crate::remote::Remote;
use crate::wire;

/// On-disk representation of a repository.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RepoMode {
    #[default]
    Bare,
    ArchiveZ2,
}

impl RepoMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bare => "bare",
            Self::ArchiveZ2 => "archive-z2",
        }
    }
}

impl fmt::Display for RepoMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown repository mode '{0}'")]
pub struct UnknownMode(pub String);

impl FromStr for RepoMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bare" => Ok(Self::Bare),
            "archive-z2" => Ok(Self::ArchiveZ2),
            other => Err(UnknownMode(other.to_owned())),
        }
    }
}

/// Per-commit state flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommitState {
    /// A commitpartial marker exists: the commit's closure may be
    /// incomplete and should be re-scanned.
    pub partial: bool,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("object {0} not found")]
    NotFound(ObjectId),

    #[error("no repository at '{0}'")]
    NoRepository(std::path::PathBuf),

    #[error("no transaction in progress")]
    NoTransaction,

    #[error("malformed object {id}")]
    Corrupt {
        id: ObjectId,
        #[source]
        err: wire::Error,
    },

    #[error("imported object {id} has checksum {actual}")]
    ImportChecksum { id: ObjectId, actual: Checksum },

    #[error(transparent)]
    Remote(#[from] crate::remote::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A content-addressed object repository.
///
/// Object writes are idempotent and become visible immediately; the
/// transaction scopes *ref* updates, which are only published by
/// [`Store::commit_transaction`]. [`Store::prepare_transaction`]
/// reports whether an earlier transaction was interrupted, so a caller
/// can re-scan partially populated commits.
pub trait Store {
    fn mode(&self) -> RepoMode;

    /// Whether this repository advertises tombstone commits.
    fn tombstone_commits(&self) -> bool;

    fn has_object(&self, id: &ObjectId) -> Result<bool, Error>;

    /// Raw serialized bytes of a stored object.
    fn load_object(&self, id: &ObjectId) -> Result<Vec<u8>, Error>;

    fn load_commit(&self, checksum: &Checksum) -> Result<(Commit, CommitState), Error>;

    fn load_commit_detached_metadata(
        &self,
        checksum: &Checksum,
    ) -> Result<Option<Vec<u8>>, Error>;

    /// Write a metadata object, returning the checksum computed over
    /// the written bytes.
    fn write_metadata(
        &mut self,
        objtype: ObjectType,
        expected: &Checksum,
        data: &[u8],
    ) -> Result<Checksum, Error>;

    /// Write a content object, returning the checksum computed over its
    /// raw serialized form.
    fn write_content(
        &mut self,
        expected: &Checksum,
        object: &ContentObject,
    ) -> Result<Checksum, Error>;

    fn write_commit_detached_metadata(
        &mut self,
        checksum: &Checksum,
        data: &[u8],
    ) -> Result<(), Error>;

    /// Copy one object from another repository, re-verifying its
    /// checksum unless the source is trusted.
    fn import_object_from(&mut self, source: &Self, id: &ObjectId, verify: bool)
        -> Result<(), Error>;

    /// Adopt a fetched tempfile as a loose object without parsing it.
    /// Only meaningful for archive-mode mirrors.
    fn commit_loose_final(&mut self, id: &ObjectId, tempfile: &Path) -> Result<(), Error>;

    /// Resolve a rev string (a checksum, a local ref, or a
    /// remote-prefixed ref) to a commit checksum. Missing refs resolve
    /// to `None`.
    fn resolve_rev(&self, rev: &str) -> Result<Option<Checksum>, Error>;

    /// Begin a transaction. Returns whether an interrupted transaction
    /// is being resumed.
    fn prepare_transaction(&mut self) -> Result<bool, Error>;

    /// Stage a ref update. `remote` scopes the ref under that remote's
    /// namespace; `None` updates the global ref.
    fn transaction_set_ref(
        &mut self,
        remote: Option<&str>,
        name: &RefName,
        target: &Checksum,
    ) -> Result<(), Error>;

    fn commit_transaction(&mut self) -> Result<(), Error>;

    /// Abandon staged ref updates. Objects written in the meantime are
    /// kept so an interrupted pull can resume.
    fn abort_transaction(&mut self) -> Result<(), Error>;

    /// Create the commitpartial marker for a commit.
    fn mark_commit_partial(&mut self, checksum: &Checksum) -> Result<(), Error>;

    /// Remove the commitpartial marker, if present.
    fn clear_commit_partial(&mut self, checksum: &Checksum) -> Result<(), Error>;

    /// The `summary` file at the repository root, if any.
    fn summary(&self) -> Result<Option<Vec<u8>>, Error>;

    fn summary_sig(&self) -> Result<Option<Vec<u8>>, Error>;

    /// Atomically replace the root summary (and its signature when
    /// given); mirror pulls publish the remote's summary this way.
    fn replace_summary(&mut self, summary: &[u8], signature: Option<&[u8]>)
        -> Result<(), Error>;

    /// Cache a remote's summary and signature, keyed by remote name.
    /// Implementations replace atomically and fsync unless fsync is
    /// disabled repository-wide.
    fn cache_summary(
        &mut self,
        remote: &str,
        summary: &[u8],
        signature: &[u8],
    ) -> Result<(), Error>;

    /// Return the cached summary for `remote` if the cached signature
    /// matches `signature` byte for byte.
    fn cached_summary_matching_sig(
        &self,
        remote: &str,
        signature: &[u8],
    ) -> Result<Option<Vec<u8>>, Error>;

    /// Configuration of the named remote, if present.
    fn remote(&self, name: &str) -> Result<Option<Remote>, Error>;

    /// Open another repository of the same backend, for `file://`
    /// remotes.
    fn open_remote(&self, path: &Path) -> Result<Self, Error>
    where
        Self: Sized;
}
