use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::checksum::{Checksum, ObjectId, ObjectType};
use crate::commit::Commit;
use crate::content::ContentObject;
use crate::refname::RefName;
use crate::remote::Remote;
use crate::store::{CommitState, Error, RepoMode, Store};
use crate::wire;

#[derive(Clone, Debug, PartialEq)]
struct RefEdit {
    remote: Option<String>,
    name: RefName,
    target: Checksum,
}

/// An in-memory repository.
///
/// Object writes land directly in the object table and survive an
/// aborted transaction, mirroring the loose-object behavior the pull
/// engine depends on for resumption; only ref edits are staged.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MemoryStore {
    mode: RepoMode,
    tombstone_commits: bool,
    remotes: HashMap<String, Remote>,
    mounts: HashMap<PathBuf, MemoryStore>,
    objects: HashMap<ObjectId, Vec<u8>>,
    detached: HashMap<Checksum, Vec<u8>>,
    partial: HashSet<Checksum>,
    heads: HashMap<String, Checksum>,
    remote_refs: HashMap<String, Checksum>,
    summary_file: Option<Vec<u8>>,
    summary_sig_file: Option<Vec<u8>>,
    summary_cache: HashMap<String, (Vec<u8>, Vec<u8>)>,
    transaction: Option<Vec<RefEdit>>,
    interrupted: bool,
}

impl MemoryStore {
    pub fn new(mode: RepoMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn set_tombstone_commits(&mut self, enabled: bool) {
        self.tombstone_commits = enabled;
    }

    pub fn add_remote(&mut self, name: &str, remote: Remote) {
        self.remotes.insert(name.to_owned(), remote);
    }

    /// Make a repository reachable under `path` for `file://` pulls.
    pub fn mount(&mut self, path: impl Into<PathBuf>, store: MemoryStore) {
        self.mounts.insert(path.into(), store);
    }

    /// Point a local ref directly at a commit; used when building
    /// fixture repositories.
    pub fn set_head(&mut self, name: &RefName, target: Checksum) {
        self.heads.insert(name.as_str().to_owned(), target);
    }

    pub fn set_summary(&mut self, summary: Vec<u8>, signature: Option<Vec<u8>>) {
        self.summary_file = Some(summary);
        self.summary_sig_file = signature;
    }

    /// Whether the commitpartial marker exists for `checksum`.
    pub fn is_commit_partial(&self, checksum: &Checksum) -> bool {
        self.partial.contains(checksum)
    }

    /// All stored object ids, for test assertions.
    pub fn object_ids(&self) -> impl Iterator<Item = &ObjectId> {
        self.objects.keys()
    }
}

impl Store for MemoryStore {
    fn mode(&self) -> RepoMode {
        self.mode
    }

    fn tombstone_commits(&self) -> bool {
        self.tombstone_commits
    }

    fn has_object(&self, id: &ObjectId) -> Result<bool, Error> {
        Ok(self.objects.contains_key(id))
    }

    fn load_object(&self, id: &ObjectId) -> Result<Vec<u8>, Error> {
        self.objects.get(id).cloned().ok_or(Error::NotFound(*id))
    }

    fn load_commit(&self, checksum: &Checksum) -> Result<(Commit, CommitState), Error> {
        let id = ObjectId::new(*checksum, ObjectType::Commit);
        let bytes = self.load_object(&id)?;
        let commit =
            wire::deserialize::<Commit>(&bytes).map_err(|err| Error::Corrupt { id, err })?;
        let state = CommitState {
            partial: self.partial.contains(checksum),
        };
        Ok((commit, state))
    }

    fn load_commit_detached_metadata(
        &self,
        checksum: &Checksum,
    ) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.detached.get(checksum).cloned())
    }

    fn write_metadata(
        &mut self,
        objtype: ObjectType,
        expected: &Checksum,
        data: &[u8],
    ) -> Result<Checksum, Error> {
        debug_assert!(objtype.is_meta());
        let actual = Checksum::digest(data);
        log::debug!(target: "store", "writing {actual}.{objtype} (expected {expected})");
        self.objects
            .insert(ObjectId::new(actual, objtype), data.to_vec());
        Ok(actual)
    }

    fn write_content(
        &mut self,
        expected: &Checksum,
        object: &ContentObject,
    ) -> Result<Checksum, Error> {
        let raw = object.to_raw();
        let actual = Checksum::digest(&raw);
        log::debug!(target: "store", "writing {actual}.file (expected {expected})");
        self.objects
            .insert(ObjectId::new(actual, ObjectType::File), raw);
        Ok(actual)
    }

    fn write_commit_detached_metadata(
        &mut self,
        checksum: &Checksum,
        data: &[u8],
    ) -> Result<(), Error> {
        self.detached.insert(*checksum, data.to_vec());
        Ok(())
    }

    fn import_object_from(
        &mut self,
        source: &Self,
        id: &ObjectId,
        verify: bool,
    ) -> Result<(), Error> {
        let data = source.load_object(id)?;
        if verify {
            let actual = Checksum::digest(&data);
            if actual != id.checksum {
                return Err(Error::ImportChecksum { id: *id, actual });
            }
        }
        self.objects.insert(*id, data);
        Ok(())
    }

    fn commit_loose_final(&mut self, id: &ObjectId, tempfile: &Path) -> Result<(), Error> {
        let data = std::fs::read(tempfile)?;
        let _ = std::fs::remove_file(tempfile);
        self.objects.insert(*id, data);
        Ok(())
    }

    fn resolve_rev(&self, rev: &str) -> Result<Option<Checksum>, Error> {
        if let Ok(checksum) = Checksum::from_str(rev) {
            return Ok(Some(checksum));
        }
        if let Some(target) = self.remote_refs.get(rev).or_else(|| self.heads.get(rev)) {
            return Ok(Some(*target));
        }
        // A bare name resolves through a remote's refs when exactly one
        // remote carries it.
        let mut candidates = self
            .remote_refs
            .iter()
            .filter(|(name, _)| name.split_once('/').is_some_and(|(_, r)| r == rev))
            .map(|(_, target)| *target);
        match (candidates.next(), candidates.next()) {
            (Some(target), None) => Ok(Some(target)),
            _ => Ok(None),
        }
    }

    fn prepare_transaction(&mut self) -> Result<bool, Error> {
        let resuming = self.interrupted;
        self.transaction = Some(Vec::new());
        self.interrupted = true;
        Ok(resuming)
    }

    fn transaction_set_ref(
        &mut self,
        remote: Option<&str>,
        name: &RefName,
        target: &Checksum,
    ) -> Result<(), Error> {
        let edits = self.transaction.as_mut().ok_or(Error::NoTransaction)?;
        edits.push(RefEdit {
            remote: remote.map(str::to_owned),
            name: name.clone(),
            target: *target,
        });
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<(), Error> {
        let edits = self.transaction.take().ok_or(Error::NoTransaction)?;
        for edit in edits {
            match edit.remote {
                Some(remote) => {
                    self.remote_refs
                        .insert(format!("{}/{}", remote, edit.name), edit.target);
                }
                None => {
                    self.heads.insert(edit.name.as_str().to_owned(), edit.target);
                }
            }
        }
        self.interrupted = false;
        Ok(())
    }

    fn abort_transaction(&mut self) -> Result<(), Error> {
        // Dropping the staged ref edits; object writes are retained and
        // `interrupted` stays set so the next pull resumes.
        self.transaction = None;
        Ok(())
    }

    fn mark_commit_partial(&mut self, checksum: &Checksum) -> Result<(), Error> {
        self.partial.insert(*checksum);
        Ok(())
    }

    fn clear_commit_partial(&mut self, checksum: &Checksum) -> Result<(), Error> {
        self.partial.remove(checksum);
        Ok(())
    }

    fn summary(&self) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.summary_file.clone())
    }

    fn summary_sig(&self) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.summary_sig_file.clone())
    }

    fn replace_summary(
        &mut self,
        summary: &[u8],
        signature: Option<&[u8]>,
    ) -> Result<(), Error> {
        self.summary_file = Some(summary.to_vec());
        if let Some(signature) = signature {
            self.summary_sig_file = Some(signature.to_vec());
        }
        Ok(())
    }

    fn cache_summary(
        &mut self,
        remote: &str,
        summary: &[u8],
        signature: &[u8],
    ) -> Result<(), Error> {
        self.summary_cache
            .insert(remote.to_owned(), (summary.to_vec(), signature.to_vec()));
        Ok(())
    }

    fn cached_summary_matching_sig(
        &self,
        remote: &str,
        signature: &[u8],
    ) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.summary_cache.get(remote).and_then(|(summary, sig)| {
            (sig.as_slice() == signature).then(|| summary.clone())
        }))
    }

    fn remote(&self, name: &str) -> Result<Option<Remote>, Error> {
        Ok(self.remotes.get(name).cloned())
    }

    fn open_remote(&self, path: &Path) -> Result<Self, Error> {
        self.mounts
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NoRepository(path.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ref_edits_publish_on_commit_only() {
        let mut store = MemoryStore::new(RepoMode::ArchiveZ2);
        let name = RefName::try_from("main").unwrap();
        let target = Checksum::digest(b"commit");

        assert!(!store.prepare_transaction().unwrap());
        store
            .transaction_set_ref(Some("origin"), &name, &target)
            .unwrap();
        assert_eq!(store.resolve_rev("origin/main").unwrap(), None);

        store.commit_transaction().unwrap();
        assert_eq!(store.resolve_rev("origin/main").unwrap(), Some(target));
    }

    #[test]
    fn test_aborted_transaction_resumes() {
        let mut store = MemoryStore::new(RepoMode::ArchiveZ2);

        assert!(!store.prepare_transaction().unwrap());
        store.abort_transaction().unwrap();
        // The interrupted transaction is visible to the next pull.
        assert!(store.prepare_transaction().unwrap());
        store.commit_transaction().unwrap();
        assert!(!store.prepare_transaction().unwrap());
    }

    #[test]
    fn test_import_verifies_checksum() {
        let mut source = MemoryStore::new(RepoMode::ArchiveZ2);
        let data = b"dirmeta bytes";
        let good = source
            .write_metadata(ObjectType::DirMeta, &Checksum::digest(data), data)
            .unwrap();
        // Corrupt entry: stored under a checksum that isn't its digest.
        let bad = Checksum::digest(b"lies");
        source
            .objects
            .insert(ObjectId::new(bad, ObjectType::DirMeta), data.to_vec());

        let mut dest = MemoryStore::new(RepoMode::ArchiveZ2);
        dest.import_object_from(&source, &ObjectId::new(good, ObjectType::DirMeta), true)
            .unwrap();
        assert!(dest
            .import_object_from(&source, &ObjectId::new(bad, ObjectType::DirMeta), true)
            .is_err());
        // Trusted imports skip verification.
        dest.import_object_from(&source, &ObjectId::new(bad, ObjectType::DirMeta), false)
            .unwrap();
    }

    #[test]
    fn test_summary_cache_matches_on_signature() {
        let mut store = MemoryStore::new(RepoMode::ArchiveZ2);
        store.cache_summary("origin", b"summary", b"sig").unwrap();

        assert_eq!(
            store
                .cached_summary_matching_sig("origin", b"sig")
                .unwrap()
                .as_deref(),
            Some(&b"summary"[..])
        );
        assert_eq!(
            store.cached_summary_matching_sig("origin", b"other").unwrap(),
            None
        );
    }
}
