use std::io;

use crate::checksum::Checksum;
use crate::wire::{self, Decode, Encode};

/// A commit object.
///
/// The engine interprets the parent link and the two tree references;
/// `metadata` is carried opaquely (subject, timestamp, version labels
/// and whatever else the producer recorded).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    /// Parent commit, absent for a root commit.
    pub parent: Option<Checksum>,
    /// Root of the directory contents tree.
    pub tree_contents: Checksum,
    /// Metadata object of the root directory.
    pub tree_meta: Checksum,
    /// Opaque commit metadata.
    pub metadata: Vec<u8>,
}

impl Commit {
    /// Checksum of the serialized commit; this is the commit's identity.
    pub fn checksum(&self) -> Checksum {
        Checksum::digest(&wire::serialize(self))
    }
}

impl Encode for Commit {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        self.parent.encode(writer)?;
        self.tree_contents.encode(writer)?;
        self.tree_meta.encode(writer)?;
        self.metadata.encode(writer)
    }
}

impl Decode for Commit {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, wire::Error> {
        let parent = Option::<Checksum>::decode(reader)?;
        let tree_contents = Checksum::decode(reader)?;
        let tree_meta = Checksum::decode(reader)?;
        let metadata = Vec::<u8>::decode(reader)?;

        Ok(Self {
            parent,
            tree_contents,
            tree_meta,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn commit(parent: Option<Checksum>) -> Commit {
        Commit {
            parent,
            tree_contents: Checksum::digest(b"tree"),
            tree_meta: Checksum::digest(b"meta"),
            metadata: b"v=1".to_vec(),
        }
    }

    #[test]
    fn test_identity_covers_parent() {
        let root = commit(None);
        let child = commit(Some(root.checksum()));

        assert_ne!(root.checksum(), child.checksum());
        assert_eq!(
            wire::deserialize::<Commit>(&wire::serialize(&child)).unwrap(),
            child
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(wire::deserialize::<Commit>(b"\x02not-a-commit").is_err());
    }
}
