use std::fmt;
use std::str::FromStr;

use sha2::{Digest as _, Sha256};
use thiserror::Error;

/// Number of raw bytes in an object digest.
pub const DIGEST_LEN: usize = 32;
/// Length of the displayable lowercase hex form of a digest.
pub const HEX_LEN: usize = 64;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    #[error("invalid checksum length {0}, expected {HEX_LEN} hex characters")]
    Length(usize),

    #[error("invalid checksum digest length {0}, expected {DIGEST_LEN} bytes")]
    DigestLength(usize),

    #[error("malformed checksum")]
    Hex(#[from] hex::FromHexError),

    #[error("unknown object type '{0}'")]
    ObjectType(String),
}

/// A SHA-256 digest identifying a single object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Checksum([u8; DIGEST_LEN]);

impl Checksum {
    /// Checksum the given bytes.
    pub fn digest(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        let raw: [u8; DIGEST_LEN] = bytes
            .try_into()
            .map_err(|_| ParseError::DigestLength(bytes.len()))?;
        Ok(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Whether the given string is a well-formed displayable checksum.
    pub fn is_valid(s: &str) -> bool {
        Self::from_str(s).is_ok()
    }
}

impl From<[u8; DIGEST_LEN]> for Checksum {
    fn from(raw: [u8; DIGEST_LEN]) -> Self {
        Self(raw)
    }
}

impl FromStr for Checksum {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != HEX_LEN {
            return Err(ParseError::Length(s.len()));
        }
        let bytes = hex::decode(s)?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Checksum({})", self)
    }
}

/// The kinds of objects stored in a repository.
///
/// Everything except [`ObjectType::File`] is metadata. The detached
/// kinds ([`ObjectType::CommitMeta`], [`ObjectType::TombstoneCommit`])
/// are side-cars keyed by a commit checksum and never appear in the
/// traversal closure themselves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectType {
    File,
    DirTree,
    DirMeta,
    Commit,
    TombstoneCommit,
    CommitMeta,
}

impl ObjectType {
    pub fn is_meta(&self) -> bool {
        !matches!(self, Self::File)
    }

    pub fn is_detached(&self) -> bool {
        matches!(self, Self::CommitMeta | Self::TombstoneCommit)
    }

    /// File extension of the loose object on disk and on the wire.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::DirTree => "dirtree",
            Self::DirMeta => "dirmeta",
            Self::Commit => "commit",
            Self::TombstoneCommit => "commit-tombstone",
            Self::CommitMeta => "commitmeta",
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::File),
            2 => Some(Self::DirTree),
            3 => Some(Self::DirMeta),
            4 => Some(Self::Commit),
            5 => Some(Self::TombstoneCommit),
            6 => Some(Self::CommitMeta),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Self::File => 1,
            Self::DirTree => 2,
            Self::DirMeta => 3,
            Self::Commit => 4,
            Self::TombstoneCommit => 5,
            Self::CommitMeta => 6,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.suffix())
    }
}

impl FromStr for ObjectType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Self::File),
            "dirtree" => Ok(Self::DirTree),
            "dirmeta" => Ok(Self::DirMeta),
            "commit" => Ok(Self::Commit),
            "commit-tombstone" => Ok(Self::TombstoneCommit),
            "commitmeta" => Ok(Self::CommitMeta),
            other => Err(ParseError::ObjectType(other.to_owned())),
        }
    }
}

/// A typed object identity: checksum plus object type.
///
/// The `Display` form, `<hex>.<suffix>`, is the canonical set key used
/// for scan bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    pub checksum: Checksum,
    pub objtype: ObjectType,
}

impl ObjectId {
    pub fn new(checksum: Checksum, objtype: ObjectType) -> Self {
        Self { checksum, objtype }
    }

    /// Relative path of the loose object, fanned out over the first two
    /// hex characters: `objects/<aa>/<rest>.<suffix>`.
    pub fn loose_path(&self) -> String {
        let hex = self.checksum.to_string();
        format!(
            "objects/{}/{}.{}",
            &hex[..2],
            &hex[2..],
            self.objtype.suffix()
        )
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.checksum, self.objtype.suffix())
    }
}
