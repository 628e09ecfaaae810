//! Static deltas: precomputed artifacts that reconstruct one commit's
//! object set given another. A delta consists of a signed superblock
//! plus one or more parts; objects a delta cannot produce are listed as
//! fallbacks and fetched individually.

use std::io::{self, Read};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::checksum::{Checksum, ObjectId, ObjectType};
use crate::content::ContentObject;
use crate::store::Store;
use crate::wire::{self, Decode, Encode};

/// Newest delta-part format this implementation understands.
pub const MAX_PART_VERSION: u32 = 0;

const SUPERBLOCK_MAGIC: &[u8; 4] = b"CDSB";
const ENDIAN_BIG: u8 = b'B';
const ENDIAN_LITTLE: u8 = b'l';

/// The delta's display name: `<from>-<to>`, or `<to>` for a scratch
/// delta.
pub fn name(from: Option<&Checksum>, to: &Checksum) -> String {
    match from {
        Some(from) => format!("{from}-{to}"),
        None => to.to_string(),
    }
}

/// Relative path of a file within the delta's wire directory. The same
/// strings key the superblock's metadata map for inline content.
pub fn rel_path(from: Option<&Checksum>, to: &Checksum, suffix: &str) -> String {
    format!("deltas/{}/{}", name(from, to), suffix)
}

pub fn superblock_path(from: Option<&Checksum>, to: &Checksum) -> String {
    rel_path(from, to, "superblock")
}

pub fn part_path(from: Option<&Checksum>, to: &Checksum, index: usize) -> String {
    rel_path(from, to, &index.to_string())
}

/// Header describing one delta part.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartHeader {
    pub version: u32,
    pub checksum: Checksum,
    pub size: u64,
    pub uncompressed_size: u64,
    /// The objects this part produces.
    pub objects: Vec<ObjectId>,
}

/// An object referenced by the delta but not produced by any part.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fallback {
    pub objtype: ObjectType,
    pub checksum: Checksum,
    pub size: u64,
    pub uncompressed_size: u64,
}

/// The delta superblock. Integer fields are stored in the byte order
/// named by the endianness marker following the magic; everything else
/// is position-encoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Superblock {
    pub metadata: Vec<(String, Vec<u8>)>,
    /// The target commit.
    pub to: Checksum,
    /// Serialized target commit object, embedded so the commit itself
    /// never needs a separate fetch.
    pub commit: Vec<u8>,
    pub parts: Vec<PartHeader>,
    pub fallbacks: Vec<Fallback>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endianness {
    Big,
    Little,
}

impl Default for Superblock {
    fn default() -> Self {
        Self {
            metadata: Vec::new(),
            to: Checksum::from([0; 32]),
            commit: Vec::new(),
            parts: Vec::new(),
            fallbacks: Vec::new(),
        }
    }
}

impl Superblock {
    pub fn decode(bytes: &[u8]) -> Result<Self, wire::Error> {
        let mut reader = bytes;
        let mut magic = [0; 4];
        reader.read_exact(&mut magic)?;
        if &magic != SUPERBLOCK_MAGIC {
            return Err(wire::Error::Magic);
        }
        let swap = match reader.read_u8()? {
            ENDIAN_BIG => false,
            ENDIAN_LITTLE => true,
            other => return Err(wire::Error::Endianness(other)),
        };

        let metadata = wire::decode_map(&mut reader)?;
        let to = Checksum::decode(&mut reader)?;
        let commit = Vec::<u8>::decode(&mut reader)?;

        let n_parts = read_u32(&mut reader, swap)?;
        let mut parts = Vec::with_capacity(n_parts.min(4096) as usize);
        for _ in 0..n_parts {
            let version = read_u32(&mut reader, swap)?;
            let checksum = Checksum::decode(&mut reader)?;
            let size = read_u64(&mut reader, swap)?;
            let uncompressed_size = read_u64(&mut reader, swap)?;
            let objects = wire::decode_seq(&mut reader)?;
            parts.push(PartHeader {
                version,
                checksum,
                size,
                uncompressed_size,
                objects,
            });
        }

        let n_fallbacks = read_u32(&mut reader, swap)?;
        let mut fallbacks = Vec::with_capacity(n_fallbacks.min(4096) as usize);
        for _ in 0..n_fallbacks {
            let objtype = ObjectType::decode(&mut reader)?;
            let checksum = Checksum::decode(&mut reader)?;
            let size = read_u64(&mut reader, swap)?;
            let uncompressed_size = read_u64(&mut reader, swap)?;
            fallbacks.push(Fallback {
                objtype,
                checksum,
                size,
                uncompressed_size,
            });
        }

        if !reader.is_empty() {
            return Err(wire::Error::Trailing(reader.len()));
        }
        Ok(Self {
            metadata,
            to,
            commit,
            parts,
            fallbacks,
        })
    }

    pub fn encode(&self, endianness: Endianness) -> Vec<u8> {
        let mut w = Vec::new();
        self.encode_to(&mut w, endianness)
            .expect("in-memory writes never fail");
        w
    }

    fn encode_to<W: io::Write>(&self, w: &mut W, endianness: Endianness) -> io::Result<()> {
        w.write_all(SUPERBLOCK_MAGIC)?;
        let swap = matches!(endianness, Endianness::Little);
        w.write_u8(if swap { ENDIAN_LITTLE } else { ENDIAN_BIG })?;

        wire::encode_map(w, &self.metadata)?;
        self.to.encode(w)?;
        self.commit.encode(w)?;

        write_u32(w, self.parts.len() as u32, swap)?;
        for part in &self.parts {
            write_u32(w, part.version, swap)?;
            part.checksum.encode(w)?;
            write_u64(w, part.size, swap)?;
            write_u64(w, part.uncompressed_size, swap)?;
            wire::encode_seq(w, &part.objects)?;
        }

        write_u32(w, self.fallbacks.len() as u32, swap)?;
        for fallback in &self.fallbacks {
            fallback.objtype.encode(w)?;
            fallback.checksum.encode(w)?;
            write_u64(w, fallback.size, swap)?;
            write_u64(w, fallback.uncompressed_size, swap)?;
        }
        Ok(())
    }

    /// Look up an inline artifact in the metadata map.
    pub fn metadata_value(&self, key: &str) -> Option<&[u8]> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }
}

fn read_u32<R: Read>(reader: &mut R, swap: bool) -> io::Result<u32> {
    if swap {
        reader.read_u32::<LittleEndian>()
    } else {
        reader.read_u32::<BigEndian>()
    }
}

fn read_u64<R: Read>(reader: &mut R, swap: bool) -> io::Result<u64> {
    if swap {
        reader.read_u64::<LittleEndian>()
    } else {
        reader.read_u64::<BigEndian>()
    }
}

fn write_u32<W: io::Write>(writer: &mut W, value: u32, swap: bool) -> io::Result<()> {
    if swap {
        writer.write_u32::<LittleEndian>(value)
    } else {
        writer.write_u32::<BigEndian>(value)
    }
}

fn write_u64<W: io::Write>(writer: &mut W, value: u64, swap: bool) -> io::Result<()> {
    if swap {
        writer.write_u64::<LittleEndian>(value)
    } else {
        writer.write_u64::<BigEndian>(value)
    }
}

pub mod error {
    use thiserror::Error;

    use crate::checksum::{Checksum, ObjectId};
    use crate::{store, wire};

    #[derive(Debug, Error)]
    #[non_exhaustive]
    pub enum Open {
        #[error("delta part checksum mismatch; expected={expected} actual={actual}")]
        Checksum {
            expected: Checksum,
            actual: Checksum,
        },

        #[error("malformed delta part")]
        Decode(#[from] wire::Error),
    }

    #[derive(Debug, Error)]
    #[non_exhaustive]
    pub enum Apply {
        #[error("delta part produced corrupt object {id}; actual checksum {actual}")]
        Corrupt { id: ObjectId, actual: Checksum },

        #[error("malformed content object in delta part")]
        Content(#[from] wire::Error),

        #[error(transparent)]
        Store(#[from] store::Error),
    }
}

/// One materialized object within a delta part.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartEntry {
    pub id: ObjectId,
    pub data: Vec<u8>,
}

/// A decoded delta part.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Part {
    pub entries: Vec<PartEntry>,
}

impl Part {
    /// Open a serialized part, verifying its digest against `expected`
    /// unless the caller already trusts the bytes (inline parts under a
    /// signed superblock).
    pub fn open(bytes: &[u8], expected: Option<&Checksum>) -> Result<Self, error::Open> {
        if let Some(expected) = expected {
            let actual = Checksum::digest(bytes);
            if actual != *expected {
                return Err(error::Open::Checksum {
                    expected: *expected,
                    actual,
                });
            }
        }
        let mut reader = bytes;
        let entries = wire::decode_seq(&mut reader)?;
        if !reader.is_empty() {
            return Err(error::Open::Decode(wire::Error::Trailing(reader.len())));
        }
        Ok(Self { entries })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        wire::encode_seq(&mut buffer, &self.entries).expect("in-memory writes never fail");
        buffer
    }

    pub fn digest(&self) -> Checksum {
        Checksum::digest(&self.to_bytes())
    }
}

impl Encode for PartEntry {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        self.id.encode(writer)?;
        self.data.encode(writer)
    }
}

impl Decode for PartEntry {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, wire::Error> {
        let id = ObjectId::decode(reader)?;
        let data = Vec::<u8>::decode(reader)?;
        Ok(Self { id, data })
    }
}

/// Execute one part against the store, writing every object it carries.
///
/// `objects` is the part header's object list, used for logging only;
/// the entries are authoritative. With `trusted` set (summary was
/// signature-verified) the per-object digests are not re-checked.
pub fn apply_part<S: Store>(
    store: &mut S,
    objects: &[ObjectId],
    part: &Part,
    trusted: bool,
) -> Result<(), error::Apply> {
    log::debug!(target: "delta", "applying part with {} objects", objects.len());

    for entry in &part.entries {
        let actual = if entry.id.objtype.is_meta() {
            store.write_metadata(entry.id.objtype, &entry.id.checksum, &entry.data)?
        } else {
            let object = ContentObject::parse(&entry.data)?;
            store.write_content(&entry.id.checksum, &object)?
        };
        if !trusted && actual != entry.id.checksum {
            return Err(error::Apply::Corrupt {
                id: entry.id,
                actual,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn superblock() -> Superblock {
        Superblock {
            metadata: vec![("deltas/x/0".into(), vec![1, 2, 3])],
            to: Checksum::digest(b"to"),
            commit: b"commit bytes".to_vec(),
            parts: vec![PartHeader {
                version: 0,
                checksum: Checksum::digest(b"part"),
                size: 3,
                uncompressed_size: 9,
                objects: vec![ObjectId::new(Checksum::digest(b"f"), ObjectType::File)],
            }],
            fallbacks: vec![Fallback {
                objtype: ObjectType::File,
                checksum: Checksum::digest(b"big"),
                size: 100,
                uncompressed_size: 200,
            }],
        }
    }

    #[test]
    fn test_superblock_both_endiannesses() {
        let sb = superblock();
        // The two encodings differ on the wire but decode identically.
        let big = sb.encode(Endianness::Big);
        let little = sb.encode(Endianness::Little);

        assert_ne!(big, little);
        assert_eq!(Superblock::decode(&big).unwrap(), sb);
        assert_eq!(Superblock::decode(&little).unwrap(), sb);
    }

    #[test]
    fn test_superblock_rejects_bad_magic() {
        let mut bytes = superblock().encode(Endianness::Big);
        bytes[0] = b'X';
        assert!(matches!(
            Superblock::decode(&bytes),
            Err(wire::Error::Magic)
        ));
    }

    #[test]
    fn test_part_open_checks_digest() {
        let part = Part {
            entries: vec![PartEntry {
                id: ObjectId::new(Checksum::digest(b"m"), ObjectType::DirMeta),
                data: vec![7],
            }],
        };
        let bytes = part.to_bytes();
        let digest = part.digest();

        assert_eq!(Part::open(&bytes, Some(&digest)).unwrap(), part);
        assert!(Part::open(&bytes, Some(&Checksum::digest(b"other"))).is_err());
        // Inline parts skip the digest.
        assert_eq!(Part::open(&bytes, None).unwrap(), part);
    }

    #[test]
    fn test_delta_names() {
        let from = Checksum::digest(b"a");
        let to = Checksum::digest(b"b");

        assert_eq!(name(None, &to), to.to_string());
        assert_eq!(name(Some(&from), &to), format!("{from}-{to}"));
        assert_eq!(
            part_path(Some(&from), &to, 2),
            format!("deltas/{from}-{to}/2")
        );
    }
}
