//! Binary serialization of repository artifacts.
//!
//! All integers are big-endian. Variable-length fields carry a length
//! prefix: `u16` for names, `u32` for byte blobs and sequences. The
//! static-delta superblock is the one format with a self-describing
//! endianness flag; its decoder lives in [`crate::delta`].

use std::io;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use crate::checksum::{Checksum, ObjectId, ObjectType, DIGEST_LEN};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("unknown object type code {0}")]
    ObjectType(u8),

    #[error("string field is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("invalid path component '{0}'")]
    InvalidName(String),

    #[error("{0} trailing bytes after decoded value")]
    Trailing(usize),

    #[error("bad magic bytes")]
    Magic,

    #[error("unknown endianness marker {0:#04x}")]
    Endianness(u8),
}

pub trait Encode {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> io::Result<()>;
}

pub trait Decode: Sized {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, Error>;
}

/// Serialize a value into a fresh buffer.
pub fn serialize<T: Encode + ?Sized>(value: &T) -> Vec<u8> {
    let mut buffer = Vec::new();
    value
        .encode(&mut buffer)
        .expect("in-memory writes never fail");
    buffer
}

/// Deserialize a value, rejecting trailing bytes.
pub fn deserialize<T: Decode>(mut bytes: &[u8]) -> Result<T, Error> {
    let value = T::decode(&mut bytes)?;
    if !bytes.is_empty() {
        return Err(Error::Trailing(bytes.len()));
    }
    Ok(value)
}

impl Encode for u8 {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u8(*self)
    }
}

impl Decode for u8 {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        Ok(reader.read_u8()?)
    }
}

impl Encode for u16 {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u16::<BigEndian>(*self)
    }
}

impl Decode for u16 {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        Ok(reader.read_u16::<BigEndian>()?)
    }
}

impl Encode for u32 {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<BigEndian>(*self)
    }
}

impl Decode for u32 {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        Ok(reader.read_u32::<BigEndian>()?)
    }
}

impl Encode for u64 {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u64::<BigEndian>(*self)
    }
}

impl Decode for u64 {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        Ok(reader.read_u64::<BigEndian>()?)
    }
}

impl Encode for str {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        debug_assert!(self.len() <= u16::MAX as usize);
        writer.write_u16::<BigEndian>(self.len() as u16)?;
        writer.write_all(self.as_bytes())
    }
}

impl Encode for String {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        self.as_str().encode(writer)
    }
}

impl Decode for String {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        let len = reader.read_u16::<BigEndian>()? as usize;
        let mut bytes = vec![0; len];
        reader.read_exact(&mut bytes)?;

        Ok(String::from_utf8(bytes)?)
    }
}

impl Encode for [u8] {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<BigEndian>(self.len() as u32)?;
        writer.write_all(self)
    }
}

impl Encode for Vec<u8> {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        self.as_slice().encode(writer)
    }
}

impl Decode for Vec<u8> {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        let len = reader.read_u32::<BigEndian>()? as usize;
        let mut bytes = vec![0; len];
        reader.read_exact(&mut bytes)?;

        Ok(bytes)
    }
}

impl Encode for Checksum {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(self.as_bytes())
    }
}

impl Decode for Checksum {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        let mut raw = [0; DIGEST_LEN];
        reader.read_exact(&mut raw)?;

        Ok(Checksum::from(raw))
    }
}

impl Encode for Option<Checksum> {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        match self {
            None => writer.write_u8(0),
            Some(checksum) => {
                writer.write_u8(1)?;
                checksum.encode(writer)
            }
        }
    }
}

impl Decode for Option<Checksum> {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        match reader.read_u8()? {
            0 => Ok(None),
            _ => Ok(Some(Checksum::decode(reader)?)),
        }
    }
}

impl Encode for ObjectType {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u8(self.as_u8())
    }
}

impl Decode for ObjectType {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        let code = reader.read_u8()?;
        Self::from_u8(code).ok_or(Error::ObjectType(code))
    }
}

impl Encode for ObjectId {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        self.objtype.encode(writer)?;
        self.checksum.encode(writer)
    }
}

impl Decode for ObjectId {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        let objtype = ObjectType::decode(reader)?;
        let checksum = Checksum::decode(reader)?;

        Ok(ObjectId::new(checksum, objtype))
    }
}

impl Encode for (String, Checksum) {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        self.0.encode(writer)?;
        self.1.encode(writer)
    }
}

impl Decode for (String, Checksum) {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        let name = String::decode(reader)?;
        let checksum = Checksum::decode(reader)?;
        Ok((name, checksum))
    }
}

/// Encode a count-prefixed sequence.
pub fn encode_seq<T: Encode, W: io::Write + ?Sized>(
    writer: &mut W,
    items: &[T],
) -> io::Result<()> {
    writer.write_u32::<BigEndian>(items.len() as u32)?;
    for item in items {
        item.encode(writer)?;
    }
    Ok(())
}

/// Decode a count-prefixed sequence.
pub fn decode_seq<T: Decode, R: io::Read + ?Sized>(reader: &mut R) -> Result<Vec<T>, Error> {
    let count = reader.read_u32::<BigEndian>()? as usize;
    let mut items = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        items.push(T::decode(reader)?);
    }
    Ok(items)
}

/// Encode a string-keyed metadata map.
pub fn encode_map<W: io::Write + ?Sized>(
    writer: &mut W,
    entries: &[(String, Vec<u8>)],
) -> io::Result<()> {
    writer.write_u32::<BigEndian>(entries.len() as u32)?;
    for (key, value) in entries {
        key.encode(writer)?;
        value.encode(writer)?;
    }
    Ok(())
}

/// Decode a string-keyed metadata map.
pub fn decode_map<R: io::Read + ?Sized>(reader: &mut R) -> Result<Vec<(String, Vec<u8>)>, Error> {
    let count = reader.read_u32::<BigEndian>()? as usize;
    let mut entries = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        let key = String::decode(reader)?;
        let value = Vec::<u8>::decode(reader)?;
        entries.push((key, value));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_deserialize_rejects_trailing_bytes() {
        let mut buf = serialize(&7u32);
        buf.push(0xff);

        assert!(matches!(deserialize::<u32>(&buf), Err(Error::Trailing(1))));
    }

    #[test]
    fn test_truncated_input() {
        let buf = serialize(&String::from("refs"));
        assert!(deserialize::<String>(&buf[..buf.len() - 1]).is_err());
    }

    #[test]
    fn test_object_id() {
        let id = ObjectId::new(Checksum::digest(b"x"), ObjectType::Commit);
        let buf = serialize(&id);

        assert_eq!(deserialize::<ObjectId>(&buf).unwrap(), id);
        // Unknown type code.
        let mut bad = buf.clone();
        bad[0] = 9;
        assert!(matches!(
            deserialize::<ObjectId>(&bad),
            Err(Error::ObjectType(9))
        ));
    }
}
