use std::io;

use crate::checksum::Checksum;
use crate::wire::{self, Decode, Encode};

/// File attributes carried in the raw content header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Symlink target; empty for regular files.
    pub symlink_target: String,
}

impl Default for FileInfo {
    fn default() -> Self {
        Self {
            mode: 0o100644,
            uid: 0,
            gid: 0,
            symlink_target: String::new(),
        }
    }
}

/// A content object in its parsed form: header attributes, extended
/// attributes, and the payload stream.
///
/// The raw serialized form (header followed by the payload bytes, with
/// no length prefix on the payload) is what travels on the wire and
/// what the checksum covers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContentObject {
    pub info: FileInfo,
    pub xattrs: Vec<(String, Vec<u8>)>,
    pub payload: Vec<u8>,
}

impl ContentObject {
    pub fn regular(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            ..Self::default()
        }
    }

    /// Parse the raw serialized form.
    pub fn parse(bytes: &[u8]) -> Result<Self, wire::Error> {
        let mut reader = bytes;
        let info = FileInfo::decode(&mut reader)?;
        let xattrs = wire::decode_map(&mut reader)?;
        let payload = reader.to_vec();

        Ok(Self {
            info,
            xattrs,
            payload,
        })
    }

    /// The raw serialized form.
    pub fn to_raw(&self) -> Vec<u8> {
        let mut buffer = wire::serialize(&self.info);
        wire::encode_map(&mut buffer, &self.xattrs).expect("in-memory writes never fail");
        buffer.extend_from_slice(&self.payload);
        buffer
    }

    /// Checksum of the raw form; this is the object's identity.
    pub fn checksum(&self) -> Checksum {
        Checksum::digest(&self.to_raw())
    }
}

impl Encode for FileInfo {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        self.mode.encode(writer)?;
        self.uid.encode(writer)?;
        self.gid.encode(writer)?;
        self.symlink_target.encode(writer)
    }
}

impl Decode for FileInfo {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, wire::Error> {
        let mode = u32::decode(reader)?;
        let uid = u32::decode(reader)?;
        let gid = u32::decode(reader)?;
        let symlink_target = String::decode(reader)?;

        Ok(Self {
            mode,
            uid,
            gid,
            symlink_target,
        })
    }
}
