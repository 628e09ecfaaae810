use std::io;

use crate::checksum::Checksum;
use crate::refname::RefName;
use crate::wire::{self, Decode, Encode};

/// Key in the summary's extra metadata holding the static-delta index:
/// a map from delta name (`<from>-<to>` or `<to>`) to superblock digest.
pub const STATIC_DELTAS_KEY: &str = "cairn.static-deltas";

/// One advertised ref: its name, the serialized size of the commit it
/// points at, and the commit checksum.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SummaryRef {
    pub name: RefName,
    pub commit_size: u64,
    pub checksum: Checksum,
}

/// The repository summary: every advertised ref, sorted by name so the
/// consumer can binary-search, plus an extensible metadata map.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    refs: Vec<SummaryRef>,
    extra: Vec<(String, Vec<u8>)>,
}

impl Summary {
    pub fn new(
        mut refs: Vec<SummaryRef>,
        extra: impl IntoIterator<Item = (String, Vec<u8>)>,
    ) -> Self {
        refs.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            refs,
            extra: extra.into_iter().collect(),
        }
    }

    pub fn refs(&self) -> &[SummaryRef] {
        &self.refs
    }

    /// Look up a ref by name. The ref list is kept sorted, so this is a
    /// binary search.
    pub fn lookup(&self, name: &RefName) -> Option<&SummaryRef> {
        self.refs
            .binary_search_by(|r| r.name.cmp(name))
            .ok()
            .map(|index| &self.refs[index])
    }

    pub fn extra(&self, key: &str) -> Option<&[u8]> {
        self.extra
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    /// Decode the advertised static-delta index, if present.
    pub fn static_deltas(&self) -> Result<Vec<(String, Checksum)>, wire::Error> {
        let Some(bytes) = self.extra(STATIC_DELTAS_KEY) else {
            return Ok(Vec::new());
        };
        let entries = wire::deserialize::<DeltaIndex>(bytes)?.0;
        Ok(entries)
    }

    /// Encode a static-delta index for the extra metadata map.
    pub fn encode_static_deltas(entries: &[(String, Checksum)]) -> Vec<u8> {
        let mut buffer = Vec::new();
        wire::encode_seq(&mut buffer, entries).expect("in-memory writes never fail");
        buffer
    }
}

struct DeltaIndex(Vec<(String, Checksum)>);

impl Decode for DeltaIndex {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, wire::Error> {
        Ok(Self(wire::decode_seq(reader)?))
    }
}

impl Encode for SummaryRef {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        self.name.as_str().encode(writer)?;
        self.commit_size.encode(writer)?;
        self.checksum.encode(writer)
    }
}

impl Decode for SummaryRef {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, wire::Error> {
        let name = String::decode(reader)?;
        let name =
            RefName::try_from(name.as_str()).map_err(|_| wire::Error::InvalidName(name))?;
        let commit_size = u64::decode(reader)?;
        let checksum = Checksum::decode(reader)?;

        Ok(Self {
            name,
            commit_size,
            checksum,
        })
    }
}

impl Encode for Summary {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        wire::encode_seq(writer, &self.refs)?;
        wire::encode_map(writer, &self.extra)
    }
}

impl Decode for Summary {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, wire::Error> {
        let refs = wire::decode_seq(reader)?;
        let extra = wire::decode_map(reader)?;

        Ok(Self { refs, extra })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use qcheck_macros::quickcheck;

    fn summary_ref(name: &str, payload: &[u8]) -> SummaryRef {
        SummaryRef {
            name: RefName::try_from(name).unwrap(),
            commit_size: payload.len() as u64,
            checksum: Checksum::digest(payload),
        }
    }

    #[test]
    fn test_lookup() {
        let summary = Summary::new(
            vec![
                summary_ref("zeta", b"z"),
                summary_ref("alpha", b"a"),
                summary_ref("mid/branch", b"m"),
            ],
            [],
        );

        let hit = summary.lookup(&"mid/branch".parse().unwrap()).unwrap();
        assert_eq!(hit.checksum, Checksum::digest(b"m"));
        assert!(summary.lookup(&"missing".parse().unwrap()).is_none());
    }

    #[test]
    fn test_static_delta_index() {
        let to = Checksum::digest(b"to");
        let index = vec![(to.to_string(), Checksum::digest(b"superblock"))];
        let summary = Summary::new(
            vec![],
            [(
                STATIC_DELTAS_KEY.to_owned(),
                Summary::encode_static_deltas(&index),
            )],
        );

        assert_eq!(summary.static_deltas().unwrap(), index);
    }

    #[test]
    fn test_decode_rejects_invalid_refname() {
        // One ref entry with a name that fails validation.
        let mut buffer = Vec::new();
        1u32.encode(&mut buffer).unwrap();
        "bad name".encode(&mut buffer).unwrap();
        1u64.encode(&mut buffer).unwrap();
        Checksum::digest(b"c").encode(&mut buffer).unwrap();
        wire::encode_map(&mut buffer, &[]).unwrap();

        assert!(wire::deserialize::<Summary>(&buffer).is_err());
    }

    #[quickcheck]
    fn prop_lookup_finds_every_ref(names: Vec<u16>) {
        let refs = names
            .iter()
            .map(|n| summary_ref(&format!("branch-{n}"), &n.to_be_bytes()))
            .collect::<Vec<_>>();
        let summary = Summary::new(refs.clone(), []);

        for r in &refs {
            assert_eq!(summary.lookup(&r.name), Some(r));
        }
    }
}
