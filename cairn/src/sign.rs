//! Signature verification contract.
//!
//! The engine never interprets signature bytes itself; it hands them to
//! a [`Verifier`] together with the remote's identity (which selects
//! the trusted keyring) and acts on the count of valid signatures.

/// Outcome of verifying one signed artifact.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Verification {
    /// Signatures made by a key in the remote's trusted keyring.
    pub valid: usize,
    /// All signatures present on the artifact.
    pub total: usize,
}

impl Verification {
    pub fn any_valid(&self) -> bool {
        self.valid > 0
    }
}

pub trait Verifier {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Verify a summary against its detached signature file.
    fn verify_summary(
        &self,
        remote: &str,
        summary: &[u8],
        signature: &[u8],
    ) -> Result<Verification, Self::Error>;

    /// Verify a commit object, consulting its detached metadata (which
    /// carries the signatures) when present.
    fn verify_commit(
        &self,
        remote: &str,
        commit: &[u8],
        detached: Option<&[u8]>,
    ) -> Result<Verification, Self::Error>;
}

pub mod keyring {
    //! A shared-secret verifier: signatures are `(key id, mac)` pairs
    //! where `mac = sha256(secret || data)`. Used by the test suite and
    //! by deployments that distribute per-remote secrets out of band.

    use std::collections::HashMap;

    use thiserror::Error;

    use crate::checksum::Checksum;
    use crate::wire;

    use super::{Verification, Verifier};

    pub const SIGNATURE_KEY: &str = "cairn.signatures";

    #[derive(Debug, Error)]
    #[non_exhaustive]
    pub enum Error {
        #[error("malformed signature data")]
        Malformed(#[from] wire::Error),
    }

    /// Per-remote map of trusted key ids to shared secrets.
    #[derive(Clone, Debug, Default)]
    pub struct Keyring {
        remotes: HashMap<String, HashMap<String, Vec<u8>>>,
    }

    impl Keyring {
        pub fn trust(&mut self, remote: &str, key_id: &str, secret: impl Into<Vec<u8>>) {
            self.remotes
                .entry(remote.to_owned())
                .or_default()
                .insert(key_id.to_owned(), secret.into());
        }

        /// Produce signature bytes over `data` with the given secret.
        pub fn sign(key_id: &str, secret: &[u8], data: &[u8]) -> Vec<u8> {
            encode_signatures(&[(key_id.to_owned(), mac(secret, data))])
        }

        fn check(&self, remote: &str, data: &[u8], signatures: &[u8]) -> Result<Verification, Error> {
            let entries = decode_signatures(signatures)?;
            let keys = self.remotes.get(remote);
            let valid = entries
                .iter()
                .filter(|(key_id, sig)| {
                    keys.and_then(|keys| keys.get(key_id))
                        .map_or(false, |secret| mac(secret, data) == *sig)
                })
                .count();

            Ok(Verification {
                valid,
                total: entries.len(),
            })
        }
    }

    impl Verifier for Keyring {
        type Error = Error;

        fn verify_summary(
            &self,
            remote: &str,
            summary: &[u8],
            signature: &[u8],
        ) -> Result<Verification, Self::Error> {
            self.check(remote, summary, signature)
        }

        fn verify_commit(
            &self,
            remote: &str,
            commit: &[u8],
            detached: Option<&[u8]>,
        ) -> Result<Verification, Self::Error> {
            // Commit signatures ride in the detached metadata map under
            // `SIGNATURE_KEY`; an unsigned commit verifies as (0, 0).
            let Some(detached) = detached else {
                return Ok(Verification::default());
            };
            let entries = decode_detached(detached)?;
            match entries.iter().find(|(k, _)| k == SIGNATURE_KEY) {
                None => Ok(Verification::default()),
                Some((_, sigs)) => self.check(remote, commit, sigs),
            }
        }
    }

    fn mac(secret: &[u8], data: &[u8]) -> Checksum {
        let mut keyed = secret.to_vec();
        keyed.extend_from_slice(data);
        Checksum::digest(&keyed)
    }

    fn encode_signatures(entries: &[(String, Checksum)]) -> Vec<u8> {
        let mut buffer = Vec::new();
        wire::encode_seq(&mut buffer, entries).expect("in-memory writes never fail");
        buffer
    }

    fn decode_signatures(bytes: &[u8]) -> Result<Vec<(String, Checksum)>, Error> {
        let mut reader = bytes;
        let entries = wire::decode_seq(&mut reader)?;
        Ok(entries)
    }

    /// Build detached commit metadata carrying the given signature blob.
    pub fn detached_with_signatures(signatures: Vec<u8>) -> Vec<u8> {
        let mut buffer = Vec::new();
        wire::encode_map(&mut buffer, &[(SIGNATURE_KEY.to_owned(), signatures)])
            .expect("in-memory writes never fail");
        buffer
    }

    fn decode_detached(bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>, Error> {
        let mut reader = bytes;
        let entries = wire::decode_map(&mut reader)?;
        Ok(entries)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_summary_verification() {
            let mut keyring = Keyring::default();
            keyring.trust("origin", "release", b"s3cret".to_vec());

            let data = b"summary bytes";
            let good = Keyring::sign("release", b"s3cret", data);
            let bad = Keyring::sign("release", b"wrong", data);
            let unknown = Keyring::sign("stranger", b"s3cret", data);

            assert!(keyring.verify_summary("origin", data, &good).unwrap().any_valid());
            assert!(!keyring.verify_summary("origin", data, &bad).unwrap().any_valid());
            assert!(!keyring
                .verify_summary("origin", data, &unknown)
                .unwrap()
                .any_valid());
            // Trusted key on a different remote's keyring doesn't count.
            assert!(!keyring.verify_summary("other", data, &good).unwrap().any_valid());
        }

        #[test]
        fn test_commit_verification() {
            let mut keyring = Keyring::default();
            keyring.trust("origin", "release", b"k".to_vec());

            let commit = b"commit bytes";
            let detached =
                detached_with_signatures(Keyring::sign("release", b"k", commit));
            let result = keyring
                .verify_commit("origin", commit, Some(&detached))
                .unwrap();
            assert_eq!(result, Verification { valid: 1, total: 1 });

            // No detached metadata means no signatures at all.
            let result = keyring.verify_commit("origin", commit, None).unwrap();
            assert_eq!(result, Verification { valid: 0, total: 0 });
        }
    }
}
