use std::path::PathBuf;

use thiserror::Error;

use crate::keyfile::KeyFile;
use crate::refname::RefName;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    KeyFile(#[from] crate::keyfile::Error),

    #[error("remote '{remote}' has invalid branch name")]
    Branch {
        remote: String,
        #[source]
        err: crate::refname::Error,
    },
}

/// Configuration of one remote, read from the repository keyfile under
/// a `[remote "<name>"]` group.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Remote {
    pub name: Option<String>,
    pub url: Option<String>,
    /// Metalink indirection; when set it takes precedence over `url`.
    pub metalink: Option<String>,
    pub gpg_verify: bool,
    pub gpg_verify_summary: bool,
    pub branches: Vec<RefName>,
    pub tls_permissive: bool,
    pub tls_client_cert_path: Option<PathBuf>,
    pub tls_client_key_path: Option<PathBuf>,
    pub tls_ca_path: Option<PathBuf>,
    pub proxy: Option<String>,
}

impl Remote {
    /// An anonymous remote backed by a bare URL. Signature verification
    /// defaults off, matching local-URL pull semantics.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Read the remote `name` from a repository keyfile, if configured.
    pub fn from_keyfile(name: &str, keyfile: &KeyFile) -> Result<Option<Self>, Error> {
        let group = format!(r#"remote "{name}""#);
        if !keyfile.groups().any(|g| g == group) {
            return Ok(None);
        }
        let branches = keyfile
            .list(&group, "branches")
            .into_iter()
            .map(|b| RefName::try_from(b.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| Error::Branch {
                remote: name.to_owned(),
                err,
            })?;

        Ok(Some(Self {
            name: Some(name.to_owned()),
            url: keyfile.string(&group, "url").map(str::to_owned),
            metalink: keyfile.string(&group, "metalink").map(str::to_owned),
            gpg_verify: keyfile.boolean_or(&group, "gpg-verify", true)?,
            gpg_verify_summary: keyfile.boolean_or(&group, "gpg-verify-summary", true)?,
            branches,
            tls_permissive: keyfile.boolean_or(&group, "tls-permissive", false)?,
            tls_client_cert_path: keyfile
                .string(&group, "tls-client-cert-path")
                .map(PathBuf::from),
            tls_client_key_path: keyfile
                .string(&group, "tls-client-key-path")
                .map(PathBuf::from),
            tls_ca_path: keyfile.string(&group, "tls-ca-path").map(PathBuf::from),
            proxy: keyfile.string(&group, "proxy").map(str::to_owned),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_from_keyfile() {
        let kf = KeyFile::parse(
            r#"
[remote "origin"]
url=https://example.com/repo
branches=main;stable/2.1
proxy=http://proxy:3128
"#,
        )
        .unwrap();

        let remote = Remote::from_keyfile("origin", &kf).unwrap().unwrap();
        assert_eq!(remote.url.as_deref(), Some("https://example.com/repo"));
        assert_eq!(remote.branches.len(), 2);
        // Verification is on unless the configuration disables it.
        assert!(remote.gpg_verify);
        assert!(remote.gpg_verify_summary);
        assert!(Remote::from_keyfile("other", &kf).unwrap().is_none());
    }
}
