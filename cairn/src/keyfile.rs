//! Minimal keyfile (INI) parsing for repository and remote
//! configuration: `[group]` headers, `key=value` assignments, `#`/`;`
//! comments. Accessors mirror the "with default" convention used by
//! the configuration consumers.

use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("syntax error on line {line}: {text}")]
    Syntax { line: usize, text: String },

    #[error("key '{group}.{key}' has invalid boolean value '{value}'")]
    InvalidBoolean {
        group: String,
        key: String,
        value: String,
    },
}

/// A parsed keyfile. Groups and keys preserve file order; lookups take
/// the first match.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyFile {
    groups: Vec<(String, Vec<(String, String)>)>,
}

impl KeyFile {
    pub fn parse(input: &str) -> Result<Self, Error> {
        let mut groups: Vec<(String, Vec<(String, String)>)> = Vec::new();

        for (index, raw) in input.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                groups.push((name.trim().to_owned(), Vec::new()));
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::Syntax {
                    line: index + 1,
                    text: raw.to_owned(),
                });
            };
            let Some((_, entries)) = groups.last_mut() else {
                return Err(Error::Syntax {
                    line: index + 1,
                    text: raw.to_owned(),
                });
            };
            entries.push((key.trim().to_owned(), value.trim().to_owned()));
        }
        Ok(Self { groups })
    }

    pub fn string(&self, group: &str, key: &str) -> Option<&str> {
        self.groups
            .iter()
            .find(|(name, _)| name == group)
            .and_then(|(_, entries)| {
                entries
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| v.as_str())
            })
    }

    pub fn string_or<'a>(&'a self, group: &str, key: &str, default: &'a str) -> &'a str {
        self.string(group, key).unwrap_or(default)
    }

    pub fn boolean(&self, group: &str, key: &str) -> Result<Option<bool>, Error> {
        match self.string(group, key) {
            None => Ok(None),
            Some("true") => Ok(Some(true)),
            Some("false") => Ok(Some(false)),
            Some(other) => Err(Error::InvalidBoolean {
                group: group.to_owned(),
                key: key.to_owned(),
                value: other.to_owned(),
            }),
        }
    }

    pub fn boolean_or(&self, group: &str, key: &str, default: bool) -> Result<bool, Error> {
        Ok(self.boolean(group, key)?.unwrap_or(default))
    }

    /// A `;`-separated list value. Missing keys yield an empty list.
    pub fn list(&self, group: &str, key: &str) -> Vec<String> {
        self.string(group, key)
            .map(|value| {
                value
                    .split(';')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Group names, in file order.
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
# repository configuration
[core]
mode=archive-z2
tombstone-commits=true

[remote "origin"]
url=https://example.com/repo
branches=main;stable/2.1;
gpg-verify=false
"#;

    #[test]
    fn test_parse() {
        let kf = KeyFile::parse(SAMPLE).unwrap();

        assert_eq!(kf.string("core", "mode"), Some("archive-z2"));
        assert_eq!(kf.string_or("core", "missing", "bare"), "bare");
        assert_eq!(kf.boolean_or("core", "tombstone-commits", false).unwrap(), true);
        assert_eq!(
            kf.list(r#"remote "origin""#, "branches"),
            vec!["main".to_owned(), "stable/2.1".to_owned()]
        );
        assert_eq!(
            kf.boolean(r#"remote "origin""#, "gpg-verify").unwrap(),
            Some(false)
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(KeyFile::parse("stray=assignment").is_err());
        assert!(KeyFile::parse("[core]\nno equals sign").is_err());

        let kf = KeyFile::parse("[core]\nflag=yes").unwrap();
        assert!(kf.boolean("core", "flag").is_err());
    }
}
