use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("ref name is empty")]
    Empty,

    #[error("ref name '{0}' contains an empty path component")]
    EmptyComponent(String),

    #[error("ref name '{0}' contains an invalid character")]
    InvalidCharacter(String),

    #[error("ref name '{0}' contains a reserved path component")]
    ReservedComponent(String),
}

/// A validated branch name.
///
/// Ref names are `/`-separated sequences of non-empty components drawn
/// from `[A-Za-z0-9._-]`, with the `.`/`..` specials rejected.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefName(String);

impl RefName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for RefName {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(Error::Empty);
        }
        for component in value.split('/') {
            if component.is_empty() {
                return Err(Error::EmptyComponent(value.to_owned()));
            }
            if component == "." || component == ".." {
                return Err(Error::ReservedComponent(value.to_owned()));
            }
            if !component
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            {
                return Err(Error::InvalidCharacter(value.to_owned()));
            }
        }
        Ok(Self(value.to_owned()))
    }
}

impl TryFrom<String> for RefName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl FromStr for RefName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s)
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RefName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
