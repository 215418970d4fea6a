//! Dotted configuration references.
//!
//! A reference such as `ms.server.http` names a value's location across
//! providers. Every segment is a *name*: letters, digits, `_` and `-`,
//! starting with a letter and ending with a letter or digit.

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// A validated dot-notation reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference(String);

impl Reference {
    /// Parse and validate a reference.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        if raw.split('.').all(is_valid_name) {
            Ok(Self(raw.to_string()))
        } else {
            Err(ConfigError::InvalidReference(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the dot-separated segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Extend the reference by one name, e.g. `ms.server` + `http`.
    pub fn child(&self, name: &str) -> Result<Self, ConfigError> {
        if !is_valid_name(name) {
            return Err(ConfigError::InvalidName(name.to_string()));
        }
        Ok(Self(format!("{}.{}", self.0, name)))
    }

    /// True when `self` equals `other` or lies beneath it (`a.b.c` is within `a.b`).
    pub fn is_within(&self, other: &Reference) -> bool {
        self.0 == other.0
            || (self.0.len() > other.0.len()
                && self.0.starts_with(other.0.as_str())
                && self.0.as_bytes()[other.0.len()] == b'.')
    }

    /// True when one reference is within the other.
    pub fn overlaps(&self, other: &Reference) -> bool {
        self.is_within(other) || other.is_within(self)
    }

    /// Split into the first segment and the remaining path, if any.
    pub fn split_first(&self) -> (&str, Option<&str>) {
        match self.0.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (&self.0, None),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Reference {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Reference {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Check a single name (one reference segment or an implementation name).
pub fn is_valid_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return false;
    };
    first.is_ascii_alphabetic()
        && last.is_ascii_alphanumeric()
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || *b == b'_' || *b == b'-')
}
