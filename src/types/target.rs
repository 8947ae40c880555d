//! Target platforms portability is evaluated against.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::types::FrameworkVersion;

#[derive(Debug, Error)]
#[error("invalid target: {input}")]
pub struct InvalidTarget {
    pub input: String,
}

/// A named platform family plus a version, e.g. `.NET Standard 2.0`.
///
/// Targets of the same family (case-insensitive) order by version; targets
/// of different families are unordered.
#[derive(Debug, Clone)]
pub struct Target {
    pub family: String,
    pub version: FrameworkVersion,
}

impl Target {
    pub fn new(family: impl Into<String>, version: FrameworkVersion) -> Self {
        Self {
            family: family.into(),
            version,
        }
    }

    pub fn same_family(&self, other: &Target) -> bool {
        self.family.eq_ignore_ascii_case(&other.family)
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        self.same_family(other) && self.version == other.version
    }
}

impl Eq for Target {}

impl Hash for Target {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.family.bytes() {
            byte.to_ascii_lowercase().hash(state);
        }
        self.version.hash(state);
    }
}

impl PartialOrd for Target {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.same_family(other) {
            Some(self.version.cmp(&other.version))
        } else {
            None
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},Version=v{}", self.family, self.version)
    }
}

impl FromStr for Target {
    type Err = InvalidTarget;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidTarget {
            input: s.to_string(),
        };

        // Canonical "Family,Version=v2.0" form first, then "Family 2.0".
        if let Some((family, version)) = s.split_once(',') {
            let version = version
                .trim()
                .strip_prefix("Version=")
                .ok_or_else(invalid)?
                .parse()
                .map_err(|_| invalid())?;
            let family = family.trim();
            if family.is_empty() {
                return Err(invalid());
            }
            return Ok(Self::new(family, version));
        }

        let (family, version) = s.trim().rsplit_once(' ').ok_or_else(invalid)?;
        let family = family.trim();
        if family.is_empty() {
            return Err(invalid());
        }
        let version = version.parse().map_err(|_| invalid())?;
        Ok(Self::new(family, version))
    }
}

impl Serialize for Target {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
