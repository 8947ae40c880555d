//! Assembly identity types shared across the reader, finder and engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid framework version: {input}")]
pub struct InvalidVersion {
    pub input: String,
}

/// .NET-style dotted version with two to four components.
///
/// Absent components compare below present ones, so `4.5` sorts before
/// `4.5.0`. This matches how platform versions are compared in the catalog.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct FrameworkVersion {
    pub major: u32,
    pub minor: u32,
    pub build: Option<u32>,
    pub revision: Option<u32>,
}

impl FrameworkVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor,
            build: None,
            revision: None,
        }
    }

    pub fn with_build(major: u32, minor: u32, build: u32, revision: u32) -> Self {
        Self {
            major,
            minor,
            build: Some(build),
            revision: Some(revision),
        }
    }
}

impl fmt::Display for FrameworkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if let Some(build) = self.build {
            write!(f, ".{build}")?;
        }
        if let Some(revision) = self.revision {
            write!(f, ".{revision}")?;
        }
        Ok(())
    }
}

impl FromStr for FrameworkVersion {
    type Err = InvalidVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches(['v', 'V']);
        let invalid = || InvalidVersion {
            input: s.to_string(),
        };

        let mut parts = trimmed.split('.');
        let major = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let minor = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let build = match parts.next() {
            Some(p) => Some(p.parse().map_err(|_| invalid())?),
            None => None,
        };
        let revision = match parts.next() {
            Some(p) => Some(p.parse().map_err(|_| invalid())?),
            None => None,
        };
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self {
            major,
            minor,
            build,
            revision,
        })
    }
}

/// Eight-byte strong-name token, rendered as lower-case hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKeyToken([u8; 8]);

impl PublicKeyToken {
    pub fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Derive a token from a full public key blob.
    ///
    /// Uses the low eight bytes of SHA-256(key); tokens read directly from
    /// metadata are carried verbatim and never pass through here.
    pub fn from_public_key(key: &[u8]) -> Self {
        let digest = Sha256::digest(key);
        let mut token = [0u8; 8];
        token.copy_from_slice(&digest[digest.len() - 8..]);
        token.reverse();
        Self(token)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for PublicKeyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for PublicKeyToken {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 16 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("invalid public key token: {s}"));
        }
        let mut bytes = [0u8; 8];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex = std::str::from_utf8(chunk).map_err(|e| e.to_string())?;
            bytes[i] = u8::from_str_radix(hex, 16).map_err(|e| e.to_string())?;
        }
        Ok(Self(bytes))
    }
}

impl Serialize for PublicKeyToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PublicKeyToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Full identity of an assembly: name, version, culture and strong-name token.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssemblyIdentity {
    pub name: String,
    pub version: FrameworkVersion,
    pub culture: String,
    pub public_key_token: Option<PublicKeyToken>,
}

impl AssemblyIdentity {
    pub fn new(name: impl Into<String>, version: FrameworkVersion) -> Self {
        Self {
            name: name.into(),
            version,
            culture: "neutral".to_string(),
            public_key_token: None,
        }
    }

    pub fn with_token(mut self, token: PublicKeyToken) -> Self {
        self.public_key_token = Some(token);
        self
    }
}

impl fmt::Display for AssemblyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, Version={}, Culture={}, PublicKeyToken={}",
            self.name,
            self.version,
            self.culture,
            self.public_key_token
                .map(|t| t.to_string())
                .unwrap_or_else(|| "null".to_string())
        )
    }
}

/// An assembly identity plus the content hash of the file it was read from.
///
/// The hash participates in equality: two files carrying the same identity
/// but different bytes stay distinct and the finder logs the conflict.
/// Referenced-but-unopened assemblies have no hash.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssemblyInfo {
    pub identity: AssemblyIdentity,
    pub content_hash: Option<String>,
}

impl AssemblyInfo {
    pub fn referenced(identity: AssemblyIdentity) -> Self {
        Self {
            identity,
            content_hash: None,
        }
    }

    pub fn opened(identity: AssemblyIdentity, contents: &[u8]) -> Self {
        let digest = Sha256::digest(contents);
        let mut hash = String::with_capacity(digest.len() * 2);
        for byte in digest {
            hash.push_str(&format!("{byte:02x}"));
        }
        Self {
            identity,
            content_hash: Some(hash),
        }
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }
}

impl fmt::Display for AssemblyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.identity.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing() {
        let version: FrameworkVersion = "4.5.1".parse().unwrap();
        assert_eq!(version, FrameworkVersion {
            major: 4,
            minor: 5,
            build: Some(1),
            revision: None,
        });

        let prefixed: FrameworkVersion = "v2.0".parse().unwrap();
        assert_eq!(prefixed, FrameworkVersion::new(2, 0));

        assert!("".parse::<FrameworkVersion>().is_err());
        assert!("4".parse::<FrameworkVersion>().is_err());
        assert!("4.x".parse::<FrameworkVersion>().is_err());
        assert!("1.2.3.4.5".parse::<FrameworkVersion>().is_err());
    }

    #[test]
    fn test_version_ordering() {
        let v45: FrameworkVersion = "4.5".parse().unwrap();
        let v450: FrameworkVersion = "4.5.0".parse().unwrap();
        let v451: FrameworkVersion = "4.5.1".parse().unwrap();
        let v40: FrameworkVersion = "4.0".parse().unwrap();

        assert!(v40 < v45);
        assert!(v45 < v450);
        assert!(v450 < v451);
    }

    #[test]
    fn test_version_display_roundtrip() {
        for input in ["2.0", "4.5.1", "4.0.30319.42000"] {
            let version: FrameworkVersion = input.parse().unwrap();
            assert_eq!(version.to_string(), input);
        }
    }

    #[test]
    fn test_public_key_token_hex() {
        let token: PublicKeyToken = "b77a5c561934e089".parse().unwrap();
        assert_eq!(token.to_string(), "b77a5c561934e089");
        assert!("b77a5c5".parse::<PublicKeyToken>().is_err());
        assert!("zz7a5c561934e089".parse::<PublicKeyToken>().is_err());
    }

    #[test]
    fn test_identity_display() {
        let identity = AssemblyIdentity::new("mscorlib", FrameworkVersion::with_build(4, 0, 0, 0))
            .with_token("b77a5c561934e089".parse().unwrap());
        assert_eq!(
            identity.to_string(),
            "mscorlib, Version=4.0.0.0, Culture=neutral, PublicKeyToken=b77a5c561934e089"
        );
    }

    #[test]
    fn test_assembly_info_hash_distinguishes_content() {
        let identity = AssemblyIdentity::new("App", FrameworkVersion::new(1, 0));
        let a = AssemblyInfo::opened(identity.clone(), b"one");
        let b = AssemblyInfo::opened(identity, b"two");
        assert_eq!(a.identity, b.identity);
        assert_ne!(a, b);
    }
}
