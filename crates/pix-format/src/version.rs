//! Format versions and compatibility rules
//!
//! Versions are `major.minor`. A reader asks for one of:
//!
//! - nothing: use whatever the container stores
//! - `"1.5"`: the container must store exactly `1.5`
//! - `"~1.5"`: any stored `1.x` with `x >= 5`; the stored version is then used
//!
//! Minor versions compare numerically, so `~1.9` accepts a stored `1.10`.
//! Writers may only name the stored version exactly.

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::error::{FormatError, Result};

/// Prefix marking a compatible-version request
pub const COMPATIBLE_PREFIX: char = '~';

/// A `major.minor` format version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FormatVersion {
    pub major: u32,
    pub minor: u32,
}

impl FormatVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Whether a container at this version may be read by a client written
    /// against `requested`
    pub fn satisfies(&self, requested: &FormatVersion) -> bool {
        self.major == requested.major && self.minor >= requested.minor
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for FormatVersion {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self> {
        let unknown = || FormatError::UnknownVersion(s.to_string());
        let (major, minor) = s.split_once('.').ok_or_else(unknown)?;
        let digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        if !digits(major) || !digits(minor) {
            return Err(unknown());
        }
        Ok(Self {
            major: major.parse().map_err(|_| unknown())?,
            minor: minor.parse().map_err(|_| unknown())?,
        })
    }
}

/// A parsed read-version request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionRequest {
    /// Stored version must match exactly
    Exact(FormatVersion),
    /// Stored version must share the major and have at least this minor
    Compatible(FormatVersion),
}

impl FromStr for VersionRequest {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.strip_prefix(COMPATIBLE_PREFIX) {
            Some(rest) => Ok(Self::Compatible(rest.parse()?)),
            None => Ok(Self::Exact(s.parse()?)),
        }
    }
}

/// Resolve the version to read a container with
///
/// Returns the stored version whenever the request accepts it; the caller
/// still has to check that the result is registered.
pub fn resolve_read_version(requested: Option<&str>, stored: &str) -> Result<String> {
    let Some(requested) = requested else {
        return Ok(stored.to_string());
    };
    let mismatch = || FormatError::VersionMismatch {
        stored: stored.to_string(),
        requested: requested.to_string(),
    };

    let request: VersionRequest = requested.parse()?;
    let stored_version: FormatVersion = stored.parse()?;
    let accepted = match request {
        VersionRequest::Exact(v) => v == stored_version,
        VersionRequest::Compatible(v) => stored_version.satisfies(&v),
    };

    if accepted {
        debug!("read request {} resolved to stored version {}", requested, stored);
        Ok(stored.to_string())
    } else {
        Err(mismatch())
    }
}

/// Check a write request against the stored version
pub fn check_write_version(requested: Option<&str>, stored: &str) -> Result<()> {
    match requested {
        None => Ok(()),
        Some(v) if v == stored => Ok(()),
        Some(v) => Err(FormatError::VersionMismatch {
            stored: stored.to_string(),
            requested: v.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_display() {
        let v: FormatVersion = "1.10".parse().unwrap();
        assert_eq!(v, FormatVersion::new(1, 10));
        assert_eq!(v.to_string(), "1.10");
        assert!("1".parse::<FormatVersion>().is_err());
        assert!("1.".parse::<FormatVersion>().is_err());
        assert!("a.b".parse::<FormatVersion>().is_err());
        assert!("1.-2".parse::<FormatVersion>().is_err());
    }

    #[test]
    fn test_none_uses_stored() {
        assert_eq!(resolve_read_version(None, "1.5").unwrap(), "1.5");
    }

    #[test]
    fn test_compatible_resolves_to_stored() {
        assert_eq!(resolve_read_version(Some("~1.0"), "1.5").unwrap(), "1.5");
        assert_eq!(resolve_read_version(Some("~1.5"), "1.5").unwrap(), "1.5");
    }

    #[test]
    fn test_compatible_rejects() {
        assert!(matches!(
            resolve_read_version(Some("~2.0"), "1.5"),
            Err(FormatError::VersionMismatch { .. })
        ));
        assert!(matches!(
            resolve_read_version(Some("~1.6"), "1.5"),
            Err(FormatError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_minor_compares_numerically() {
        assert_eq!(resolve_read_version(Some("~1.9"), "1.10").unwrap(), "1.10");
        assert!(resolve_read_version(Some("~1.10"), "1.9").is_err());
    }

    #[test]
    fn test_exact() {
        assert_eq!(resolve_read_version(Some("2.0"), "2.0").unwrap(), "2.0");
        assert!(matches!(
            resolve_read_version(Some("1.0"), "2.0"),
            Err(FormatError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_malformed_request() {
        assert!(matches!(
            resolve_read_version(Some("~latest"), "2.0"),
            Err(FormatError::UnknownVersion(_))
        ));
    }

    #[test]
    fn test_write_rule() {
        assert!(check_write_version(None, "1.0").is_ok());
        assert!(check_write_version(Some("1.0"), "1.0").is_ok());
        assert!(matches!(
            check_write_version(Some("~1.0"), "1.0"),
            Err(FormatError::VersionMismatch { .. })
        ));
    }
}
