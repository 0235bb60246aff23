//! Package version strings.
//!
//! The canonical format is `MAJOR.MINOR.BUILD` with non-negative decimal
//! integer components; such strings are ordered numerically, component by
//! component. The literal `latest` (case-insensitive) is a sentinel meaning
//! "resolve at request time" rather than a concrete version. Any other
//! string is accepted (e.g. a `git` hash used as a local override version)
//! but only compares equal to itself and sorts lexicographically against
//! other non-canonical strings.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A package version string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    /// Wrap an arbitrary string as a version, without validation.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if this is empty (no version recorded / requested).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if this is the `latest` sentinel (case-insensitive).
    pub fn is_latest(&self) -> bool {
        self.0.eq_ignore_ascii_case("latest")
    }

    /// Parse the canonical `MAJOR.MINOR.BUILD` components, if this string is
    /// in that exact shape (exactly three non-negative decimal integers).
    pub fn components(&self) -> Option<(u64, u64, u64)> {
        let mut parts = self.0.split('.');
        let major = parts.next()?;
        let minor = parts.next()?;
        let build = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        if major.is_empty() || minor.is_empty() || build.is_empty() {
            return None;
        }
        let is_decimal = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        if !is_decimal(major) || !is_decimal(minor) || !is_decimal(build) {
            return None;
        }
        Some((major.parse().ok()?, minor.parse().ok()?, build.parse().ok()?))
    }

    /// True if this string is in the canonical `MAJOR.MINOR.BUILD` shape.
    pub fn is_canonical(&self) -> bool {
        self.components().is_some()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Version {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl FromStr for Version {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl AsRef<str> for Version {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Canonical versions compare numerically, component by component; two
/// non-canonical versions fall back to lexicographic string order so `Ord`
/// remains a total order over all possible version strings.
impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.components(), other.components()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => self.0.cmp(&other.0),
        }
    }
}

/// Returns the lexicographically-latest canonical version in `versions`, or
/// an empty string if the list is empty (not an error).
pub fn latest_of(versions: &[Version]) -> Version {
    versions
        .iter()
        .max()
        .cloned()
        .unwrap_or_else(|| Version::new(""))
}
