//! `major.minor.patch` version triple used for application metadata.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application version in `x.y.z` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Version {
    /// Major component
    pub major: u32,
    /// Minor component
    pub minor: u32,
    /// Patch component
    pub patch: u32,
}

impl Version {
    /// Version assumed when an application does not declare one.
    pub const DEFAULT: Self = Self::new(0, 0, 1);

    /// The all-zero version.
    pub const NULL: Self = Self::new(0, 0, 0);

    /// Create a version from its components
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Errors from parsing a version string
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionParseError {
    /// Not exactly three dot-separated parts
    #[error("expected three dot-separated components, got {0:?}")]
    WrongShape(String),

    /// A component is not a non-negative integer
    #[error("invalid version component {0:?}")]
    InvalidComponent(String),
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(VersionParseError::WrongShape(s.to_string()));
        }

        let component = |part: &str| {
            part.parse::<u32>()
                .map_err(|_| VersionParseError::InvalidComponent(part.to_string()))
        };

        Ok(Self::new(component(parts[0])?, component(parts[1])?, component(parts[2])?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_as_dotted_triple() {
        assert_eq!(Version::new(0, 0, 9).to_string(), "0.0.9");
        assert_eq!(Version::DEFAULT.to_string(), "0.0.1");
    }

    #[test]
    fn parses_and_rejects() {
        assert_eq!("1.2.3".parse::<Version>(), Ok(Version::new(1, 2, 3)));
        assert!(matches!("1.2".parse::<Version>(), Err(VersionParseError::WrongShape(_))));
        assert!(matches!("1.x.3".parse::<Version>(), Err(VersionParseError::InvalidComponent(_))));
    }
}
