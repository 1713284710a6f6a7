//! Three-part numeric versions used by the compatibility gate.

use std::cmp::Ordering;
use std::fmt;

/// `major.minor.patch`, strictly numeric. Pre-release and build suffixes are not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SemVer {
    pub const ZERO: SemVer = SemVer {
        major: 0,
        minor: 0,
        patch: 0,
    };

    pub fn parse(input: &str) -> Option<Self> {
        let mut parts = input.trim().split('.');
        let major = parse_part(parts.next()?)?;
        let minor = parse_part(parts.next()?)?;
        let patch = parse_part(parts.next()?)?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            major,
            minor,
            patch,
        })
    }
}

fn parse_part(part: &str) -> Option<u64> {
    if part.is_empty() || !part.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Compares two version strings. `None` when either side is malformed.
pub fn compare_semver(left: &str, right: &str) -> Option<Ordering> {
    Some(SemVer::parse(left)?.cmp(&SemVer::parse(right)?))
}
