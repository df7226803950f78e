//! Server protocol version gate.

use super::{Result, SyncError};
use std::fmt;
use std::str::FromStr;

/// A dotted numeric version. Ordering compares components numerically,
/// left to right, and a shorter prefix sorts first (`1.4 < 1.4.0`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProtocolVersion(Vec<u64>);

impl FromStr for ProtocolVersion {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim()
            .split('.')
            .map(|part| part.trim().parse::<u64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(ProtocolVersion)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u64::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

/// Accept `found` only if it parses and is at least `minimum`.
pub fn check_version(found: Option<&str>, minimum: &str) -> Result<ProtocolVersion> {
    let incompatible = || SyncError::IncompatibleVersion {
        found: found.map(str::to_string),
        required: minimum.to_string(),
    };

    let floor: ProtocolVersion = minimum
        .parse()
        .map_err(|_| SyncError::InvalidInput(format!("Invalid version floor: {}", minimum)))?;
    let version: ProtocolVersion = found
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(incompatible)?
        .parse()
        .map_err(|_| incompatible())?;

    if version < floor {
        return Err(incompatible());
    }
    Ok(version)
}
