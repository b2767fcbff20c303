//! Versioned artifact filenames
//!
//! Producers avoid name collisions by embedding a `_<epoch-seconds>_<n>`
//! suffix before the extension (`report_1700000000_1.csv`). Stripping the
//! suffix yields the canonical base name (`report.csv`) shared by every
//! version of the same logical output.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

static VERSION_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<base>.+?)_(?P<epoch>\d{9,11})_(?P<seq>\d{1,9})(?P<ext>(?:\.[^.]+)*)$")
        .expect("version suffix pattern is valid")
});

/// Version embedded in a producer filename
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Embedded epoch seconds
    pub epoch_secs: i64,
    /// Collision counter within the same second
    pub sequence: u32,
}

impl Version {
    /// Embedded timestamp as a UTC datetime
    #[inline]
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.epoch_secs, 0).unwrap_or_default()
    }
}

/// A filename split into canonical base name and optional version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionedName {
    canonical: String,
    version: Option<Version>,
}

impl VersionedName {
    /// Parse a bare filename (no directory components)
    ///
    /// Names without a recognizable suffix are returned unchanged with no
    /// version. A suffix whose epoch does not map to a valid datetime is
    /// treated as part of the name.
    #[must_use]
    pub fn parse(filename: &str) -> Self {
        let Some(caps) = VERSION_SUFFIX.captures(filename) else {
            return Self::unversioned(filename);
        };

        let epoch = caps["epoch"].parse::<i64>().ok();
        let seq = caps["seq"].parse::<u32>().ok();
        match (epoch, seq) {
            (Some(epoch_secs), Some(sequence))
                if DateTime::from_timestamp(epoch_secs, 0).is_some() =>
            {
                Self {
                    canonical: format!("{}{}", &caps["base"], &caps["ext"]),
                    version: Some(Version {
                        epoch_secs,
                        sequence,
                    }),
                }
            }
            _ => Self::unversioned(filename),
        }
    }

    fn unversioned(filename: &str) -> Self {
        Self {
            canonical: filename.to_string(),
            version: None,
        }
    }

    /// Canonical base name with the version suffix stripped
    #[inline]
    #[must_use]
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Embedded version, if any
    #[inline]
    #[must_use]
    pub fn version(&self) -> Option<Version> {
        self.version
    }

    /// Whether the name carried a version suffix
    #[inline]
    #[must_use]
    pub fn is_versioned(&self) -> bool {
        self.version.is_some()
    }

    /// Embedded timestamp, if any
    #[inline]
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.version.map(|v| v.timestamp())
    }
}

impl Display for VersionedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(v) => write!(f, "{}@{}.{}", self.canonical, v.epoch_secs, v.sequence),
            None => write!(f, "{}", self.canonical),
        }
    }
}

/// Final path component of a `/` or `\` separated path
#[must_use]
pub fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
