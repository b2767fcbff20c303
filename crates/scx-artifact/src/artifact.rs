//! Artifact references
//!
//! An [`ArtifactRef`] points at one file produced by an execution. Several
//! refs may be versions of the same logical output; [`ArtifactRef::version_key`]
//! exposes what deduplication needs to pick the current one.

use crate::name::{file_name, Version, VersionedName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Artifact kind derived from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Rendered chart (HTML)
    Chart,
    /// Tabular data
    Table,
    /// Raster or vector image
    Image,
    /// JSON document
    Json,
    /// Plain text or markdown
    Text,
    /// Source script
    Script,
    /// Anything else
    #[default]
    Other,
}

impl ArtifactKind {
    /// Classify a filename by its last extension (case-insensitive)
    #[must_use]
    pub fn from_filename(filename: &str) -> Self {
        let ext = file_name(filename)
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "html" | "htm" => Self::Chart,
            "csv" | "tsv" | "xlsx" | "xls" | "parquet" => Self::Table,
            "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" => Self::Image,
            "json" => Self::Json,
            "txt" | "md" | "log" => Self::Text,
            "py" | "r" | "sql" | "sh" => Self::Script,
            _ => Self::Other,
        }
    }

    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Chart => "chart",
            Self::Table => "table",
            Self::Image => "image",
            Self::Json => "json",
            Self::Text => "text",
            Self::Script => "script",
            Self::Other => "other",
        }
    }
}

/// Reference to one produced file
///
/// # Invariants
/// - `filename` is the last component of `path`
/// - `produced_at` is the embedded suffix timestamp when present,
///   otherwise the arrival time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Bare filename
    pub filename: String,
    /// Backend path
    pub path: String,
    /// Derived kind
    pub kind: ArtifactKind,
    /// Production time used for version ordering
    pub produced_at: DateTime<Utc>,
    /// Wall-clock time the reference was first seen
    pub arrived_at: DateTime<Utc>,
    /// Cached rendered content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Load or render error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ArtifactRef {
    /// Create a reference for `path`, first seen at `arrived_at`
    #[must_use]
    pub fn new(path: impl Into<String>, arrived_at: DateTime<Utc>) -> Self {
        let path = path.into();
        let filename = file_name(&path).to_string();
        let name = VersionedName::parse(&filename);

        Self {
            kind: ArtifactKind::from_filename(&filename),
            produced_at: name.timestamp().unwrap_or(arrived_at),
            filename,
            path,
            arrived_at,
            content: None,
            error: None,
        }
    }

    /// Attach rendered content
    #[inline]
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Attach an error
    #[inline]
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Parsed filename
    #[inline]
    #[must_use]
    pub fn versioned_name(&self) -> VersionedName {
        VersionedName::parse(&self.filename)
    }

    /// Canonical base name shared by all versions
    #[must_use]
    pub fn canonical_name(&self) -> String {
        self.versioned_name().canonical().to_string()
    }

    /// Ordering key used by deduplication
    #[must_use]
    pub fn version_key(&self) -> VersionKey {
        let name = self.versioned_name();
        VersionKey {
            canonical: name.canonical().to_string(),
            produced_at: self.produced_at,
            sequence: name.version().map_or(0, |v: Version| v.sequence),
            versioned: name.is_versioned(),
        }
    }
}

/// Grouping and ordering key for one artifact
///
/// Items with equal `canonical` compete; the greatest
/// `(produced_at, sequence)` wins.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionKey {
    /// Canonical base name
    pub canonical: String,
    /// Embedded or arrival timestamp
    pub produced_at: DateTime<Utc>,
    /// Embedded collision counter (0 when unversioned)
    pub sequence: u32,
    /// Whether the timestamp came from the filename
    pub versioned: bool,
}

impl VersionKey {
    /// Key for a bare filename, using `arrived_at` when unversioned
    #[must_use]
    pub fn for_filename(filename: &str, arrived_at: DateTime<Utc>) -> Self {
        let name = VersionedName::parse(file_name(filename));
        Self {
            canonical: name.canonical().to_string(),
            produced_at: name.timestamp().unwrap_or(arrived_at),
            sequence: name.version().map_or(0, |v| v.sequence),
            versioned: name.is_versioned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn kind_from_extension() {
        assert_eq!(ArtifactKind::from_filename("chart.HTML"), ArtifactKind::Chart);
        assert_eq!(ArtifactKind::from_filename("out/r.csv"), ArtifactKind::Table);
        assert_eq!(ArtifactKind::from_filename("plot.svg"), ArtifactKind::Image);
        assert_eq!(ArtifactKind::from_filename("query.sql"), ArtifactKind::Script);
        assert_eq!(ArtifactKind::from_filename("README"), ArtifactKind::Other);
        assert_eq!(ArtifactKind::from_filename("dir.v2/file"), ArtifactKind::Other);
    }

    #[test]
    fn produced_at_prefers_embedded_timestamp() {
        let arrived = at(1_800_000_000);
        let artifact = ArtifactRef::new("outputs/chart_1700000000_1.html", arrived);

        assert_eq!(artifact.filename, "chart_1700000000_1.html");
        assert_eq!(artifact.produced_at, at(1_700_000_000));
        assert_eq!(artifact.arrived_at, arrived);
        assert_eq!(artifact.kind, ArtifactKind::Chart);
        assert_eq!(artifact.canonical_name(), "chart.html");
    }

    #[test]
    fn produced_at_falls_back_to_arrival() {
        let arrived = at(1_800_000_000);
        let artifact = ArtifactRef::new("summary.txt", arrived);
        assert_eq!(artifact.produced_at, arrived);
        assert!(!artifact.version_key().versioned);
    }

    #[test]
    fn version_key_for_filename_matches_ref() {
        let arrived = at(1_750_000_000);
        let artifact = ArtifactRef::new("report_1700000500_2.csv", arrived);
        assert_eq!(
            artifact.version_key(),
            VersionKey::for_filename("report_1700000500_2.csv", arrived)
        );
    }

    #[test]
    fn builders_attach_content_and_error() {
        let artifact = ArtifactRef::new("a.html", at(0))
            .with_content("<div/>")
            .with_error("render failed");
        assert_eq!(artifact.content.as_deref(), Some("<div/>"));
        assert_eq!(artifact.error.as_deref(), Some("render failed"));
    }
}
