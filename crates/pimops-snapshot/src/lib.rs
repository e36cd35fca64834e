//! Versioned attribute snapshot files.
//!
//! The export command writes a `{schemaVersion, exportedAt, attributes}`
//! envelope; the import command reads it back. Files written by the older
//! tooling were a bare JSON array with no version tag, so a bare array is
//! accepted and migrated on read instead of rejected. A version tag this
//! tooling does not know is rejected outright.

use std::fs;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use pimops_core::AttributeRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub const CRATE_NAME: &str = "pimops-snapshot";

pub const SCHEMA_VERSION: u32 = 1;

/// Default location, relative to the working directory.
pub const DEFAULT_SNAPSHOT_PATH: &str = "outputs/bluestone/export-attributes.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub schema_version: u32,
    pub exported_at: DateTime<Utc>,
    pub attributes: Vec<AttributeRecord>,
}

impl Snapshot {
    pub fn new(attributes: Vec<AttributeRecord>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            exported_at: Utc::now(),
            attributes,
        }
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot schema version {found} is not supported (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },
    #[error("snapshot is neither a versioned envelope nor a legacy attribute array")]
    UnrecognizedShape(#[source] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Write a snapshot atomically: temp file in the target directory, then
/// rename over the destination.
pub fn write_snapshot(path: &Path, attributes: Vec<AttributeRecord>) -> anyhow::Result<Snapshot> {
    let snapshot = Snapshot::new(attributes);
    let json = serde_json::to_string_pretty(&snapshot).context("serializing snapshot")?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating snapshot directory {}", parent.display()))?;
        }
    }

    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, json)
        .with_context(|| format!("writing temp snapshot {}", temp_path.display()))?;
    fs::rename(&temp_path, path)
        .with_context(|| format!("renaming snapshot into place at {}", path.display()))?;

    Ok(snapshot)
}

/// Read a snapshot, migrating legacy bare-array files in memory.
pub fn read_snapshot(path: &Path) -> Result<Snapshot, SnapshotError> {
    let text = fs::read_to_string(path)?;

    match serde_json::from_str::<Snapshot>(&text) {
        Ok(snapshot) => {
            if snapshot.schema_version != SCHEMA_VERSION {
                return Err(SnapshotError::VersionMismatch {
                    found: snapshot.schema_version,
                    expected: SCHEMA_VERSION,
                });
            }
            Ok(snapshot)
        }
        Err(envelope_err) => match serde_json::from_str::<Vec<AttributeRecord>>(&text) {
            Ok(attributes) => {
                warn!(
                    path = %path.display(),
                    count = attributes.len(),
                    "migrating legacy unversioned snapshot"
                );
                Ok(Snapshot::new(attributes))
            }
            Err(_) => Err(SnapshotError::UnrecognizedShape(envelope_err)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn attribute(number: &str, name: &str) -> AttributeRecord {
        AttributeRecord {
            number: number.to_string(),
            name: name.to_string(),
            data_type: "text".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn snapshot_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("export-attributes.json");

        let written = write_snapshot(&path, vec![attribute("A1", "Color")]).unwrap();
        let read = read_snapshot(&path).unwrap();

        assert_eq!(read, written);
        assert_eq!(read.schema_version, SCHEMA_VERSION);
        assert_eq!(read.attributes[0].number, "A1");
    }

    #[test]
    fn write_creates_missing_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outputs/bluestone/export-attributes.json");
        write_snapshot(&path, vec![]).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn future_schema_version_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snap.json");
        fs::write(
            &path,
            r#"{"schemaVersion": 2, "exportedAt": "2026-01-01T00:00:00Z", "attributes": []}"#,
        )
        .unwrap();

        match read_snapshot(&path) {
            Err(SnapshotError::VersionMismatch { found, expected }) => {
                assert_eq!(found, 2);
                assert_eq!(expected, SCHEMA_VERSION);
            }
            other => panic!("expected version mismatch, got {other:?}"),
        }
    }

    #[test]
    fn legacy_bare_array_is_migrated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("legacy.json");
        fs::write(
            &path,
            r#"[{"name": "Color", "number": "A1", "dataType": "text"}]"#,
        )
        .unwrap();

        let snapshot = read_snapshot(&path).unwrap();
        assert_eq!(snapshot.schema_version, SCHEMA_VERSION);
        assert_eq!(snapshot.attributes.len(), 1);
        assert_eq!(snapshot.attributes[0].name, "Color");
    }

    #[test]
    fn garbage_is_an_unrecognized_shape() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"not": "a snapshot"}"#).unwrap();
        assert!(matches!(
            read_snapshot(&path),
            Err(SnapshotError::UnrecognizedShape(_))
        ));
    }
}
