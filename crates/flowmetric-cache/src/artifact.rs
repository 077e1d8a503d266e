//! Disk artifact codec.
//!
//! An artifact is a self-describing binary container: a fixed 8-byte
//! magic, one format-version byte, then a MessagePack body holding the
//! header and the typed metric payload. Loaders refuse unknown versions.

use chrono::{DateTime, Utc};
use flowmetric_error::{FlowError, Result};
use flowmetric_types::MetricsBundle;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

/// Leading magic bytes of every artifact file.
pub const ARTIFACT_MAGIC: [u8; 8] = *b"FLWMETRC";

/// Current format version.
pub const ARTIFACT_VERSION: u8 = 1;

/// Self-describing artifact header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactHeader {
    /// When the collection job produced this artifact.
    pub created_at: DateTime<Utc>,
    /// Canonical range spec.
    pub range_spec: String,
    /// Environment name.
    pub environment: String,
    /// Versions of the collectors that produced the payload.
    pub collector_versions: BTreeMap<String, String>,
}

/// Header plus payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Self-describing header.
    pub header: ArtifactHeader,
    /// The metric payload.
    pub payload: MetricsBundle,
}

/// Encode an artifact to its on-disk byte form.
///
/// # Errors
///
/// `Internal` when MessagePack serialization fails (should not happen
/// for well-formed payloads).
pub fn encode_artifact(artifact: &Artifact) -> Result<Vec<u8>> {
    let body = rmp_serde::to_vec_named(artifact)
        .map_err(|e| FlowError::internal(format!("artifact encode: {e}")))?;
    let mut bytes = Vec::with_capacity(9 + body.len());
    bytes.extend_from_slice(&ARTIFACT_MAGIC);
    bytes.push(ARTIFACT_VERSION);
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

/// Decode an artifact from bytes.
///
/// # Errors
///
/// `CacheCorrupt` for a short file, wrong magic, unknown version byte,
/// or an undecodable body. Callers treat all of these as a cache miss.
pub fn decode_artifact(bytes: &[u8]) -> Result<Artifact> {
    if bytes.len() < ARTIFACT_MAGIC.len() + 1 {
        return Err(FlowError::CacheCorrupt(format!(
            "truncated artifact ({} bytes)",
            bytes.len()
        )));
    }
    let (magic, rest) = bytes.split_at(ARTIFACT_MAGIC.len());
    if magic != ARTIFACT_MAGIC {
        return Err(FlowError::CacheCorrupt("bad artifact magic".into()));
    }
    let (&version, body) = rest
        .split_first()
        .ok_or_else(|| FlowError::CacheCorrupt("missing version byte".into()))?;
    if version != ARTIFACT_VERSION {
        return Err(FlowError::CacheCorrupt(format!(
            "unknown artifact version {version}"
        )));
    }
    rmp_serde::from_slice(body)
        .map_err(|e| FlowError::CacheCorrupt(format!("artifact body: {e}")))
}

/// Write bytes to `path` atomically: temp file in the same directory,
/// fsync, rename over the target, fsync the directory. A new artifact
/// fully replaces the old one or not at all.
///
/// # Errors
///
/// `Internal` on any I/O failure.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| FlowError::internal(format!("artifact path has no parent: {}", path.display())))?;
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| FlowError::internal(format!("artifact rename: {e}")))?;

    // Make the rename itself durable.
    #[cfg(unix)]
    std::fs::File::open(dir)?.sync_all()?;
    Ok(())
}
