//! Whole-file persistence helpers.
//!
//! [`load_file`] and [`save_file`] move raw bytes; every failure, whatever its
//! cause, comes back as [`GrabberError::Storage`] naming the path.
//! [`save_snapshot`] and [`load_snapshot`] layer a small bincode container on
//! top for drained observations.

use crate::error::{AppResult, GrabberError};
use crate::observation::Observation;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::debug;

/// Leading bytes of a snapshot file.
pub const SNAPSHOT_MAGIC: &[u8; 8] = b"DAQGRAB1";

fn storage_error(path: &Path, message: impl Into<String>) -> GrabberError {
    GrabberError::Storage {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

/// Read the whole file. Fewer bytes than the file's reported length is an
/// error.
pub fn load_file(path: impl AsRef<Path>) -> AppResult<Vec<u8>> {
    let path = path.as_ref();
    let mut file = File::open(path).map_err(|e| storage_error(path, format!("open: {e}")))?;
    let expected = file
        .metadata()
        .map_err(|e| storage_error(path, format!("stat: {e}")))?
        .len();

    let capacity = usize::try_from(expected)
        .map_err(|_| storage_error(path, format!("file too large: {expected} bytes")))?;
    let mut bytes = Vec::with_capacity(capacity);
    file.read_to_end(&mut bytes)
        .map_err(|e| storage_error(path, format!("read: {e}")))?;

    if (bytes.len() as u64) < expected {
        return Err(storage_error(
            path,
            format!("short read: got {} of {expected} bytes", bytes.len()),
        ));
    }
    debug!(path = %path.display(), bytes = bytes.len(), "Loaded file");
    Ok(bytes)
}

/// Create or truncate `path` and write `bytes` in full.
pub fn save_file(path: impl AsRef<Path>, bytes: &[u8]) -> AppResult<()> {
    let path = path.as_ref();
    let mut file = File::create(path).map_err(|e| storage_error(path, format!("create: {e}")))?;
    file.write_all(bytes)
        .map_err(|e| storage_error(path, format!("write: {e}")))?;
    file.sync_all()
        .map_err(|e| storage_error(path, format!("sync: {e}")))?;
    debug!(path = %path.display(), bytes = bytes.len(), "Saved file");
    Ok(())
}

/// Header plus bincode body.
pub fn encode_snapshot(observations: &[Observation]) -> AppResult<Vec<u8>> {
    let body = bincode::serialize(observations).map_err(|e| GrabberError::Snapshot(e.to_string()))?;
    let mut bytes = Vec::with_capacity(SNAPSHOT_MAGIC.len() + body.len());
    bytes.extend_from_slice(SNAPSHOT_MAGIC);
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

/// Inverse of [`encode_snapshot`]; bytes without the header are rejected.
pub fn decode_snapshot(bytes: &[u8]) -> AppResult<Vec<Observation>> {
    let body = bytes
        .strip_prefix(SNAPSHOT_MAGIC.as_slice())
        .ok_or_else(|| GrabberError::Snapshot("missing snapshot header".to_string()))?;
    bincode::deserialize(body).map_err(|e| GrabberError::Snapshot(e.to_string()))
}

/// Encode and write `observations` to `path`.
pub fn save_snapshot(path: impl AsRef<Path>, observations: &[Observation]) -> AppResult<()> {
    save_file(path, &encode_snapshot(observations)?)
}

/// Read and decode a snapshot written by [`save_snapshot`].
pub fn load_snapshot(path: impl AsRef<Path>) -> AppResult<Vec<Observation>> {
    decode_snapshot(&load_file(path)?)
}
