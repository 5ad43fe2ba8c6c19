use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;
use tempfile::NamedTempFile;

use crate::autothread::warn;
use crate::error::PlatformError;

/// Load a JSON document, recovering from corruption: the unreadable file is
/// moved aside as `<name>.json.corrupt.<epoch>` and the default document is
/// returned so the reconciliation pass keeps going.
pub fn load_or_default<T>(path: &Path, doc: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }

    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;

    match serde_json::from_str(&raw) {
        Ok(parsed) => Ok(parsed),
        Err(err) => {
            let timestamp = crate::autothread::util::now_epoch_secs().unwrap_or(0);
            let backup_path = path.with_extension(format!("json.corrupt.{}", timestamp));
            let _ = fs::rename(path, &backup_path);

            warn::emit(warn::WarnEvent {
                code: "STATE_CORRUPT",
                stage: "load",
                forum: "na",
                thread: "na",
                step: doc,
                retry: "started-empty",
                reason: "json-parse-failed",
                err: &format!("{err:#}"),
            });

            Ok(T::default())
        }
    }
}

/// Strict read used by diagnostics. Unlike `load_or_default` it does not
/// recover; a parse failure is reported as-is.
pub fn strict_read<T>(path: &Path) -> Result<Option<T>, PlatformError>
where
    T: DeserializeOwned,
{
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| PlatformError::CorruptState(format!("{}: {err}", path.display())))?;
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|err| PlatformError::CorruptState(format!("{}: {err}", path.display())))
}

/// Write a document atomically: temp file in the target directory, fsync via
/// flush, then rename over the destination. A reader never observes a
/// half-written document.
pub fn save_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path.parent().context("document path has no parent")?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;

    let mut temp = NamedTempFile::new_in(parent)?;
    serde_json::to_writer_pretty(&mut temp, value)?;
    use std::io::Write;
    temp.write_all(b"\n")?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|e| anyhow::anyhow!("failed persisting {} atomically: {}", path.display(), e.error))?;

    Ok(())
}
