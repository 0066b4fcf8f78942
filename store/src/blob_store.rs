use crate::key::Key;
use anyhow::{anyhow, bail, Context, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Maximum length of a source id, so it fits in a file system entry name.
const MAX_SOURCE_ID_LENGTH: usize = 255;

/// Maximum supported settings blob size in bytes.
pub const MAX_BLOB_SIZE: usize = 1024 * 1024;

const BLOB_FILENAME_PREFIX: &str = "blob_";
const BLOB_ID_DIGITS: usize = 5;

/// Identifies one stored blob. Opaque outside this module.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Handle {
    blob_id: u32,
    source_id: String,
}

/// Persists raw settings blobs under one directory per source, each blob in
/// a zero-padded, monotonically allocated file. Writes are atomic.
pub struct BlobStore {
    storage_path: PathBuf,
}

impl BlobStore {
    /// `storage_path` must point to a directory the store can write to; it
    /// is created on the first `store` call.
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
        }
    }

    /// Writes `blob` for `source_id` and returns its handle.
    pub fn store(&self, source_id: &str, blob: &[u8]) -> Result<Handle> {
        if blob.len() > MAX_BLOB_SIZE {
            bail!(
                "blob of {} bytes exceeds the {} byte limit",
                blob.len(),
                MAX_BLOB_SIZE
            );
        }
        let source_path = self.source_path(source_id)?;
        fs::create_dir_all(&source_path)?;

        let blob_id = self.next_unused_blob_id(source_id)?;
        let path = source_path.join(blob_filename(blob_id));
        write_file_atomically(&path, blob)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(Handle {
            blob_id,
            source_id: source_id.to_string(),
        })
    }

    /// Loads the blob identified by `handle`.
    pub fn load(&self, handle: &Handle) -> Result<Vec<u8>> {
        let path = self.blob_path(handle)?;
        let metadata = fs::metadata(&path)?;
        if metadata.len() > MAX_BLOB_SIZE as u64 {
            bail!("blob {} exceeds the size limit", path.display());
        }
        Ok(fs::read(&path)?)
    }

    /// Lists the handles stored for `source_id` in increasing blob id
    /// order. A source without a directory has no blobs.
    pub fn list(&self, source_id: &str) -> Result<Vec<Handle>> {
        let source_path = self.source_path(source_id)?;
        let mut handles = Vec::new();
        let entries = match fs::read_dir(&source_path) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(handles),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let entry = entry?;
            if let Some(blob_id) = filename_to_blob_id(&entry.file_name().to_string_lossy()) {
                handles.push(Handle {
                    blob_id,
                    source_id: source_id.to_string(),
                });
            }
        }
        handles.sort_by_key(|handle| handle.blob_id);
        Ok(handles)
    }

    /// Deletes the blob identified by `handle`.
    pub fn purge(&self, handle: &Handle) -> Result<()> {
        let path = self.blob_path(handle)?;
        fs::remove_file(&path).with_context(|| format!("failed to delete {}", path.display()))
    }

    fn source_path(&self, source_id: &str) -> Result<PathBuf> {
        if source_id.is_empty()
            || source_id.len() > MAX_SOURCE_ID_LENGTH
            || !Key::is_valid(source_id)
        {
            bail!("invalid source id {:?}", source_id);
        }
        Ok(self.storage_path.join(source_id))
    }

    fn blob_path(&self, handle: &Handle) -> Result<PathBuf> {
        if handle.blob_id == 0 {
            bail!("invalid blob handle");
        }
        Ok(self
            .source_path(&handle.source_id)?
            .join(blob_filename(handle.blob_id)))
    }

    fn next_unused_blob_id(&self, source_id: &str) -> Result<u32> {
        Ok(self
            .list(source_id)?
            .last()
            .map_or(1, |handle| handle.blob_id + 1))
    }
}

fn blob_filename(blob_id: u32) -> String {
    format!("{}{:05}", BLOB_FILENAME_PREFIX, blob_id)
}

fn filename_to_blob_id(filename: &str) -> Option<u32> {
    let id = filename.strip_prefix(BLOB_FILENAME_PREFIX)?;
    if id.len() != BLOB_ID_DIGITS || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    id.parse().ok().filter(|id| *id != 0)
}

/// Writes via a temp file, fsyncs, renames into place and fsyncs the
/// directory, so a crash leaves either the old state or the new file.
fn write_file_atomically(path: &Path, data: &[u8]) -> Result<()> {
    let directory = path
        .parent()
        .ok_or_else(|| anyhow!("no parent directory for {}", path.display()))?;
    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&temp_path, path)?;
    File::open(directory)?.sync_all()?;
    Ok(())
}
