//! Filesystem-backed store.
//!
//! # File Layout
//!
//! ```text
//! <state_dir>/
//!   requests/<request-id>.json     # request snapshot
//!   deliveries/<delivery-id>.json  # delivery record (never removed)
//!   stream.json                    # stream log window + last sequence
//! ```
//!
//! # Atomic Writes
//!
//! Every file is written with the write-to-temp-then-rename pattern:
//! 1. Write to a fresh temp file in the target's directory
//! 2. fsync the file
//! 3. Rename to `<path>`
//! 4. fsync the directory
//!
//! Each write gets its own temp file, so concurrent writers of one key never
//! share a half-written file: the last rename wins whole. Readers always see
//! either the old or the new content, never a partial write. Without the
//! directory fsync a rename may not survive power loss even though the file
//! contents were synced.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::warn;

use super::{
    DeliveryRecord, DeliveryStore, RequestIndex, RequestStore, Result, StreamStore, validate_key,
};
use crate::stream::StreamLog;
use crate::types::{DeliveryId, RepoId, Request, RequestId, Sha};

const REQUESTS_DIR: &str = "requests";
const DELIVERIES_DIR: &str = "deliveries";
const STREAM_FILE: &str = "stream.json";

/// A store keeping one JSON file per key under a state directory.
///
/// Assumes it is the only writer of its directory: the request index is
/// built once on open and kept current by [`RequestStore::put`].
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    index: Arc<Mutex<RequestIndex>>,
}

impl FileStore {
    /// Opens (creating if needed) a store rooted at `root` and indexes the
    /// requests already on disk.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(REQUESTS_DIR))?;
        fs::create_dir_all(root.join(DELIVERIES_DIR))?;

        let mut index = RequestIndex::new();
        for request in read_requests(&root.join(REQUESTS_DIR))? {
            index.insert(&request);
        }

        Ok(FileStore {
            root,
            index: Arc::new(Mutex::new(index)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn request_path(&self, id: &RequestId) -> Result<PathBuf> {
        validate_key(id.as_str())?;
        Ok(self
            .root
            .join(REQUESTS_DIR)
            .join(format!("{}.json", id.as_str())))
    }

    fn delivery_path(&self, id: &DeliveryId) -> Result<PathBuf> {
        validate_key(id.as_str())?;
        Ok(self
            .root
            .join(DELIVERIES_DIR)
            .join(format!("{}.json", id.as_str())))
    }
}

impl RequestStore for FileStore {
    fn get(&self, id: &RequestId) -> Result<Option<Request>> {
        read_json(&self.request_path(id)?)
    }

    fn put(&self, request: &Request) -> Result<()> {
        write_json_atomic(&self.request_path(&request.id)?, request)?;
        self.index
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request);
        Ok(())
    }

    fn list(&self) -> Result<Vec<Request>> {
        Ok(read_requests(&self.root.join(REQUESTS_DIR))?)
    }

    fn find_candidates(
        &self,
        repo: &RepoId,
        branch: Option<&str>,
        head_sha: Option<&Sha>,
    ) -> Result<Vec<Request>> {
        let ids = self
            .index
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .lookup(repo, branch, head_sha);

        let mut requests = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(request) = self.get(&id)? {
                requests.push(request);
            }
        }
        Ok(requests)
    }
}

impl DeliveryStore for FileStore {
    fn head(&self, id: &DeliveryId) -> Result<bool> {
        Ok(self.delivery_path(id)?.exists())
    }

    fn put(&self, record: &DeliveryRecord) -> Result<()> {
        write_json_atomic(&self.delivery_path(&record.delivery_id)?, record)
    }
}

impl StreamStore for FileStore {
    fn load_stream(&self) -> Result<Option<StreamLog>> {
        read_json(&self.root.join(STREAM_FILE))
    }

    fn save_stream(&self, log: &StreamLog) -> Result<()> {
        write_json_atomic(&self.root.join(STREAM_FILE), log)
    }
}

/// Reads a JSON file, returning `None` if it does not exist.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Reads every request snapshot in `dir`, skipping files that do not parse.
fn read_requests(dir: &Path) -> io::Result<Vec<Request>> {
    let mut requests = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match read_json(&path) {
            Ok(Some(request)) => requests.push(request),
            Ok(None) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable request"),
        }
    }
    Ok(requests)
}

/// Writes a JSON file atomically.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let bytes = serde_json::to_vec_pretty(value)?;

    let mut file = NamedTempFile::new_in(parent)?;
    file.write_all(&bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;

    fsync_dir(parent)?;

    Ok(())
}

/// Syncs a directory so that entries created or renamed in it are durable.
fn fsync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}
