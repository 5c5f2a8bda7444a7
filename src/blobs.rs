//! Blob store for uploaded files and captured signatures.
//!
//! Blobs are addressed by a `/`-separated path relative to the upload root,
//! which is what gets persisted on templates and documents.

use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::info;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid filename")]
    InvalidName,
}

/// Namespace a blob is stored under.
#[derive(Debug, Clone, Copy)]
pub enum BlobCategory {
    Template { template_id: u64 },
    ClientUpload { client_id: u64, year: i32 },
    Signature { client_id: u64, document_id: u64 },
}

impl BlobCategory {
    fn dir(&self) -> String {
        match self {
            BlobCategory::Template { template_id } => format!("templates/{}", template_id),
            BlobCategory::ClientUpload { client_id, year } => format!("clients/{}/{}", client_id, year),
            BlobCategory::Signature { client_id, .. } => format!("signed/{}", client_id),
        }
    }

    fn file_name(&self, millis: i64, original: &str) -> String {
        match self {
            BlobCategory::Signature { document_id, .. } => format!("signed_{}_{}.png", document_id, millis),
            _ => format!("{}_{}", millis, original),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, BlobError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| BlobError::Io { path: root.clone(), source })?;
        Ok(Self { root })
    }

    /// Store `bytes` and return the relative path to persist on the owning
    /// record. The stored name is prefixed with the upload time in millis;
    /// a name already taken in the same millisecond gets the next one.
    pub async fn save(&self, category: BlobCategory, original_name: &str, bytes: &[u8]) -> Result<String, BlobError> {
        let safe_name = sanitize_file_name(original_name).ok_or(BlobError::InvalidName)?;
        let rel_dir = category.dir();
        let dir = self.root.join(&rel_dir);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| BlobError::Io { path: dir.clone(), source })?;

        let mut millis = Utc::now().timestamp_millis();
        loop {
            let name = category.file_name(millis, &safe_name);
            let path = dir.join(&name);
            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match file {
                Ok(mut file) => {
                    file.write_all(bytes)
                        .await
                        .map_err(|source| BlobError::Io { path: path.clone(), source })?;
                    file.flush()
                        .await
                        .map_err(|source| BlobError::Io { path: path.clone(), source })?;
                    let rel = format!("{}/{}", rel_dir, name);
                    info!(path = %rel, size = bytes.len(), "blob stored");
                    return Ok(rel);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => millis += 1,
                Err(source) => return Err(BlobError::Io { path, source }),
            }
        }
    }

    /// Map a stored relative path back to a file under the root. Rejects
    /// absolute paths and any `..` component.
    pub fn resolve(&self, rel: &str) -> Option<PathBuf> {
        let rel = Path::new(rel);
        if rel.as_os_str().is_empty() {
            return None;
        }
        let mut out = self.root.clone();
        for component in rel.components() {
            match component {
                Component::Normal(part) => out.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(out)
    }

    pub async fn read(&self, rel: &str) -> Option<Vec<u8>> {
        let path = self.resolve(rel)?;
        tokio::fs::read(path).await.ok()
    }
}

/// Last path component of a client-supplied filename with whitespace runs
/// collapsed to `_`.
fn sanitize_file_name(original: &str) -> Option<String> {
    let base = original.rsplit(['/', '\\']).next().unwrap_or(original);
    let mut out = String::with_capacity(base.len());
    let mut in_space = false;
    for ch in base.chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
        } else {
            out.push(ch);
            in_space = false;
        }
    }
    if out.is_empty() || out == "." || out == ".." {
        None
    } else {
        Some(out)
    }
}
