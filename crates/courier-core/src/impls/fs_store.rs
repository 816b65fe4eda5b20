//! LocalObjectStore - ディレクトリをバケットに見立てたオブジェクトストア
//!
//! レイアウト: `<root>/<bucket>/<key>`
//!
//! # 設計原則
//! - put は同じディレクトリの一時ファイルに書いてから rename（atomic）
//! - head は中身から SHA-256 を計算する（メタデータを別保存しない）
//! - ファイル I/O は spawn_blocking に逃がす
//! - credential は検査しない（ローカル開発用）

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::domain::{ContentHash, Destination};
use crate::ports::{Credential, ObjectMeta, ObjectStore, StoreError};

#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of `destination`.
    pub fn path_of(&self, destination: &Destination) -> PathBuf {
        let mut path = self.root.join(destination.bucket());
        for segment in destination.key().split('/') {
            path.push(segment);
        }
        path
    }
}

fn read_meta(path: &Path) -> io::Result<Option<ObjectMeta>> {
    match std::fs::read(path) {
        Ok(body) => Ok(Some(ObjectMeta {
            content_hash: ContentHash::compute(&body),
            size: body.len() as u64,
        })),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn write_atomic(path: &Path, body: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "object path has no parent"))?;
    std::fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(body)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn join_error(e: tokio::task::JoinError) -> StoreError {
    StoreError::Unavailable(format!("blocking io task failed: {e}"))
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn head(
        &self,
        destination: &Destination,
        _credential: &Credential,
    ) -> Result<Option<ObjectMeta>, StoreError> {
        let path = self.path_of(destination);
        let meta = tokio::task::spawn_blocking(move || read_meta(&path))
            .await
            .map_err(join_error)??;
        Ok(meta)
    }

    async fn put(
        &self,
        destination: &Destination,
        body: &[u8],
        meta: &ObjectMeta,
        _credential: &Credential,
    ) -> Result<(), StoreError> {
        let path = self.path_of(destination);
        debug!(
            path = %path.display(),
            size = meta.size,
            hash = %meta.content_hash.short(),
            "writing object"
        );
        let body = body.to_vec();
        tokio::task::spawn_blocking(move || write_atomic(&path, &body))
            .await
            .map_err(join_error)??;
        Ok(())
    }
}
