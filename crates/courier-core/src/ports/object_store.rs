//! ObjectStore port - オブジェクトストレージ（S3 互換 / Local / InMemory）
//!
//! ストレージサービス本体（耐久性・アクセス制御）はこのクレートの外側にあります。
//! ここでは uploader が必要とする 2 つの操作だけを定義します。
//!
//! # 設計原則
//! - `put` は atomic: 読み手に書きかけのオブジェクトが見えてはいけない
//! - `head` は idempotency の short-circuit 用（content hash の一致確認）
//! - エラーは transient / permanent に分類できること（リトライ判断のため）

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ContentHash, Destination, ErrorKind};
use crate::ports::credentials::Credential;

/// Metadata returned by a HEAD-equivalent call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub content_hash: ContentHash,
    pub size: u64,
}

/// Storage-side failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("request throttled: {0}")]
    Throttled(String),

    #[error("access denied for {0}")]
    Unauthorized(String),

    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Unavailable(_) | StoreError::Throttled(_) => ErrorKind::Transient,
            StoreError::Unauthorized(_) | StoreError::InvalidDestination(_) => {
                ErrorKind::Permanent
            }
            StoreError::Io(e) => io_kind(e),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// ローカル I/O エラーの分類: パスそのものが使えない場合はリトライしない
fn io_kind(e: &std::io::Error) -> ErrorKind {
    use std::io::ErrorKind as Io;
    match e.kind() {
        Io::PermissionDenied
        | Io::NotADirectory
        | Io::IsADirectory
        | Io::ReadOnlyFilesystem
        | Io::InvalidInput
        | Io::AlreadyExists => ErrorKind::Permanent,
        _ => ErrorKind::Transient,
    }
}

/// ObjectStore は artifact を配置するストレージ
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Metadata of the object at `destination`, or `None` when absent.
    async fn head(
        &self,
        destination: &Destination,
        credential: &Credential,
    ) -> Result<Option<ObjectMeta>, StoreError>;

    /// Atomically publish `body` at `destination`, replacing any previous object.
    async fn put(
        &self,
        destination: &Destination,
        body: &[u8],
        meta: &ObjectMeta,
        credential: &Credential,
    ) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::ErrorKind as ErrorKindIo;

    #[rstest]
    #[case::unavailable(StoreError::Unavailable("503".into()), true)]
    #[case::throttled(StoreError::Throttled("slow down".into()), true)]
    #[case::io(StoreError::Io(std::io::Error::other("reset")), true)]
    #[case::io_interrupted(StoreError::Io(ErrorKindIo::Interrupted.into()), true)]
    #[case::io_permission(StoreError::Io(ErrorKindIo::PermissionDenied.into()), false)]
    #[case::io_not_a_directory(StoreError::Io(ErrorKindIo::NotADirectory.into()), false)]
    #[case::io_read_only(StoreError::Io(ErrorKindIo::ReadOnlyFilesystem.into()), false)]
    #[case::unauthorized(StoreError::Unauthorized("bucket".into()), false)]
    #[case::invalid(StoreError::InvalidDestination("bad".into()), false)]
    fn classification(#[case] err: StoreError, #[case] transient: bool) {
        assert_eq!(err.is_transient(), transient);
    }
}
