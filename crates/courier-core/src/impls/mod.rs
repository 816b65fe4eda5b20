//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryObjectStore**: テスト用（fault script 付き）
//! - **LocalObjectStore**: ディレクトリをバケットに見立てた開発用ストア
//! - **EnvCredentialResolver** / **StaticCredentialResolver**
//!
//! S3 などのクラウドストレージ実装は `ObjectStore` を実装する別クレートに置きます。

pub mod credentials;
pub mod fs_store;
pub mod inmem_store;

pub use self::credentials::{EnvCredentialResolver, StaticCredentialResolver};
pub use self::fs_store::LocalObjectStore;
pub use self::inmem_store::{Fault, InMemoryObjectStore};
