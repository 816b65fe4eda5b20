//! courier-core
//!
//! Core building blocks for the Courier deployment orchestrator.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, artifact, target, attempt, run, errors）
//! - **ports**: 抽象化レイヤー（ObjectStore, CredentialResolver, Clock, Sleeper, IdGenerator）
//! - **archive**: 決定的な tar.gz パッケージング
//! - **plan**: trigger -> target の選択と依存レベル分け
//! - **upload**: リトライと冪等性つきのアップロード
//! - **app**: Orchestrator と OrchestratorBuilder
//! - **impls**: ports の実装（InMemory / Local / 環境変数）
//! - **config**: `courier.toml` の読み込み
//! - **telemetry**: tracing subscriber の初期化

pub mod app;
pub mod archive;
pub mod cancel;
pub mod config;
pub mod domain;
pub mod impls;
pub mod plan;
pub mod ports;
pub mod telemetry;
pub mod upload;

pub use app::{BuildError, Orchestrator, OrchestratorBuilder};
pub use cancel::{CancelHandle, CancelSignal};
pub use config::{ConfigError, DeployConfig};
