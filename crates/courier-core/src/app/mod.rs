//! App - アプリケーション層
//!
//! ports と各コンポーネント（archive / plan / upload）を組み合わせて
//! デプロイ run を実行します。
//!
//! # 主要コンポーネント
//! - **OrchestratorBuilder**: 構築とワイヤリング、起動時検証
//! - **Orchestrator**: pack → resolve → レベルごとの並行 upload → 集計

pub mod builder;
pub mod orchestrator;

pub use self::builder::{BuildError, OrchestratorBuilder};
pub use self::orchestrator::Orchestrator;
