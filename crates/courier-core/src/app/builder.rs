//! OrchestratorBuilder - Orchestrator の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - テストでは ports を差し替えるだけで済むようにする

use std::sync::Arc;

use crate::archive::Archiver;
use crate::config::DeployConfig;
use crate::domain::Target;
use crate::impls::EnvCredentialResolver;
use crate::plan::{ResolveError, TargetResolver, validate_targets};
use crate::ports::{
    Clock, CredentialResolver, IdGenerator, ObjectStore, Sleeper, SystemClock, TokioSleeper,
    UlidGenerator,
};
use crate::upload::{RetryPolicy, Uploader};

use super::orchestrator::Orchestrator;

/// OrchestratorBuilder は Orchestrator を構築
///
/// # 使用例
/// ```ignore
/// let orchestrator = OrchestratorBuilder::from_config(&config)
///     .store(Arc::new(LocalObjectStore::new("/srv/buckets")))
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - build() 時に target 定義全体（名前重複・未知の依存・循環）を検証
/// - branch pattern のコンパイルもここで行う
/// - store が無ければ BuildError
pub struct OrchestratorBuilder {
    targets: Vec<Target>,
    store: Option<Arc<dyn ObjectStore>>,
    credentials: Option<Arc<dyn CredentialResolver>>,
    clock: Option<Arc<dyn Clock>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    ids: Option<Arc<dyn IdGenerator>>,
    retry: RetryPolicy,
    worker_limit: usize,
    strict: bool,
}

/// BuildError は Orchestrator 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no object store configured")]
    MissingStore,

    #[error("worker_limit must be at least 1")]
    InvalidWorkerLimit,

    #[error("invalid retry policy: {0}")]
    InvalidRetryPolicy(String),

    #[error("invalid target configuration: {0}")]
    InvalidTargets(#[from] ResolveError),
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            targets: Vec::new(),
            store: None,
            credentials: None,
            clock: None,
            sleeper: None,
            ids: None,
            retry: RetryPolicy::default(),
            worker_limit: 4,
            strict: false,
        }
    }

    /// Targets, retry policy, worker limit, strictness and the env credential
    /// prefix from a loaded config.
    pub fn from_config(config: &DeployConfig) -> Self {
        let credentials = match &config.settings.credential_env_prefix {
            Some(prefix) => EnvCredentialResolver::with_prefix(prefix.clone()),
            None => EnvCredentialResolver::new(),
        };
        Self::new()
            .targets(config.targets.clone())
            .retry_policy(config.retry.policy())
            .worker_limit(config.settings.worker_limit)
            .strict(config.settings.strict)
            .credentials(Arc::new(credentials))
    }

    pub fn targets(mut self, targets: Vec<Target>) -> Self {
        self.targets = targets;
        self
    }

    pub fn store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn credentials(mut self, credentials: Arc<dyn CredentialResolver>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn worker_limit(mut self, worker_limit: usize) -> Self {
        self.worker_limit = worker_limit;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// 検証してから Orchestrator を生成
    ///
    /// # 検証
    /// - store が設定されているか
    /// - worker_limit >= 1、max_attempts >= 1、multiplier >= 1.0
    /// - target 定義が DAG になっているか
    pub fn build(self) -> Result<Orchestrator, BuildError> {
        let store = self.store.ok_or(BuildError::MissingStore)?;
        if self.worker_limit == 0 {
            return Err(BuildError::InvalidWorkerLimit);
        }
        if self.retry.max_attempts == 0 {
            return Err(BuildError::InvalidRetryPolicy(
                "max_attempts must be at least 1".into(),
            ));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(BuildError::InvalidRetryPolicy(format!(
                "multiplier must be >= 1.0, got {}",
                self.retry.multiplier
            )));
        }

        validate_targets(&self.targets)?;
        let resolver = TargetResolver::new(self.targets)?;

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids: Arc<dyn IdGenerator> = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));
        let credentials: Arc<dyn CredentialResolver> = self
            .credentials
            .unwrap_or_else(|| Arc::new(EnvCredentialResolver::new()));
        let sleeper: Arc<dyn Sleeper> = self.sleeper.unwrap_or_else(|| Arc::new(TokioSleeper));

        let uploader = Uploader::new(
            store,
            credentials,
            clock.clone(),
            sleeper,
            ids.clone(),
            self.retry,
        );

        Ok(Orchestrator {
            archiver: Archiver::new(clock.clone()),
            resolver,
            uploader: Arc::new(uploader),
            clock,
            ids,
            worker_limit: self.worker_limit,
            strict: self.strict,
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
