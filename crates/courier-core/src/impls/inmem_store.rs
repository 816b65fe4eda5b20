//! InMemoryObjectStore - 開発・テスト用のオブジェクトストア
//!
//! # 学習ポイント
//! - std Mutex でまとめて状態を守る（await をまたいで lock を保持しない）
//! - destination ごとの fault script で transient / permanent 失敗を再現
//! - 同時実行数の計測（worker_limit の検証用）

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{ContentHash, Destination};
use crate::ports::{Credential, ObjectMeta, ObjectStore, StoreError};

/// 次の put で発生させる失敗
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// 503 相当（transient）
    Unavailable,
    /// 429 相当（transient）
    Throttled,
    /// 403 相当（permanent）
    Unauthorized,
    /// 書き込みは成功するが中身が壊れる（検証で検出される）
    Corrupt,
}

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    meta: ObjectMeta,
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<String, StoredObject>,
    faults: HashMap<String, VecDeque<Fault>>,
    puts: usize,
    heads: usize,
    in_flight: usize,
    max_in_flight: usize,
}

/// InMemoryObjectStore はプロセス内のオブジェクトストア
///
/// # 使用例
/// ```ignore
/// let store = InMemoryObjectStore::new().with_accepted_credential("token");
/// store.script(&dest, [Fault::Unavailable, Fault::Unavailable]);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    state: Mutex<State>,
    /// None なら任意の credential を受け付ける
    accepted: Option<HashSet<String>>,
    put_delay: Option<Duration>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept the given secret (may be called several times).
    pub fn with_accepted_credential(mut self, secret: impl Into<String>) -> Self {
        self.accepted
            .get_or_insert_with(HashSet::new)
            .insert(secret.into());
        self
    }

    /// Hold every put for `delay` (for observing concurrency).
    pub fn with_put_delay(mut self, delay: Duration) -> Self {
        self.put_delay = Some(delay);
        self
    }

    /// Queue faults for the next puts to `destination`, consumed in order.
    pub fn script(&self, destination: &Destination, faults: impl IntoIterator<Item = Fault>) {
        self.lock()
            .faults
            .entry(destination.to_string())
            .or_default()
            .extend(faults);
    }

    /// Seed an object directly, bypassing faults and credentials.
    pub fn insert(&self, destination: &Destination, body: impl Into<Vec<u8>>) {
        let body = body.into();
        let meta = ObjectMeta {
            content_hash: ContentHash::compute(&body),
            size: body.len() as u64,
        };
        self.lock()
            .objects
            .insert(destination.to_string(), StoredObject { body, meta });
    }

    pub fn get(&self, destination: &Destination) -> Option<Vec<u8>> {
        self.lock()
            .objects
            .get(&destination.to_string())
            .map(|o| o.body.clone())
    }

    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    /// Successful and failed put calls.
    pub fn put_count(&self) -> usize {
        self.lock().puts
    }

    pub fn head_count(&self) -> usize {
        self.lock().heads
    }

    /// Highest number of puts observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }

    /// Puts currently in progress.
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn authorize(&self, destination: &Destination, credential: &Credential) -> Result<(), StoreError> {
        match &self.accepted {
            Some(accepted) if !accepted.contains(credential.expose()) => {
                Err(StoreError::Unauthorized(destination.bucket().to_string()))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn head(
        &self,
        destination: &Destination,
        credential: &Credential,
    ) -> Result<Option<ObjectMeta>, StoreError> {
        self.lock().heads += 1;
        self.authorize(destination, credential)?;
        Ok(self
            .lock()
            .objects
            .get(&destination.to_string())
            .map(|o| o.meta.clone()))
    }

    async fn put(
        &self,
        destination: &Destination,
        body: &[u8],
        meta: &ObjectMeta,
        credential: &Credential,
    ) -> Result<(), StoreError> {
        let key = destination.to_string();
        {
            let mut state = self.lock();
            state.puts += 1;
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
        }
        // future が途中で drop されても in_flight を戻す
        let _in_flight = InFlight(self);

        if let Some(delay) = self.put_delay {
            tokio::time::sleep(delay).await;
        }

        let result = self.authorize(destination, credential).and_then(|()| {
            let mut state = self.lock();
            let fault = state.faults.get_mut(&key).and_then(VecDeque::pop_front);
            match fault {
                Some(Fault::Unavailable) => Err(StoreError::Unavailable(format!(
                    "{} returned 503",
                    destination.bucket()
                ))),
                Some(Fault::Throttled) => Err(StoreError::Throttled(format!(
                    "{} returned 429",
                    destination.bucket()
                ))),
                Some(Fault::Unauthorized) => {
                    Err(StoreError::Unauthorized(destination.bucket().to_string()))
                }
                Some(Fault::Corrupt) => {
                    let body = body[..body.len() / 2].to_vec();
                    let meta = ObjectMeta {
                        content_hash: ContentHash::compute(&body),
                        size: body.len() as u64,
                    };
                    state.objects.insert(key.clone(), StoredObject { body, meta });
                    Ok(())
                }
                None => {
                    state.objects.insert(
                        key.clone(),
                        StoredObject {
                            body: body.to_vec(),
                            meta: meta.clone(),
                        },
                    );
                    Ok(())
                }
            }
        });

        result
    }
}

/// put 1 件分の in_flight カウント
struct InFlight<'a>(&'a InMemoryObjectStore);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.lock().in_flight -= 1;
    }
}
