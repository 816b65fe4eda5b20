//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」を定義します。
//! ストレージ・シークレット・時刻といった外部要素はすべて trait 越しに扱い、
//! orchestrator と uploader は実装の詳細を知りません。

pub mod clock;
pub mod credentials;
pub mod id_generator;
pub mod object_store;

pub use self::clock::{Clock, FixedClock, RecordingSleeper, Sleeper, SystemClock, TokioSleeper};
pub use self::credentials::{Credential, CredentialError, CredentialResolver};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::object_store::{ObjectMeta, ObjectStore, StoreError};
