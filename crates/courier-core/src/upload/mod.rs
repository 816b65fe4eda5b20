//! Upload with retry and idempotency.

pub mod retry;
pub mod uploader;

pub use retry::{RetryDecision, RetryPolicy, RetryState};
pub use uploader::{Delivery, Uploader};
