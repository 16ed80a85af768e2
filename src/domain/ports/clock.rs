//! Clock port.
//!
//! Breaker cooldowns and retry backoff read time through this trait so they
//! can be driven by a manual clock in tests.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}
