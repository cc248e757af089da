//! External collaborators consumed by the store.

use async_trait::async_trait;
use tokio::time::Instant;

/// Monotonic time source for debounce scheduling.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep_until(&self, deadline: Instant);
}

/// [`Clock`] backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

/// Localization component notified when a slot is reset after corruption.
pub trait Localization: Send + Sync {
    fn set_language(&self, code: &str);
}

/// Localization that ignores language changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLocalization;

impl Localization for NoopLocalization {
    fn set_language(&self, _code: &str) {}
}
