use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

/// Source of time for every time-driven component. Injected everywhere so
/// tests can warp the clock instead of sleeping for real.
#[async_trait]
pub trait Clock: Sync + Send + 'static {
    fn time(&self) -> DateTime<Utc>;

    /// Current UTC day. Record files and analytics are keyed by this.
    fn today(&self) -> NaiveDate {
        self.time().date_naive()
    }

    async fn sleep(&self, duration: Duration);
}

pub struct DefaultClock;

#[async_trait]
impl Clock for DefaultClock {
    fn time(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
