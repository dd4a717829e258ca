//! Stand-in handler that logs the event and sleeps.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::EventHandler;
use crate::model::ClaimedEvent;

#[derive(Debug, Clone, Copy)]
pub struct DelayHandler {
    delay: Duration,
}

impl DelayHandler {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for DelayHandler {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl EventHandler for DelayHandler {
    async fn handle(&self, event: &ClaimedEvent) -> anyhow::Result<()> {
        info!(
            id = %event.id,
            key = %event.idempotency_key,
            event_type = %event.event_type,
            payload = %event.payload,
            "processing event"
        );
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}
