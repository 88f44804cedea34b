//! Bridge from Postgres `LISTEN/NOTIFY` to a [`ChangeEvent`] bus.
//!
//! Triggers on `inventory_stock`, `product_catalog` and `recipe_ingredients`
//! are expected to `pg_notify('larder_changes', json)` with a payload of
//! `{"store_id": "<uuid>", "table": "<table name>"}`. Unknown tables and
//! malformed payloads are logged and skipped.

use std::sync::Arc;

use serde::Deserialize;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use larder_core::StoreId;
use larder_events::{ChangeEvent, ChangeSource, EventBus};

use super::postgres::map_sqlx_error;
use crate::error::BackendError;

pub const CHANGE_CHANNEL: &str = "larder_changes";

#[derive(Debug, Deserialize)]
struct ChangePayload {
    store_id: StoreId,
    table: String,
}

/// Parse one notification payload. `None` for tables the engine does not track.
pub fn parse_payload(payload: &str) -> Result<Option<ChangeEvent>, serde_json::Error> {
    let payload: ChangePayload = serde_json::from_str(payload)?;
    Ok(ChangeSource::from_table(&payload.table).map(|source| ChangeEvent::now(payload.store_id, source)))
}

pub struct PgChangeFeed {
    listener: PgListener,
}

impl core::fmt::Debug for PgChangeFeed {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PgChangeFeed")
            .field("channel", &CHANGE_CHANNEL)
            .finish_non_exhaustive()
    }
}

impl PgChangeFeed {
    pub async fn connect(pool: &PgPool) -> Result<Self, BackendError> {
        let mut listener = PgListener::connect_with(pool)
            .await
            .map_err(|e| map_sqlx_error("listen", e))?;
        listener
            .listen(CHANGE_CHANNEL)
            .await
            .map_err(|e| map_sqlx_error("listen", e))?;
        info!(channel = CHANGE_CHANNEL, "listening for backend changes");
        Ok(Self { listener })
    }

    /// Forward notifications to `bus` until the connection fails for good.
    ///
    /// `PgListener` reconnects on its own; notifications sent while it was
    /// disconnected are lost, which only delays cache invalidation until TTL.
    pub fn spawn<B>(mut self, bus: Arc<B>) -> JoinHandle<()>
    where
        B: EventBus<ChangeEvent> + ?Sized + 'static,
    {
        tokio::spawn(async move {
            loop {
                let notification = match self.listener.recv().await {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(error = %e, "change feed stopped");
                        return;
                    }
                };

                match parse_payload(notification.payload()) {
                    Ok(Some(event)) => {
                        debug!(store_id = %event.store_id, source = ?event.source, "backend change");
                        if let Err(e) = bus.publish(event) {
                            warn!(error = ?e, "failed to publish change event");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, payload = notification.payload(), "malformed change payload"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tracked_tables() {
        let store = StoreId::new();
        let payload = format!(r#"{{"store_id":"{store}","table":"inventory_stock"}}"#);
        let event = parse_payload(&payload).unwrap().unwrap();
        assert_eq!(event.store_id, store);
        assert_eq!(event.source, ChangeSource::InventoryStock);
    }

    #[test]
    fn ignores_untracked_tables() {
        let payload = format!(r#"{{"store_id":"{}","table":"stores"}}"#, StoreId::new());
        assert!(parse_payload(&payload).unwrap().is_none());
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(parse_payload("not json").is_err());
    }
}
