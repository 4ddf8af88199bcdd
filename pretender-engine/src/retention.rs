//! Background retention: the TTL expirer and the stream trimmer.
//!
//! Both loops run on their own tokio task, wake on an interval, and check
//! a shared stop signal between pages of work so shutdown is prompt. A
//! failure in one table is logged and must not stop the others.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use pretender_model::attr::{self, AttributeValue};
use pretender_model::table::TableMetadata;

use crate::config::Config;
use crate::error::Result;
use crate::item::ItemManager;
use crate::storage::{items, metadata, schema, streams, Storage};
use crate::table::TableManager;

/// Cadence and bounds for the two loops.
#[derive(Clone, Debug)]
pub struct RetentionConfig {
    pub ttl_interval: Duration,
    pub ttl_page_size: u32,
    pub trim_interval: Duration,
    pub retention: Duration,
}

impl From<&Config> for RetentionConfig {
    fn from(config: &Config) -> Self {
        RetentionConfig {
            ttl_interval: Duration::from_secs(config.ttl.interval_seconds),
            ttl_page_size: config.ttl.page_size,
            trim_interval: Duration::from_secs(config.stream.trim_interval_seconds),
            retention: Duration::from_secs(config.stream.retention_hours * 3600),
        }
    }
}

/// Handle over the running loops; dropping it does not stop them, call
/// [`RetentionHandle::shutdown`].
#[derive(Debug)]
pub struct RetentionHandle {
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RetentionHandle {
    /// Signal both loops and wait for them to finish their current page.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

pub(crate) fn spawn(
    storage: Arc<Storage>,
    tables: Arc<TableManager>,
    items: Arc<ItemManager>,
    config: RetentionConfig,
) -> RetentionHandle {
    let (stop, stop_rx) = watch::channel(false);

    let expirer = Expirer {
        storage: Arc::clone(&storage),
        tables: Arc::clone(&tables),
        items,
        page_size: config.ttl_page_size,
        stop: stop_rx.clone(),
    };
    let trimmer = Trimmer {
        storage,
        tables,
        retention: config.retention,
    };

    let ttl_task = tokio::spawn(run_loop(
        "ttl-expirer",
        config.ttl_interval,
        stop_rx.clone(),
        move || {
            let expirer = expirer.clone();
            async move { expirer.run_pass().await }
        },
    ));
    let trim_task = tokio::spawn(run_loop(
        "stream-trimmer",
        config.trim_interval,
        stop_rx,
        move || {
            let trimmer = trimmer.clone();
            async move { trimmer.run_pass().await }
        },
    ));

    RetentionHandle {
        stop,
        tasks: vec![ttl_task, trim_task],
    }
}

async fn run_loop<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
    mut pass: F,
) where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so a fresh engine does
    // not run a pass before any table exists.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = pass().await {
                    warn!(loop_name = name, error = %err, "retention pass failed");
                }
            }
            _ = stop.changed() => {
                debug!(loop_name = name, "retention loop stopping");
                return;
            }
        }
    }
}

#[derive(Clone)]
struct Expirer {
    storage: Arc<Storage>,
    tables: Arc<TableManager>,
    items: Arc<ItemManager>,
    page_size: u32,
    stop: watch::Receiver<bool>,
}

impl Expirer {
    async fn run_pass(&self) -> Result<()> {
        let now = Utc::now().timestamp();
        for meta in self.tables.all_metadata().await? {
            if !meta.ttl_enabled || meta.ttl_attribute.is_none() {
                continue;
            }
            if let Err(err) = self.expire_table(&meta, now).await {
                warn!(table = %meta.table_name, error = %err, "ttl expiry failed");
            }
        }
        Ok(())
    }

    async fn expire_table(&self, meta: &TableMetadata, now_epoch_seconds: i64) -> Result<()> {
        let relation = schema::item_table(&meta.table_name);
        let dialect = self.storage.dialect();
        let mut cursor: Option<(String, String)> = None;
        loop {
            if *self.stop.borrow() {
                return Ok(());
            }
            let mut conn = self.storage.acquire().await?;
            let rows = items::scan_page(
                &mut conn,
                dialect,
                &relation,
                cursor.as_ref().map(|(h, s)| (h.as_str(), s.as_str())),
                Some(self.page_size as i64),
            )
            .await?;
            drop(conn);
            let Some(last) = rows.last() else {
                return Ok(());
            };
            cursor = Some((last.hash_value.clone(), last.sort_value.clone()));

            for row in &rows {
                let item = attr::from_json(&row.attributes)?;
                if is_expired(&item, meta, now_epoch_seconds) {
                    let key = key_of(meta, &item);
                    if self.items.delete_expired(meta, key).await? {
                        debug!(table = %meta.table_name, hash = %row.hash_value, "expired item removed");
                    }
                }
            }
            if rows.len() < self.page_size as usize {
                return Ok(());
            }
        }
    }
}

/// An item is expired when its TTL attribute is present, of type N, and
/// not later than now. Missing, non-numeric, or future values keep the
/// item.
fn is_expired(item: &pretender_model::Item, meta: &TableMetadata, now_epoch_seconds: i64) -> bool {
    let Some(ttl_name) = &meta.ttl_attribute else {
        return false;
    };
    match item.get(ttl_name) {
        Some(AttributeValue::N(raw)) => match raw.parse::<f64>() {
            Ok(expiry) => expiry <= now_epoch_seconds as f64,
            Err(_) => false,
        },
        _ => false,
    }
}

fn key_of(meta: &TableMetadata, item: &pretender_model::Item) -> pretender_model::Item {
    let mut key = pretender_model::Item::new();
    if let Some(value) = item.get(&meta.hash_key) {
        key.insert(meta.hash_key.clone(), value.clone());
    }
    if let Some(name) = &meta.sort_key {
        if let Some(value) = item.get(name) {
            key.insert(name.clone(), value.clone());
        }
    }
    key
}

#[derive(Clone)]
struct Trimmer {
    storage: Arc<Storage>,
    tables: Arc<TableManager>,
    retention: Duration,
}

impl Trimmer {
    async fn run_pass(&self) -> Result<()> {
        let cutoff = Utc::now().timestamp_millis() - self.retention.as_millis() as i64;
        for meta in self.tables.all_metadata().await? {
            if !meta.stream_enabled {
                continue;
            }
            if let Err(err) = self.trim_table(&meta, cutoff).await {
                warn!(table = %meta.table_name, error = %err, "stream trim failed");
            }
        }
        Ok(())
    }

    async fn trim_table(&self, meta: &TableMetadata, cutoff_millis: i64) -> Result<()> {
        let dialect = self.storage.dialect();
        let mut conn = self.storage.acquire().await?;
        let removed = streams::trim_before(
            &mut conn,
            dialect,
            &schema::stream_table(&meta.table_name),
            cutoff_millis,
        )
        .await?;
        if removed > 0 {
            metadata::mark_trimmed(
                &mut conn,
                dialect,
                &meta.table_name,
                Utc::now().timestamp_millis(),
            )
            .await?;
            debug!(table = %meta.table_name, removed, "trimmed stream records");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretender_model::table::ScalarAttributeType;

    fn meta() -> TableMetadata {
        TableMetadata {
            table_name: "Sessions".into(),
            hash_key: "id".into(),
            hash_key_type: ScalarAttributeType::S,
            sort_key: None,
            sort_key_type: None,
            global_secondary_indexes: Vec::new(),
            ttl_attribute: Some("exp".into()),
            ttl_enabled: true,
            stream_enabled: false,
            stream_view_type: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn past_numeric_ttl_expires() {
        let mut item = pretender_model::Item::new();
        item.insert("exp".into(), AttributeValue::N("1000".into()));
        assert!(is_expired(&item, &meta(), 2000));
    }

    #[test]
    fn future_missing_or_non_numeric_ttl_is_retained() {
        let meta = meta();
        let mut item = pretender_model::Item::new();
        assert!(!is_expired(&item, &meta, 2000));

        item.insert("exp".into(), AttributeValue::N("3000".into()));
        assert!(!is_expired(&item, &meta, 2000));

        item.insert("exp".into(), AttributeValue::S("1000".into()));
        assert!(!is_expired(&item, &meta, 2000));
    }
}
