use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use parley_db::Database;

use crate::blocking;

/// Persisted unread counters, one per (recipient, sender) pair.
///
/// Counts are only ever cleared by the recipient marking a thread read, so
/// they can run ahead of what the user has actually seen.
#[derive(Clone)]
pub struct NotificationCounter {
    db: Arc<Database>,
}

impl NotificationCounter {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Returns the counter's new value.
    pub async fn increment(&self, recipient: &str, sender: &str) -> Result<u64> {
        let (r, s) = (recipient.to_string(), sender.to_string());
        let count = blocking(&self.db, move |db| db.increment_unread(&r, &s)).await?;
        debug!("{} now has {} unread from {}", recipient, count, sender);
        Ok(to_count(count))
    }

    pub async fn reset(&self, recipient: &str, sender: &str) -> Result<()> {
        let (r, s) = (recipient.to_string(), sender.to_string());
        blocking(&self.db, move |db| db.reset_unread(&r, &s)).await
    }

    pub async fn unread(&self, recipient: &str, sender: &str) -> Result<u64> {
        let (r, s) = (recipient.to_string(), sender.to_string());
        let count = blocking(&self.db, move |db| db.get_unread(&r, &s)).await?;
        Ok(to_count(count))
    }

    /// All non-zero counters of `recipient`, keyed by sender.
    pub async fn unread_for(&self, recipient: &str) -> Result<BTreeMap<String, u64>> {
        let r = recipient.to_string();
        let rows = blocking(&self.db, move |db| db.get_unread_counts(&r)).await?;
        Ok(rows
            .into_iter()
            .map(|(sender, count)| (sender, to_count(count)))
            .collect())
    }
}

pub(crate) fn to_count(raw: i64) -> u64 {
    u64::try_from(raw).unwrap_or(0)
}
