//! Pessimistic row locks held for the lifetime of a unit of work.
//!
//! Callers acquire in the order user -> entry -> payout.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

use crate::domain::{EntryId, PayoutId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowKey {
    User(UserId),
    Entry(EntryId),
    Payout(PayoutId),
}

type Rows = Arc<Mutex<HashMap<RowKey, Arc<tokio::sync::Mutex<()>>>>>;

/// A row's slot lives only while some caller holds or waits on it.
#[derive(Debug, Default)]
pub struct RowLocks {
    rows: Rows,
}

/// Releases its row when dropped.
#[derive(Debug)]
pub struct RowGuard {
    key: RowKey,
    rows: Rows,
    guard: Option<OwnedMutexGuard<()>>,
}

impl RowGuard {
    pub fn key(&self) -> RowKey {
        self.key
    }
}

impl Drop for RowGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters clone the slot under this same map lock, so a count of one
        // means only the map still refers to it.
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        if rows.get(&self.key).is_some_and(|row| Arc::strong_count(row) == 1) {
            rows.remove(&self.key);
        }
    }
}

impl RowLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: RowKey) -> RowGuard {
        let row = {
            let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
            rows.entry(key).or_default().clone()
        };
        RowGuard {
            key,
            rows: Arc::clone(&self.rows),
            guard: Some(row.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn slots(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_row_is_exclusive() {
        let locks = Arc::new(RowLocks::new());
        let guard = locks.lock(RowKey::User(1.into())).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.lock(RowKey::User(1.into())).await.key() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        assert_eq!(contender.await.unwrap(), RowKey::User(1.into()));
    }

    #[tokio::test]
    async fn released_rows_are_evicted() {
        let locks = Arc::new(RowLocks::new());
        let guard = locks.lock(RowKey::Entry(1.into())).await;
        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.lock(RowKey::Entry(1.into())).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(guard);
        // Still wanted by the contender.
        assert_eq!(locks.slots(), 1);
        drop(contender.await.unwrap());
        assert_eq!(locks.slots(), 0);
    }

    #[tokio::test]
    async fn different_rows_do_not_block() {
        let locks = RowLocks::new();
        let _a = locks.lock(RowKey::User(1.into())).await;
        let _b = locks.lock(RowKey::User(2.into())).await;
        let _c = locks.lock(RowKey::Payout(1.into())).await;
    }
}
