//! In-memory whitelist mirrored from the visitor store.
//!
//! A refresh scans the store into a new list and publishes it in one swap;
//! readers see either the old list or the new one, never a partial one.

use crate::doorbell::InFlight;
use porter_core::{scan_visitors, StorageError, Visitor, VisitorStore};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

const REFRESH_RETRY_DELAY: Duration = Duration::from_millis(25);

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("store: {0}")]
    Storage(#[from] StorageError),
    #[error("refresh task failed: {0}")]
    Task(String),
}

pub type VisitorList = Arc<[Visitor]>;

#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    Refreshed(VisitorList),
    /// Another refresh was running; this call did nothing.
    AlreadyRunning,
}

#[derive(Clone)]
pub struct WhitelistCache {
    store: Arc<dyn VisitorStore>,
    display_width: u32,
    refreshing: InFlight,
    visitors: Arc<watch::Sender<VisitorList>>,
}

impl WhitelistCache {
    /// An empty cache over `store`. Call [`refresh`](Self::refresh) to populate it.
    pub fn new(store: Arc<dyn VisitorStore>, display_width: u32) -> Self {
        let (tx, _) = watch::channel(VisitorList::from(Vec::new()));
        Self {
            store,
            display_width,
            refreshing: InFlight::default(),
            visitors: Arc::new(tx),
        }
    }

    /// Rebuild the list from the store.
    ///
    /// Returns [`RefreshOutcome::AlreadyRunning`] without touching the store
    /// if a refresh is in progress. On error the previous list stays published.
    /// The scan runs to completion and publishes even if the caller stops
    /// awaiting it.
    pub async fn refresh(&self) -> Result<RefreshOutcome, CacheError> {
        let Some(guard) = self.refreshing.try_begin() else {
            tracing::debug!("whitelist refresh already running");
            return Ok(RefreshOutcome::AlreadyRunning);
        };

        let store = Arc::clone(&self.store);
        let visitors = Arc::clone(&self.visitors);
        let width = self.display_width;
        let scanned = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let list: VisitorList = scan_visitors(store.as_ref(), width)?.into();
            visitors.send_replace(Arc::clone(&list));
            Ok::<_, StorageError>(list)
        })
        .await
        .map_err(|e| CacheError::Task(e.to_string()))?;

        match scanned {
            Ok(list) => {
                tracing::info!(visitors = list.len(), "whitelist refreshed");
                Ok(RefreshOutcome::Refreshed(list))
            }
            Err(e) => {
                tracing::warn!(error = %e, "whitelist refresh failed, keeping previous list");
                Err(e.into())
            }
        }
    }

    /// Refresh, waiting out a refresh that is already running.
    ///
    /// Used after the store changed, where a refresh that started earlier may
    /// have missed the change.
    pub async fn refresh_now(&self) -> Result<VisitorList, CacheError> {
        loop {
            match self.refresh().await? {
                RefreshOutcome::Refreshed(list) => return Ok(list),
                RefreshOutcome::AlreadyRunning => tokio::time::sleep(REFRESH_RETRY_DELAY).await,
            }
        }
    }

    pub fn visitors(&self) -> VisitorList {
        self.visitors.borrow().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.visitors.borrow().iter().map(|v| v.name.clone()).collect()
    }

    pub fn subscribe(&self) -> watch::Receiver<VisitorList> {
        self.visitors.subscribe()
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.is_busy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{jpeg, SlowStore};
    use porter_core::FolderStore;
    use std::sync::atomic::Ordering;

    fn folder_store() -> (tempfile::TempDir, Arc<FolderStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FolderStore::open(dir.path()).unwrap());
        (dir, store)
    }

    #[tokio::test]
    async fn test_refresh_populates() {
        let (_dir, store) = folder_store();
        store.create_visitor("Alice").unwrap();
        store.create_visitor("Bob").unwrap();
        std::fs::write(store.root().join("Bob").join("img1.jpg"), jpeg(20, 10)).unwrap();
        std::fs::write(store.root().join("Bob").join("img2.jpg"), jpeg(20, 10)).unwrap();

        let cache = WhitelistCache::new(store, 40);
        assert!(cache.visitors().is_empty());

        let RefreshOutcome::Refreshed(list) = cache.refresh().await.unwrap() else {
            panic!("expected a refresh");
        };
        assert_eq!(list.len(), 2);
        assert_eq!(cache.names(), vec!["Alice", "Bob"]);
        assert!(cache.visitors()[0].thumbnail.is_none());
        let bob_thumb = cache.visitors()[1].thumbnail.clone().unwrap();
        assert!(bob_thumb.source.ends_with("img1.jpg"));
        assert!(!cache.is_refreshing());
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let (_dir, store) = folder_store();
        store.create_visitor("Alice").unwrap();
        std::fs::write(store.root().join("Alice").join("a.jpg"), jpeg(8, 8)).unwrap();

        let cache = WhitelistCache::new(store, 16);
        let first = cache.refresh_now().await.unwrap();
        let second = cache.refresh_now().await.unwrap();
        assert_eq!(&*first, &*second);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_active_scan() {
        let (_dir, inner) = folder_store();
        inner.create_visitor("Alice").unwrap();
        let store = Arc::new(SlowStore::new(inner, Duration::from_millis(150)));
        let cache = WhitelistCache::new(store.clone(), 16);

        let calls: Vec<_> = (0..6)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.refresh().await.unwrap() })
            })
            .collect();

        let mut refreshed = 0;
        let mut skipped = 0;
        for call in calls {
            match call.await.unwrap() {
                RefreshOutcome::Refreshed(_) => refreshed += 1,
                RefreshOutcome::AlreadyRunning => skipped += 1,
            }
        }
        assert_eq!(refreshed, 1);
        assert_eq!(skipped, 5);
        assert_eq!(store.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(store.scans.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_no_flash_to_empty() {
        let (_dir, inner) = folder_store();
        inner.create_visitor("Alice").unwrap();
        let store = Arc::new(SlowStore::new(inner.clone(), Duration::from_millis(0)));
        let cache = WhitelistCache::new(store.clone(), 16);
        cache.refresh_now().await.unwrap();

        inner.create_visitor("Bob").unwrap();
        store.set_delay(Duration::from_millis(150));
        let running = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.refresh().await })
        };

        let mut rx = cache.subscribe();
        let mut seen = vec![cache.visitors().len()];
        while !running.is_finished() {
            seen.push(cache.visitors().len());
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        running.await.unwrap().unwrap();
        seen.push(cache.visitors().len());

        assert!(seen.iter().all(|&n| n == 1 || n == 2), "observed {seen:?}");
        assert_eq!(*seen.last().unwrap(), 2);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_list() {
        let (_dir, store) = folder_store();
        store.create_visitor("Alice").unwrap();
        let cache = WhitelistCache::new(store.clone(), 16);
        cache.refresh_now().await.unwrap();

        std::fs::remove_dir_all(store.root()).unwrap();
        let err = cache.refresh().await.unwrap_err();
        assert!(matches!(err, CacheError::Storage(_)));
        assert_eq!(cache.names(), vec!["Alice"]);
        assert!(!cache.is_refreshing());
    }
}
