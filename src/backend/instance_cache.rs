use crate::backend::parse::InstanceMap;
use crate::domain::model::InstanceInfo;
use crate::domain::ports::InstanceSource;
use crate::utils::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheChanges {
    pub added: Vec<u32>,
    pub removed: Vec<u32>,
    pub modified: Vec<u32>,
}

impl CacheChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

#[derive(Default)]
struct Snapshot {
    instances: InstanceMap,
    refreshed_at: Option<Instant>,
}

/// Last known instance list with change notifications.
pub struct InstanceCache {
    snapshot: RwLock<Snapshot>,
    changes: broadcast::Sender<CacheChanges>,
}

impl InstanceCache {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(32);
        Self {
            snapshot: RwLock::new(Snapshot::default()),
            changes,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheChanges> {
        self.changes.subscribe()
    }

    pub async fn refresh<S: InstanceSource + ?Sized>(&self, source: &S) -> Result<CacheChanges> {
        let fresh = source.fetch_all().await?;

        let changes = {
            let mut snapshot = self.snapshot.write().await;
            let changes = diff(&snapshot.instances, &fresh);
            snapshot.instances = fresh;
            snapshot.refreshed_at = Some(Instant::now());
            changes
        };

        if !changes.is_empty() {
            tracing::debug!(
                "🔄 Instance changes: +{} -{} ~{}",
                changes.added.len(),
                changes.removed.len(),
                changes.modified.len()
            );
            // No subscribers is fine.
            let _ = self.changes.send(changes.clone());
        }

        Ok(changes)
    }

    pub async fn is_valid(&self, max_age: Duration) -> bool {
        self.snapshot
            .read()
            .await
            .refreshed_at
            .map(|at| at.elapsed() < max_age)
            .unwrap_or(false)
    }

    pub async fn get(&self, index: u32) -> Option<InstanceInfo> {
        self.snapshot.read().await.instances.get(&index).cloned()
    }

    pub async fn snapshot(&self) -> InstanceMap {
        self.snapshot.read().await.instances.clone()
    }

    pub async fn clear(&self) {
        *self.snapshot.write().await = Snapshot::default();
    }

    /// Cached list when fresh, else a refresh, else a direct fetch.
    pub async fn get_all_cached<S: InstanceSource + ?Sized>(
        &self,
        source: &S,
        max_age: Duration,
    ) -> Result<InstanceMap> {
        if self.is_valid(max_age).await {
            return Ok(self.snapshot().await);
        }

        match self.refresh(source).await {
            Ok(_) => Ok(self.snapshot().await),
            Err(e) => {
                tracing::warn!("⚠️ Cache refresh failed, fetching directly: {}", e);
                source.fetch_all().await
            }
        }
    }

    pub fn spawn_auto_refresh<S>(self: &Arc<Self>, source: Arc<S>, interval: Duration) -> JoinHandle<()>
    where
        S: InstanceSource + 'static,
    {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = cache.refresh(&*source).await {
                    tracing::warn!("⚠️ Auto refresh failed: {}", e);
                }
            }
        })
    }
}

impl Default for InstanceCache {
    fn default() -> Self {
        Self::new()
    }
}

fn diff(old: &InstanceMap, new: &InstanceMap) -> CacheChanges {
    let added = new.keys().filter(|k| !old.contains_key(k)).copied().collect();
    let removed = old.keys().filter(|k| !new.contains_key(k)).copied().collect();
    let modified = new
        .iter()
        .filter_map(|(index, info)| {
            old.get(index)
                .filter(|previous| previous.has_changed(info))
                .map(|_| *index)
        })
        .collect();

    CacheChanges {
        added,
        removed,
        modified,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(index: u32, status: &str) -> InstanceInfo {
        let mut info = InstanceInfo::new(index);
        info.status = Some(status.to_string());
        info
    }

    #[test]
    fn test_diff_reports_each_kind() {
        let old = InstanceMap::from([(0, instance(0, "stopped")), (1, instance(1, "running"))]);
        let new = InstanceMap::from([(1, instance(1, "stopped")), (2, instance(2, "running"))]);

        let changes = diff(&old, &new);
        assert_eq!(changes.added, vec![2]);
        assert_eq!(changes.removed, vec![0]);
        assert_eq!(changes.modified, vec![1]);
        assert!(diff(&new, &new).is_empty());
    }
}
