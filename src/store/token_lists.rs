//! Allow-list and block-list of pool ids
//!
//! Allow-listed pools are eligible for filtered alerting; block-listed pools
//! are excluded everywhere. Both are persisted on every change.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::JsonStore;
use crate::error::Result;

const LISTS_KEY: &str = "token_lists";

/// Which list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListKind {
    Allow,
    Block,
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListKind::Allow => write!(f, "allow"),
            ListKind::Block => write!(f, "block"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ListsDocument {
    #[serde(default)]
    allow: BTreeSet<String>,
    #[serde(default)]
    block: BTreeSet<String>,
}

impl ListsDocument {
    fn list_mut(&mut self, kind: ListKind) -> &mut BTreeSet<String> {
        match kind {
            ListKind::Allow => &mut self.allow,
            ListKind::Block => &mut self.block,
        }
    }

    fn list(&self, kind: ListKind) -> &BTreeSet<String> {
        match kind {
            ListKind::Allow => &self.allow,
            ListKind::Block => &self.block,
        }
    }
}

/// Persisted tracked-token lists
pub struct TokenLists {
    store: Option<Arc<JsonStore>>,
    lists: RwLock<ListsDocument>,
}

impl TokenLists {
    /// In-memory lists (nothing persisted)
    pub fn in_memory() -> Self {
        Self {
            store: None,
            lists: RwLock::new(ListsDocument::default()),
        }
    }

    /// Load lists from the store
    ///
    /// The configured pools only seed a store that has no lists yet; once
    /// saved, the persisted lists are authoritative and removals stick.
    pub async fn load(store: Arc<JsonStore>, seed_allow: &[String], seed_block: &[String]) -> Self {
        let seeded = || ListsDocument {
            allow: seed_allow.iter().cloned().collect(),
            block: seed_block.iter().cloned().collect(),
        };

        let doc = match store.load::<ListsDocument>(LISTS_KEY).await {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                let doc = seeded();
                info!(allow = doc.allow.len(), block = doc.block.len(), "Seeding token lists");
                store.save_logged(LISTS_KEY, &doc).await;
                doc
            }
            Err(e) => {
                warn!(error = %e, "Unreadable token lists, using configured pools");
                seeded()
            }
        };

        info!(
            allow = doc.allow.len(),
            block = doc.block.len(),
            "Loaded token lists"
        );

        Self {
            store: Some(store),
            lists: RwLock::new(doc),
        }
    }

    /// Add a pool; returns false if it was already listed
    pub async fn add(&self, kind: ListKind, pool_id: &str) -> Result<bool> {
        let mut lists = self.lists.write().await;
        let added = lists.list_mut(kind).insert(pool_id.to_string());
        if added {
            info!(list = %kind, pool = %pool_id, "Added pool to list");
            self.persist(&lists).await?;
        }
        Ok(added)
    }

    /// Remove a pool; returns false if it was not listed
    pub async fn remove(&self, kind: ListKind, pool_id: &str) -> Result<bool> {
        let mut lists = self.lists.write().await;
        let removed = lists.list_mut(kind).remove(pool_id);
        if removed {
            info!(list = %kind, pool = %pool_id, "Removed pool from list");
            self.persist(&lists).await?;
        }
        Ok(removed)
    }

    pub async fn contains(&self, kind: ListKind, pool_id: &str) -> bool {
        self.lists.read().await.list(kind).contains(pool_id)
    }

    pub async fn is_allowed(&self, pool_id: &str) -> bool {
        self.contains(ListKind::Allow, pool_id).await
    }

    pub async fn is_blocked(&self, pool_id: &str) -> bool {
        self.contains(ListKind::Block, pool_id).await
    }

    pub async fn list(&self, kind: ListKind) -> Vec<String> {
        self.lists.read().await.list(kind).iter().cloned().collect()
    }

    async fn persist(&self, lists: &ListsDocument) -> Result<()> {
        match &self.store {
            Some(store) => store.save(LISTS_KEY, lists).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_add_remove() {
        let lists = TokenLists::in_memory();

        assert!(lists.add(ListKind::Allow, "2jjj").await.unwrap());
        assert!(!lists.add(ListKind::Allow, "2jjj").await.unwrap());
        assert!(lists.is_allowed("2jjj").await);
        assert!(!lists.is_blocked("2jjj").await);

        assert!(lists.remove(ListKind::Allow, "2jjj").await.unwrap());
        assert!(!lists.remove(ListKind::Allow, "2jjj").await.unwrap());
        assert!(!lists.is_allowed("2jjj").await);
    }

    #[tokio::test]
    async fn test_lists_survive_reload() {
        let dir = tempdir().unwrap();
        let store = Arc::new(JsonStore::new(dir.path()));

        let lists = TokenLists::load(store.clone(), &[], &[]).await;
        lists.add(ListKind::Block, "scam").await.unwrap();
        lists.add(ListKind::Allow, "good").await.unwrap();

        // Seeds only apply to a store without lists
        let reloaded = TokenLists::load(store, &["seeded".to_string()], &[]).await;
        assert!(reloaded.is_blocked("scam").await);
        assert!(reloaded.is_allowed("good").await);
        assert!(!reloaded.is_allowed("seeded").await);
        assert_eq!(reloaded.list(ListKind::Allow).await, vec!["good"]);
    }

    #[tokio::test]
    async fn test_removed_seed_stays_removed_after_reload() {
        let dir = tempdir().unwrap();
        let store = Arc::new(JsonStore::new(dir.path()));
        let seed_block = vec!["rug".to_string()];

        let lists = TokenLists::load(store.clone(), &[], &seed_block).await;
        assert!(lists.is_blocked("rug").await);
        assert!(lists.remove(ListKind::Block, "rug").await.unwrap());

        let reloaded = TokenLists::load(store.clone(), &[], &seed_block).await;
        assert!(!reloaded.is_blocked("rug").await);

        // First load persisted the seed even without any later change
        let other = tempdir().unwrap();
        let fresh = Arc::new(JsonStore::new(other.path()));
        TokenLists::load(fresh.clone(), &["2jjj".to_string()], &[]).await;
        let stored: Option<ListsDocument> = fresh.load(LISTS_KEY).await.unwrap();
        assert!(stored.unwrap().allow.contains("2jjj"));
    }
}
