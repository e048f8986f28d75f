use crate::error::{MarginError, Result};
use crate::models::{Annotation, SortBy};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub post_id: String,
    pub sort_by: SortBy,
    pub parent_id: Option<String>,
    /// Whose view of the post this list is. Lists are filtered per reader, so
    /// readers never share an entry.
    pub viewer: String,
}

impl CacheKey {
    pub fn new(post_id: &str, sort_by: SortBy, parent_id: Option<&str>) -> Self {
        Self {
            post_id: post_id.to_string(),
            sort_by,
            parent_id: parent_id.map(str::to_string),
            viewer: String::new(),
        }
    }

    pub fn for_viewer(mut self, viewer: &str) -> Self {
        self.viewer = viewer.to_string();
        self
    }
}

/// Issued when a fetch starts; only a ticket from the current generation may
/// populate the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    key: CacheKey,
    generation: u64,
}

impl FetchTicket {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<CacheKey, Vec<Annotation>>,
    generations: HashMap<String, u64>,
}

impl Inner {
    fn generation(&self, post_id: &str) -> u64 {
        self.generations.get(post_id).copied().unwrap_or(0)
    }
}

/// Annotation lists keyed by (post, sort, thread, viewer). Shared by everything that
/// reads annotations for a post.
#[derive(Debug, Default)]
pub struct QueryCache {
    inner: Mutex<Inner>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| MarginError::Internal("Query cache lock poisoned".to_string()))
    }

    pub fn get(&self, key: &CacheKey) -> Result<Option<Vec<Annotation>>> {
        Ok(self.lock()?.entries.get(key).cloned())
    }

    pub fn begin(&self, key: &CacheKey) -> Result<FetchTicket> {
        let inner = self.lock()?;
        Ok(FetchTicket {
            key: key.clone(),
            generation: inner.generation(&key.post_id),
        })
    }

    /// Stores a fetched list unless the post was invalidated since `ticket` was
    /// issued. Returns whether the list was stored.
    pub fn complete(&self, ticket: FetchTicket, annotations: Vec<Annotation>) -> Result<bool> {
        let mut inner = self.lock()?;
        if inner.generation(&ticket.key.post_id) != ticket.generation {
            debug!("Dropping stale list for post {}", ticket.key.post_id);
            return Ok(false);
        }
        inner.entries.insert(ticket.key, annotations);
        Ok(true)
    }

    /// Current invalidation generation of a post.
    pub fn generation(&self, post_id: &str) -> Result<u64> {
        Ok(self.lock()?.generation(post_id))
    }

    pub fn invalidate_post(&self, post_id: &str) -> Result<()> {
        let mut inner = self.lock()?;
        *inner.generations.entry(post_id.to_string()).or_insert(0) += 1;
        inner.entries.retain(|key, _| key.post_id != post_id);
        Ok(())
    }

    /// Invalidates every post whose cached lists mention `annotation_id`.
    /// Returns the affected post ids.
    pub fn invalidate_containing(&self, annotation_id: &str) -> Result<Vec<String>> {
        let posts: Vec<String> = {
            let inner = self.lock()?;
            let mut posts: Vec<String> = inner
                .entries
                .iter()
                .filter(|(_, list)| list.iter().any(|a| a.id == annotation_id))
                .map(|(key, _)| key.post_id.clone())
                .collect();
            posts.sort();
            posts.dedup();
            posts
        };
        for post in &posts {
            self.invalidate_post(post)?;
        }
        Ok(posts)
    }

    /// Any cached copy of an annotation.
    pub fn find(&self, annotation_id: &str) -> Result<Option<Annotation>> {
        let inner = self.lock()?;
        Ok(inner
            .entries
            .values()
            .flat_map(|list| list.iter())
            .find(|a| a.id == annotation_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::AuthorId;
    use crate::models::{AnnotationType, ParagraphId};
    use chrono::Utc;

    fn item(id: &str, post: &str) -> Annotation {
        Annotation {
            id: id.to_string(),
            post_id: post.to_string(),
            kind: AnnotationType::Highlight,
            paragraph_id: ParagraphId::new("p-1"),
            start_offset: 0,
            end_offset: 5,
            selected_text: "Alpha".to_string(),
            author_id: AuthorId::Anonymous("a".to_string()),
            author_name: "Reader".to_string(),
            author_image: None,
            content: None,
            parent_annotation_id: None,
            likes: 0,
            liked_by_user_ids: Default::default(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_complete_then_get() {
        let cache = QueryCache::new();
        let key = CacheKey::new("post-1", SortBy::Recent, None);
        let ticket = cache.begin(&key).unwrap();

        assert!(cache.complete(ticket, vec![item("a", "post-1")]).unwrap());
        assert_eq!(cache.get(&key).unwrap().unwrap().len(), 1);
        assert!(cache.get(&CacheKey::new("post-1", SortBy::Popular, None)).unwrap().is_none());
    }

    #[test]
    fn test_fetch_started_before_invalidation_is_discarded() {
        let cache = QueryCache::new();
        let key = CacheKey::new("post-1", SortBy::Recent, None);
        let stale = cache.begin(&key).unwrap();

        cache.invalidate_post("post-1").unwrap();
        assert!(!cache.complete(stale, vec![item("a", "post-1")]).unwrap());
        assert!(cache.get(&key).unwrap().is_none());

        let fresh = cache.begin(&key).unwrap();
        assert!(cache.complete(fresh, vec![]).unwrap());
    }

    #[test]
    fn test_viewers_do_not_share_entries() {
        let cache = QueryCache::new();
        let mine = CacheKey::new("post-1", SortBy::Recent, None).for_viewer("anon:x");
        let ticket = cache.begin(&mine).unwrap();
        cache.complete(ticket, vec![item("a", "post-1")]).unwrap();

        let theirs = CacheKey::new("post-1", SortBy::Recent, None).for_viewer("anon:y");
        assert!(cache.get(&theirs).unwrap().is_none());

        cache.invalidate_post("post-1").unwrap();
        assert!(cache.get(&mine).unwrap().is_none());
    }

    #[test]
    fn test_invalidate_containing_hits_only_owning_post() {
        let cache = QueryCache::new();
        for (post, id) in [("post-1", "a"), ("post-2", "b")] {
            let key = CacheKey::new(post, SortBy::Recent, None);
            let ticket = cache.begin(&key).unwrap();
            cache.complete(ticket, vec![item(id, post)]).unwrap();
        }

        assert_eq!(cache.invalidate_containing("b").unwrap(), vec!["post-2".to_string()]);
        assert!(cache.find("b").unwrap().is_none());
        assert!(cache.find("a").unwrap().is_some());
        assert_eq!(cache.generation("post-2").unwrap(), 1);
        assert_eq!(cache.generation("post-1").unwrap(), 0);
    }
}
