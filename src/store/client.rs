use crate::error::{PermissionError, Result};
use crate::identity::Caller;
use crate::models::{sort_annotations, Annotation, AnnotationDraft, AnnotationType, LikeState, SortBy};
use crate::store::{AnnotationStore, CacheKey, CreateRequest, ListQuery, QueryCache};
use std::sync::Arc;
use tracing::{debug, info};

/// Store access for one reader: cached reads, gated mutations, and cache
/// invalidation after every successful mutation.
pub struct AnnotationClient {
    store: Arc<dyn AnnotationStore>,
    cache: Arc<QueryCache>,
    caller: Caller,
}

impl AnnotationClient {
    pub fn new(store: Arc<dyn AnnotationStore>, cache: Arc<QueryCache>, caller: Caller) -> Self {
        Self {
            store,
            cache,
            caller,
        }
    }

    pub fn caller(&self) -> &Caller {
        &self.caller
    }

    /// Swaps the reader (sign-in or sign-out). Cached lists were filtered for the
    /// previous reader, so the posts they cover are invalidated.
    pub fn set_caller(&mut self, caller: Caller, post_id: &str) -> Result<()> {
        self.caller = caller;
        self.cache.invalidate_post(post_id)
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Cache partition for this reader; admins see more than the same reader would otherwise.
    fn viewer(&self) -> String {
        if self.caller.is_admin {
            format!("{}+admin", self.caller.like_key())
        } else {
            self.caller.like_key()
        }
    }

    fn key(&self, post_id: &str, sort_by: SortBy, parent_id: Option<&str>) -> CacheKey {
        CacheKey::new(post_id, sort_by, parent_id).for_viewer(&self.viewer())
    }

    /// Every annotation on a post the reader may see, replies included.
    pub async fn list(&self, post_id: &str, sort_by: SortBy) -> Result<Vec<Annotation>> {
        self.fetch(self.key(post_id, sort_by, None), false).await
    }

    /// Bypasses the cache, e.g. to retry a failed load.
    pub async fn refresh(&self, post_id: &str, sort_by: SortBy) -> Result<Vec<Annotation>> {
        self.fetch(self.key(post_id, sort_by, None), true).await
    }

    pub async fn list_replies(&self, post_id: &str, parent_id: &str) -> Result<Vec<Annotation>> {
        self.fetch(self.key(post_id, SortBy::Recent, Some(parent_id)), false)
            .await
    }

    async fn fetch(&self, key: CacheKey, bypass: bool) -> Result<Vec<Annotation>> {
        if !bypass {
            if let Some(mut hit) = self.cache.get(&key)? {
                hit.retain(|a| self.caller.can_view(a));
                return Ok(hit);
            }
        }

        let ticket = self.cache.begin(&key)?;
        let mut query = ListQuery::new(&key.post_id, &self.caller.identity, key.sort_by);
        query.parent_id = key.parent_id.clone();

        let mut visible: Vec<Annotation> = self
            .store
            .list(&query)
            .await?
            .into_iter()
            .filter(|a| self.caller.can_view(a))
            .collect();
        sort_annotations(&mut visible, key.sort_by);

        debug!("Fetched {} annotation(s) for post {}", visible.len(), key.post_id);
        self.cache.complete(ticket, visible.clone())?;
        Ok(visible)
    }

    pub async fn create(&self, post_id: &str, draft: &AnnotationDraft) -> Result<Annotation> {
        if draft.kind == AnnotationType::Response && !self.caller.identity.is_verified() {
            return Err(PermissionError::AuthenticationRequired.into());
        }

        let request = CreateRequest::new(draft, &self.caller.identity);
        let created = self.store.create(post_id, &request).await?;
        self.cache.invalidate_post(post_id)?;

        info!("Created {} {}", created.kind, created.id);
        Ok(created)
    }

    /// Flips the reader's like based on the last known state of the record.
    /// Toggles issued before the first one lands read the same state and so
    /// request the same outcome.
    pub async fn toggle_like(&self, post_id: &str, annotation_id: &str) -> Result<LikeState> {
        let target = self.locate(post_id, annotation_id).await?;
        let like_key = self.caller.like_key();
        let liked = !target
            .as_ref()
            .map(|a| a.is_liked_by(&like_key))
            .unwrap_or(false);

        let state = self
            .store
            .set_like(annotation_id, &self.caller.identity, liked)
            .await?;
        self.cache.invalidate_post(post_id)?;
        self.cache.invalidate_containing(annotation_id)?;
        Ok(state)
    }

    pub async fn delete(&self, post_id: &str, annotation_id: &str) -> Result<()> {
        if let Some(target) = self.locate(post_id, annotation_id).await? {
            if !self.caller.can_manage(&target) {
                return Err(PermissionError::NotAuthor.into());
            }
        }

        self.store
            .delete(annotation_id, &self.caller.identity)
            .await?;
        self.cache.invalidate_post(post_id)?;
        self.cache.invalidate_containing(annotation_id)?;
        info!("Deleted annotation {}", annotation_id);
        Ok(())
    }

    /// The cached record, or the one from a fresh list when nothing is cached.
    async fn locate(&self, post_id: &str, annotation_id: &str) -> Result<Option<Annotation>> {
        if let Some(found) = self.cache.find(annotation_id)? {
            return Ok(Some(found));
        }
        Ok(self
            .list(post_id, SortBy::Recent)
            .await?
            .into_iter()
            .find(|a| a.id == annotation_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MarginError;
    use crate::identity::{AdminPolicy, Identity, VerifiedUser};
    use crate::models::{LikeState, ParagraphId, Rect, SelectionDescriptor};
    use crate::store::LocalAnnotationStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls that reach the store.
    struct Counting {
        inner: LocalAnnotationStore,
        lists: AtomicUsize,
        creates: AtomicUsize,
    }

    #[async_trait]
    impl AnnotationStore for Counting {
        async fn list(&self, query: &ListQuery) -> Result<Vec<Annotation>> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            self.inner.list(query).await
        }

        async fn create(&self, post_id: &str, request: &CreateRequest) -> Result<Annotation> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            self.inner.create(post_id, request).await
        }

        async fn set_like(
            &self,
            annotation_id: &str,
            identity: &Identity,
            liked: bool,
        ) -> Result<LikeState> {
            tokio::task::yield_now().await;
            self.inner.set_like(annotation_id, identity, liked).await
        }

        async fn delete(&self, annotation_id: &str, identity: &Identity) -> Result<()> {
            self.inner.delete(annotation_id, identity).await
        }
    }

    fn shared_store() -> Arc<Counting> {
        Arc::new(Counting {
            inner: LocalAnnotationStore::in_memory(AdminPolicy::default()).unwrap(),
            lists: AtomicUsize::new(0),
            creates: AtomicUsize::new(0),
        })
    }

    fn client(store: &Arc<Counting>, identity: Identity) -> AnnotationClient {
        let caller = AdminPolicy::default().caller(identity);
        AnnotationClient::new(store.clone(), Arc::new(QueryCache::new()), caller)
    }

    fn member(uid: &str) -> Identity {
        Identity::Verified {
            anonymous_id: format!("anon-{}", uid),
            user: VerifiedUser {
                uid: uid.to_string(),
                display_name: None,
                email: None,
                photo_url: None,
            },
        }
    }

    fn draft(kind: AnnotationType) -> AnnotationDraft {
        let selection = SelectionDescriptor {
            text: "Alpha beta".to_string(),
            paragraph_id: ParagraphId::new("p-alpha"),
            start_offset: 0,
            end_offset: 10,
            screen_position: Rect::default(),
        };
        let draft = AnnotationDraft::from_selection(kind, &selection);
        match kind {
            AnnotationType::Highlight => draft,
            _ => draft.with_content("A body"),
        }
    }

    #[tokio::test]
    async fn test_list_is_served_from_cache_until_mutation() {
        let store = shared_store();
        let reader = client(&store, Identity::Anonymous("x".to_string()));

        reader.list("post-1", SortBy::Recent).await.unwrap();
        reader.list("post-1", SortBy::Recent).await.unwrap();
        assert_eq!(store.lists.load(Ordering::SeqCst), 1);

        reader.create("post-1", &draft(AnnotationType::Highlight)).await.unwrap();
        let after = reader.list("post-1", SortBy::Recent).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(store.lists.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_anonymous_response_is_rejected_before_the_store() {
        let store = shared_store();
        let reader = client(&store, Identity::Anonymous("x".to_string()));

        let err = reader
            .create("post-1", &draft(AnnotationType::Response))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MarginError::Permission(PermissionError::AuthenticationRequired)
        ));
        assert_eq!(store.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_private_note_never_reaches_another_reader() {
        let store = shared_store();
        let author = client(&store, Identity::Anonymous("x".to_string()));
        let other = client(&store, Identity::Anonymous("y".to_string()));

        author.create("post-1", &draft(AnnotationType::Note)).await.unwrap();
        assert_eq!(author.list("post-1", SortBy::Recent).await.unwrap().len(), 1);
        assert!(other.list("post-1", SortBy::Recent).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shared_cache_keeps_notes_with_their_author() {
        let store = shared_store();
        let cache = Arc::new(QueryCache::new());
        let admins = AdminPolicy::default();
        let author = AnnotationClient::new(
            store.clone(),
            cache.clone(),
            admins.caller(Identity::Anonymous("x".to_string())),
        );
        let other = AnnotationClient::new(
            store.clone(),
            cache.clone(),
            admins.caller(Identity::Anonymous("y".to_string())),
        );

        author.create("post-1", &draft(AnnotationType::Note)).await.unwrap();
        assert_eq!(author.list("post-1", SortBy::Recent).await.unwrap().len(), 1);
        assert!(other.list("post-1", SortBy::Recent).await.unwrap().is_empty());
        // a list cached for the other reader must not hide the note from its author
        assert_eq!(author.list("post-1", SortBy::Recent).await.unwrap().len(), 1);
        assert_eq!(store.lists.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rapid_double_like_nets_one_like() {
        let store = shared_store();
        let author = client(&store, member("writer"));
        let target = author
            .create("post-1", &draft(AnnotationType::Highlight))
            .await
            .unwrap();

        let fan = client(&store, Identity::Anonymous("fan".to_string()));
        fan.list("post-1", SortBy::Recent).await.unwrap();
        let (first, second) = tokio::join!(
            fan.toggle_like("post-1", &target.id),
            fan.toggle_like("post-1", &target.id)
        );
        assert!(first.unwrap().liked);
        assert!(second.unwrap().liked);

        let reconciled = fan.list("post-1", SortBy::Recent).await.unwrap();
        assert_eq!(reconciled[0].likes, 1);
        assert!(reconciled[0].is_liked_by("anon:fan"));
    }

    #[tokio::test]
    async fn test_sequential_toggles_like_then_unlike() {
        let store = shared_store();
        let reader = client(&store, Identity::Anonymous("x".to_string()));
        let target = reader
            .create("post-1", &draft(AnnotationType::Highlight))
            .await
            .unwrap();

        assert!(reader.toggle_like("post-1", &target.id).await.unwrap().liked);
        let state = reader.toggle_like("post-1", &target.id).await.unwrap();
        assert!(!state.liked);
        assert_eq!(state.likes, 0);
    }

    #[tokio::test]
    async fn test_delete_by_other_reader_is_rejected_locally() {
        let store = shared_store();
        let author = client(&store, Identity::Anonymous("x".to_string()));
        let target = author
            .create("post-1", &draft(AnnotationType::Highlight))
            .await
            .unwrap();

        let other = client(&store, Identity::Anonymous("y".to_string()));
        let err = other.delete("post-1", &target.id).await.unwrap_err();
        assert!(matches!(err, MarginError::Permission(PermissionError::NotAuthor)));

        author.delete("post-1", &target.id).await.unwrap();
        assert!(author.list("post-1", SortBy::Recent).await.unwrap().is_empty());
    }
}
