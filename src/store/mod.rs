//! Persistence boundary for annotations.
//!
//! `AnnotationStore` is the thin async seam; `HttpAnnotationStore` speaks the blog
//! API and `LocalAnnotationStore` keeps the same rules in SQLite. Caching and
//! client-side gating live in `client` on top of either.

mod cache;
mod client;
mod http;
mod local;

pub use cache::{CacheKey, FetchTicket, QueryCache};
pub use client::AnnotationClient;
pub use http::HttpAnnotationStore;
pub use local::{CreateLimits, LocalAnnotationStore};

use crate::error::Result;
use crate::identity::Identity;
use crate::models::{Annotation, AnnotationDraft, AnnotationType, LikeState, ParagraphId, SortBy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Parameters of a list fetch. The identity decides which private notes come back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub post_id: String,
    pub identity: Identity,
    pub sort_by: SortBy,
    pub parent_id: Option<String>,
}

impl ListQuery {
    pub fn new(post_id: &str, identity: &Identity, sort_by: SortBy) -> Self {
        Self {
            post_id: post_id.to_string(),
            identity: identity.clone(),
            sort_by,
            parent_id: None,
        }
    }

    pub fn replies_to(mut self, parent_id: &str) -> Self {
        self.parent_id = Some(parent_id.to_string());
        self
    }
}

/// Body of `POST /posts/{postId}/annotations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    #[serde(rename = "type")]
    pub kind: AnnotationType,
    pub selected_text: String,
    pub paragraph_id: ParagraphId,
    pub start_offset: usize,
    pub end_offset: usize,
    pub author_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_email: Option<String>,
    pub anonymous_user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firebase_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_annotation_id: Option<String>,
}

impl CreateRequest {
    /// Shapes a draft for the wire, stamping author fields from `identity`.
    pub fn new(draft: &AnnotationDraft, identity: &Identity) -> Self {
        Self {
            kind: draft.kind,
            selected_text: draft.selected_text.trim().to_string(),
            paragraph_id: draft.anchor.paragraph_id.clone(),
            start_offset: draft.anchor.start_offset,
            end_offset: draft.anchor.end_offset,
            author_name: identity.display_name(),
            author_email: identity.email().map(str::to_string),
            anonymous_user_id: identity.anonymous_id().to_string(),
            firebase_user_id: identity.verified().map(|user| user.uid.clone()),
            author_image: identity.photo_url().map(str::to_string),
            content: draft
                .content
                .as_deref()
                .map(str::trim)
                .filter(|body| !body.is_empty())
                .map(str::to_string),
            parent_annotation_id: draft.parent_annotation_id.clone(),
        }
    }
}

#[async_trait]
pub trait AnnotationStore: Send + Sync {
    /// Annotations visible to `query.identity`, in `query.sort_by` order.
    async fn list(&self, query: &ListQuery) -> Result<Vec<Annotation>>;

    async fn create(&self, post_id: &str, request: &CreateRequest) -> Result<Annotation>;

    /// Puts the caller's like into the `liked` state; repeating a state changes nothing.
    async fn set_like(&self, annotation_id: &str, identity: &Identity, liked: bool)
        -> Result<LikeState>;

    async fn delete(&self, annotation_id: &str, identity: &Identity) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::VerifiedUser;
    use crate::models::{Rect, SelectionDescriptor};

    fn selection() -> SelectionDescriptor {
        SelectionDescriptor {
            text: "Gamma".to_string(),
            paragraph_id: ParagraphId::new("p-123"),
            start_offset: 0,
            end_offset: 5,
            screen_position: Rect::default(),
        }
    }

    #[test]
    fn test_create_request_for_anonymous_highlight_omits_optional_fields() {
        let draft = AnnotationDraft::from_selection(AnnotationType::Highlight, &selection());
        let request = CreateRequest::new(&draft, &Identity::Anonymous("anon-1".to_string()));
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["type"], "highlight");
        assert_eq!(json["anonymousUserId"], "anon-1");
        assert_eq!(json["authorName"], "Anonymous");
        assert!(json.get("firebaseUserId").is_none());
        assert!(json.get("content").is_none());
    }

    #[test]
    fn test_create_request_carries_verified_profile() {
        let identity = Identity::Verified {
            anonymous_id: "anon-2".to_string(),
            user: VerifiedUser {
                uid: "uid-9".to_string(),
                display_name: Some("Sam".to_string()),
                email: Some("sam@example.com".to_string()),
                photo_url: Some("https://img/sam.png".to_string()),
            },
        };
        let draft = AnnotationDraft::from_selection(AnnotationType::Response, &selection())
            .with_content("  Well put  ");
        let json = serde_json::to_value(CreateRequest::new(&draft, &identity)).unwrap();

        assert_eq!(json["firebaseUserId"], "uid-9");
        assert_eq!(json["authorEmail"], "sam@example.com");
        assert_eq!(json["authorImage"], "https://img/sam.png");
        assert_eq!(json["content"], "Well put");
        assert_eq!(json["paragraphId"], "p-123");
    }
}
