use crate::identity::AuthorId;
use crate::models::{ParagraphId, SelectionDescriptor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationType {
    Highlight,
    Note,
    Response,
}

impl AnnotationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationType::Highlight => "highlight",
            AnnotationType::Note => "note",
            AnnotationType::Response => "response",
        }
    }
}

impl fmt::Display for AnnotationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnnotationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "highlight" => Ok(AnnotationType::Highlight),
            "note" => Ok(AnnotationType::Note),
            "response" => Ok(AnnotationType::Response),
            other => Err(format!("Unsupported annotation type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    /// Newest first.
    #[default]
    Recent,
    /// Most liked first, ties broken by recency.
    Popular,
}

impl SortBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::Recent => "recent",
            SortBy::Popular => "popular",
        }
    }
}

/// Where an annotation attaches: character offsets into a paragraph's plain text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    pub paragraph_id: ParagraphId,
    pub start_offset: usize,
    pub end_offset: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub id: String,
    pub post_id: String,
    #[serde(rename = "type")]
    pub kind: AnnotationType,
    pub paragraph_id: ParagraphId,
    pub start_offset: usize,
    pub end_offset: usize,
    pub selected_text: String,
    pub author_id: AuthorId,
    pub author_name: String,
    #[serde(default)]
    pub author_image: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub parent_annotation_id: Option<String>,
    #[serde(default)]
    pub likes: u32,
    #[serde(default)]
    pub liked_by_user_ids: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

impl Annotation {
    pub fn body(&self) -> &str {
        self.content.as_deref().map(str::trim).unwrap_or("")
    }

    /// Plain highlights have no body; everything else renders as a clickable, badged mark.
    pub fn has_body(&self) -> bool {
        !self.body().is_empty()
    }

    pub fn is_public(&self) -> bool {
        self.kind != AnnotationType::Note
    }

    pub fn is_reply(&self) -> bool {
        self.parent_annotation_id.is_some()
    }

    pub fn anchor(&self) -> Anchor {
        Anchor {
            paragraph_id: self.paragraph_id.clone(),
            start_offset: self.start_offset,
            end_offset: self.end_offset,
        }
    }

    pub fn is_liked_by(&self, like_key: &str) -> bool {
        self.liked_by_user_ids.contains(like_key)
    }
}

/// A not-yet-persisted annotation, as originated by the toolbar or a compose box.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationDraft {
    pub kind: AnnotationType,
    pub anchor: Anchor,
    pub selected_text: String,
    pub content: Option<String>,
    pub parent_annotation_id: Option<String>,
}

impl AnnotationDraft {
    pub fn from_selection(kind: AnnotationType, selection: &SelectionDescriptor) -> Self {
        Self {
            kind,
            anchor: selection.anchor(),
            selected_text: selection.text.clone(),
            content: None,
            parent_annotation_id: None,
        }
    }

    /// A reply inherits the anchor of the thread it answers.
    pub fn reply_to(parent: &Annotation, content: &str) -> Self {
        Self {
            kind: AnnotationType::Response,
            anchor: parent.anchor(),
            selected_text: parent.selected_text.clone(),
            content: Some(content.to_string()),
            parent_annotation_id: Some(parent.id.clone()),
        }
    }

    pub fn with_content(mut self, content: &str) -> Self {
        self.content = Some(content.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeState {
    pub annotation_id: String,
    pub likes: u32,
    pub liked: bool,
}

/// Orders in place; ties fall back to recency and then id so the order is total.
pub fn sort_annotations(annotations: &mut [Annotation], sort_by: SortBy) {
    annotations.sort_by(|a, b| compare(a, b, sort_by));
}

fn compare(a: &Annotation, b: &Annotation, sort_by: SortBy) -> Ordering {
    let recency = b
        .created_at
        .cmp(&a.created_at)
        .then_with(|| a.id.cmp(&b.id));
    match sort_by {
        SortBy::Recent => recency,
        SortBy::Popular => b.likes.cmp(&a.likes).then(recency),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn annotation(id: &str, likes: u32, minute: u32) -> Annotation {
        Annotation {
            id: id.to_string(),
            post_id: "post-1".to_string(),
            kind: AnnotationType::Highlight,
            paragraph_id: ParagraphId::new("p-1"),
            start_offset: 0,
            end_offset: 5,
            selected_text: "Alpha".to_string(),
            author_id: AuthorId::Anonymous("anon-1".to_string()),
            author_name: "Reader".to_string(),
            author_image: None,
            content: None,
            parent_annotation_id: None,
            likes,
            liked_by_user_ids: BTreeSet::new(),
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 10, minute, 0).unwrap(),
        }
    }

    #[test]
    fn test_recent_sorts_newest_first() {
        let mut list = vec![annotation("a", 9, 1), annotation("b", 0, 3), annotation("c", 2, 2)];
        sort_annotations(&mut list, SortBy::Recent);
        let ids: Vec<_> = list.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_popular_breaks_ties_by_recency() {
        let mut list = vec![annotation("a", 2, 1), annotation("b", 5, 0), annotation("c", 2, 4)];
        sort_annotations(&mut list, SortBy::Popular);
        let ids: Vec<_> = list.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_whitespace_content_counts_as_no_body() {
        let mut item = annotation("a", 0, 0);
        item.content = Some("   ".to_string());
        assert!(!item.has_body());
        item.content = Some(" why? ".to_string());
        assert!(item.has_body());
        assert_eq!(item.body(), "why?");
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let mut item = annotation("a", 1, 0);
        item.kind = AnnotationType::Response;
        item.content = Some("Agreed".to_string());
        let json = serde_json::to_value(&item).unwrap();

        assert_eq!(json["type"], "response");
        assert_eq!(json["paragraphId"], "p-1");
        assert_eq!(json["startOffset"], 0);
        assert_eq!(json["authorId"]["kind"], "anonymous");

        let back: Annotation = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
    }
}
