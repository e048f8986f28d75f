//! Side panel: grouped annotation lists, threads, and the response compose box.

use crate::error::{MarginError, PermissionError, Result};
use crate::identity::Caller;
use crate::models::{
    sort_annotations, Annotation, AnnotationDraft, AnnotationType, Paragraph, ParagraphId, SortBy,
};
use crate::ui::toolbar::ResponseTarget;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Quote length in panel cards; the compose box uses the configured preview length.
pub const CARD_QUOTE_CHARS: usize = 80;

/// Cuts `text` to `max_chars` chars, marking the cut with `...`.
pub fn truncate_quote(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut)
}

#[derive(Debug, Clone, PartialEq)]
pub enum ListState {
    Loading,
    Ready(Vec<Annotation>),
    Failed { message: String },
}

impl ListState {
    pub fn annotations(&self) -> &[Annotation] {
        match self {
            ListState::Ready(list) => list,
            _ => &[],
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, ListState::Loading)
    }

    /// Failed loads show a retry affordance in place of the list.
    pub fn can_retry(&self) -> bool {
        matches!(self, ListState::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationCard {
    pub id: String,
    pub kind: AnnotationType,
    pub paragraph_id: ParagraphId,
    pub quote: String,
    pub author_name: String,
    pub author_image: Option<String>,
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub likes: u32,
    pub liked: bool,
    pub reply_count: usize,
    /// Like and delete controls; shown to the author and admins.
    pub show_actions: bool,
}

impl AnnotationCard {
    pub fn new(annotation: &Annotation, caller: &Caller, reply_count: usize, quote_chars: usize) -> Self {
        Self {
            id: annotation.id.clone(),
            kind: annotation.kind,
            paragraph_id: annotation.paragraph_id.clone(),
            quote: truncate_quote(&annotation.selected_text, quote_chars),
            author_name: annotation.author_name.clone(),
            author_image: annotation.author_image.clone(),
            body: Some(annotation.body().to_string()).filter(|b| !b.is_empty()),
            created_at: annotation.created_at,
            likes: annotation.likes,
            liked: annotation.is_liked_by(&caller.like_key()),
            reply_count,
            show_actions: caller.can_manage(annotation),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParagraphGroup {
    pub paragraph_id: ParagraphId,
    pub cards: Vec<AnnotationCard>,
}

/// Public threads grouped by paragraph, plus the reader's own notes.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelView {
    pub sort_by: SortBy,
    pub groups: Vec<ParagraphGroup>,
    pub notes: Vec<AnnotationCard>,
}

impl PanelView {
    /// Groups follow article order; paragraphs no longer in the article go last.
    pub fn build(
        annotations: &[Annotation],
        caller: &Caller,
        sort_by: SortBy,
        paragraphs: &[Paragraph],
    ) -> Self {
        let replies = reply_counts(annotations);
        let order: HashMap<&ParagraphId, usize> =
            paragraphs.iter().map(|p| (&p.id, p.order_index)).collect();

        let mut public: Vec<Annotation> = annotations
            .iter()
            .filter(|a| a.is_public() && !a.is_reply())
            .cloned()
            .collect();
        sort_annotations(&mut public, sort_by);

        let mut groups: Vec<ParagraphGroup> = Vec::new();
        for annotation in &public {
            let card = AnnotationCard::new(
                annotation,
                caller,
                replies.get(annotation.id.as_str()).copied().unwrap_or(0),
                CARD_QUOTE_CHARS,
            );
            match groups
                .iter_mut()
                .find(|g| g.paragraph_id == annotation.paragraph_id)
            {
                Some(group) => group.cards.push(card),
                None => groups.push(ParagraphGroup {
                    paragraph_id: annotation.paragraph_id.clone(),
                    cards: vec![card],
                }),
            }
        }
        groups.sort_by_key(|g| order.get(&g.paragraph_id).copied().unwrap_or(usize::MAX));

        let mut notes: Vec<Annotation> = annotations
            .iter()
            .filter(|a| !a.is_public() && caller.can_view(a))
            .cloned()
            .collect();
        sort_annotations(&mut notes, sort_by);

        Self {
            sort_by,
            groups,
            notes: notes
                .iter()
                .map(|n| AnnotationCard::new(n, caller, 0, CARD_QUOTE_CHARS))
                .collect(),
        }
    }

    pub fn total(&self) -> usize {
        self.groups.iter().map(|g| g.cards.len()).sum::<usize>() + self.notes.len()
    }
}

fn reply_counts(annotations: &[Annotation]) -> HashMap<&str, usize> {
    let mut counts = HashMap::new();
    for parent in annotations.iter().filter_map(|a| a.parent_annotation_id.as_deref()) {
        *counts.entry(parent).or_default() += 1;
    }
    counts
}

/// A top-level response and its flat list of replies, oldest reply first.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadView {
    pub root: AnnotationCard,
    pub replies: Vec<AnnotationCard>,
}

impl ThreadView {
    /// `None` when the root is gone; orphaned replies are not shown.
    pub fn build(root_id: &str, annotations: &[Annotation], caller: &Caller) -> Option<Self> {
        let root = annotations.iter().find(|a| a.id == root_id && !a.is_reply())?;
        let mut replies: Vec<&Annotation> = annotations
            .iter()
            .filter(|a| a.parent_annotation_id.as_deref() == Some(root_id))
            .filter(|a| caller.can_view(a))
            .collect();
        replies.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        Some(Self {
            root: AnnotationCard::new(root, caller, replies.len(), CARD_QUOTE_CHARS),
            replies: replies
                .into_iter()
                .map(|r| AnnotationCard::new(r, caller, 0, CARD_QUOTE_CHARS))
                .collect(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposeGate {
    /// Anonymous readers get a sign-in prompt instead of a form.
    SignInRequired,
    Ready { author_name: String },
}

/// The response compose box: quote, gate, body and (for threads) the replies.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposeView {
    pub target: ResponseTarget,
    pub quote: String,
    pub gate: ComposeGate,
    pub body: String,
    pub thread: Option<ThreadView>,
    max_content_chars: usize,
}

impl ComposeView {
    pub fn new(target: ResponseTarget, caller: &Caller, quote_chars: usize, max_content_chars: usize) -> Self {
        let gate = if caller.identity.is_verified() {
            ComposeGate::Ready {
                author_name: caller.identity.display_name(),
            }
        } else {
            ComposeGate::SignInRequired
        };
        Self {
            quote: truncate_quote(target.selected_text(), quote_chars),
            target,
            gate,
            body: String::new(),
            thread: None,
            max_content_chars,
        }
    }

    /// Attaches the existing replies when the box answers a thread.
    pub fn with_thread(mut self, annotations: &[Annotation], caller: &Caller) -> Self {
        self.thread = self
            .target
            .thread_id()
            .and_then(|id| ThreadView::build(id, annotations, caller));
        self
    }

    pub fn set_body(&mut self, body: &str) {
        self.body = body.to_string();
    }

    pub fn remaining_chars(&self) -> isize {
        self.max_content_chars as isize - self.body.trim().chars().count() as isize
    }

    /// The draft to submit, or why it cannot be submitted yet.
    pub fn draft(&self) -> Result<AnnotationDraft> {
        if self.gate == ComposeGate::SignInRequired {
            return Err(PermissionError::AuthenticationRequired.into());
        }
        let body = self.body.trim();
        if body.is_empty() {
            return Err(MarginError::InvalidArgument("Response cannot be empty".to_string()));
        }
        if self.remaining_chars() < 0 {
            return Err(MarginError::InvalidArgument(format!(
                "Responses are limited to {} characters",
                self.max_content_chars
            )));
        }

        Ok(match &self.target {
            ResponseTarget::Selection(selection) => {
                AnnotationDraft::from_selection(AnnotationType::Response, selection).with_content(body)
            }
            ResponseTarget::Thread(root) => AnnotationDraft::reply_to(root, body),
        })
    }
}
