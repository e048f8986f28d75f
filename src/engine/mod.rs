//! Materializes annotation marks into rendered article content.
//!
//! Every pass is clear-then-reapply: previously injected marks are unwrapped, the
//! public annotations are bucketed by paragraph, each paragraph is located by its
//! identity attribute, stored offsets are resolved against the paragraph's current
//! plain text, and each resolved range is wrapped run by run. Paragraphs or ranges
//! that can no longer be found are skipped for this pass and reported, never
//! raised. Because the clear is total, applying the same inputs twice yields the
//! same markup.

pub mod schedule;

use crate::anchor::{resolve_span, text_segments, PARAGRAPH_ATTR};
use crate::dom::{Document, NodeId};
use crate::models::{Annotation, ParagraphId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;
use tracing::debug;

pub use schedule::{next_frame, ApplyKey, FrameScheduler, FRAME_INTERVAL};

pub const MARK_TAG: &str = "mark";
pub const MARK_ATTR: &str = "data-annotation-id";
pub const MARK_CLASS: &str = "inline-annotation";
pub const HIGHLIGHT_CLASS: &str = "inline-annotation--highlight";
pub const RESPONSE_CLASS: &str = "inline-annotation--response";
pub const REPLY_COUNT_ATTR: &str = "data-reply-count";
/// Transient class on marks whose panel entry was just activated. The next
/// pass drops it along with the marks.
pub const PULSE_CLASS: &str = "inline-annotation--pulse";

/// Called with the annotation id when one of its marks is clicked.
pub type ActivateHandler = Rc<dyn Fn(&str)>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    /// Marks removed by the clear pass.
    pub cleared: usize,
    /// Mark elements injected.
    pub marks: usize,
    /// Annotations that received at least one mark.
    pub placed: Vec<String>,
    /// Annotations whose whole range already sat inside earlier marks.
    pub covered: Vec<String>,
    /// Paragraph buckets with no tagged element in the current content.
    pub missing_paragraphs: Vec<ParagraphId>,
    /// Annotations whose range could not be resolved in a located paragraph.
    pub unresolved: Vec<String>,
    /// Private notes; listed in the side panel, never marked in the body.
    pub private_notes: Vec<String>,
}

/// Removes every injected mark under `root`, restoring the wrapped text.
/// Returns the number of marks removed.
pub fn clear(doc: &mut Document, root: NodeId) -> usize {
    let marks: Vec<NodeId> = doc
        .find_all_with_attr(root, MARK_ATTR)
        .into_iter()
        .filter(|n| doc.tag(*n) == Some(MARK_TAG) && doc.has_class(*n, MARK_CLASS))
        .collect();

    let mut touched = BTreeSet::new();
    let mut removed = 0;
    for mark in marks {
        if !doc.is_live(mark) {
            continue;
        }
        if let Some(parent) = doc.unwrap(mark) {
            touched.insert(parent);
            removed += 1;
        }
    }
    for parent in touched {
        if doc.is_live(parent) {
            doc.normalize(parent);
        }
    }
    removed
}

/// Clears and re-injects marks for `annotations` under `root`.
pub fn apply(
    doc: &mut Document,
    root: NodeId,
    annotations: &[Annotation],
    on_activate: ActivateHandler,
) -> ApplyReport {
    let mut report = ApplyReport {
        cleared: clear(doc, root),
        ..ApplyReport::default()
    };

    let mut reply_counts: HashMap<&str, usize> = HashMap::new();
    for reply in annotations.iter().filter(|a| a.is_public()) {
        if let Some(parent) = reply.parent_annotation_id.as_deref() {
            *reply_counts.entry(parent).or_default() += 1;
        }
    }

    let mut buckets: BTreeMap<&ParagraphId, Vec<&Annotation>> = BTreeMap::new();
    for annotation in annotations {
        if !annotation.is_public() {
            report.private_notes.push(annotation.id.clone());
        } else if !annotation.is_reply() {
            buckets
                .entry(&annotation.paragraph_id)
                .or_default()
                .push(annotation);
        }
    }

    for (paragraph_id, bucket) in buckets {
        let Some(block) = doc.find_by_attr(root, PARAGRAPH_ATTR, paragraph_id.as_str()) else {
            debug!(
                "Paragraph {} not in current content; skipping {} annotation(s)",
                paragraph_id,
                bucket.len()
            );
            report.missing_paragraphs.push(paragraph_id.clone());
            continue;
        };

        let plain_text = doc.text_content(block);
        let mut spans: Vec<(usize, usize, &Annotation)> = Vec::with_capacity(bucket.len());
        for annotation in bucket {
            match resolve_span(&plain_text, annotation) {
                Some((start, end)) => spans.push((start, end, annotation)),
                None => {
                    debug!("Annotation {} no longer resolves in {}", annotation.id, paragraph_id);
                    report.unresolved.push(annotation.id.clone());
                }
            }
        }

        // Outer spans first so inner ones land beside them rather than inside.
        spans.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| (b.1 - b.0).cmp(&(a.1 - a.0)))
                .then_with(|| a.2.created_at.cmp(&b.2.created_at))
                .then_with(|| a.2.id.cmp(&b.2.id))
        });

        for (start, end, annotation) in spans {
            let replies = reply_counts.get(annotation.id.as_str()).copied().unwrap_or(0);
            let injected = wrap_range(doc, block, start, end, annotation, replies, &on_activate);
            if injected == 0 {
                report.covered.push(annotation.id.clone());
            } else {
                report.marks += injected;
                report.placed.push(annotation.id.clone());
            }
        }
    }

    debug!(
        "Applied {} mark(s) for {} annotation(s); {} paragraph(s) missing",
        report.marks,
        report.placed.len(),
        report.missing_paragraphs.len()
    );
    report
}

/// All mark elements currently carrying `annotation_id`.
pub fn marks_for(doc: &Document, root: NodeId, annotation_id: &str) -> Vec<NodeId> {
    doc.find_all_with_attr(root, MARK_ATTR)
        .into_iter()
        .filter(|n| doc.attr(*n, MARK_ATTR) == Some(annotation_id))
        .collect()
}

/// Result of focusing a panel entry in the article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Focus {
    /// Block to scroll into view.
    pub paragraph: NodeId,
    pub pulsed: Vec<NodeId>,
}

/// Finds the paragraph for a panel entry and pulses its marks. With an
/// annotation id only that annotation's marks pulse.
pub fn focus(
    doc: &mut Document,
    root: NodeId,
    paragraph_id: &ParagraphId,
    annotation_id: Option<&str>,
) -> Option<Focus> {
    let paragraph = doc.find_by_attr(root, PARAGRAPH_ATTR, paragraph_id.as_str())?;
    let pulsed = match annotation_id {
        Some(id) => marks_for(doc, paragraph, id),
        None => doc.find_all_with_attr(paragraph, MARK_ATTR),
    };
    for mark in &pulsed {
        doc.add_class(*mark, PULSE_CLASS);
    }
    Some(Focus { paragraph, pulsed })
}

/// Wraps the not-yet-marked text runs of `[start, end)` inside `block`, one mark
/// per run. Returns the number of marks created.
fn wrap_range(
    doc: &mut Document,
    block: NodeId,
    start: usize,
    end: usize,
    annotation: &Annotation,
    replies: usize,
    on_activate: &ActivateHandler,
) -> usize {
    let runs: Vec<_> = text_segments(doc, block)
        .into_iter()
        .filter(|s| s.overlaps(start, end))
        .filter(|s| doc.closest_with_attr(s.node, MARK_ATTR, block).is_none())
        .collect();

    // Back to front so splitting one run never shifts another.
    for run in runs.iter().rev() {
        let local_start = start.saturating_sub(run.start);
        let local_end = end.min(run.end) - run.start;

        let mut target = run.node;
        if local_end < run.len() {
            doc.split_text(target, local_end);
        }
        if local_start > 0 {
            if let Some(tail) = doc.split_text(target, local_start) {
                target = tail;
            }
        }

        let mark = create_mark(doc, annotation, replies, on_activate);
        doc.wrap(target, mark);
    }
    runs.len()
}

fn create_mark(
    doc: &mut Document,
    annotation: &Annotation,
    replies: usize,
    on_activate: &ActivateHandler,
) -> NodeId {
    let mark = doc.create_element(MARK_TAG);
    doc.set_attr(mark, MARK_ATTR, &annotation.id);
    doc.add_class(mark, MARK_CLASS);
    if annotation.has_body() {
        doc.add_class(mark, RESPONSE_CLASS);
        doc.set_attr(mark, REPLY_COUNT_ATTR, &replies.to_string());
    } else {
        doc.add_class(mark, HIGHLIGHT_CLASS);
    }

    let id = annotation.id.clone();
    let handler = on_activate.clone();
    doc.add_click_listener(mark, Rc::new(move |_| handler(&id)));
    mark
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::identify;
    use crate::identity::AuthorId;
    use crate::models::AnnotationType;
    use chrono::{Duration, TimeZone, Utc};
    use std::cell::RefCell;

    struct Fixture {
        doc: Document,
        article: NodeId,
        paragraphs: Vec<NodeId>,
    }

    /// Each paragraph is a list of (tag, text) runs; tag "" means a bare text node.
    fn fixture(paragraphs: &[&[(&str, &str)]]) -> Fixture {
        let mut doc = Document::new();
        let article = doc.create_element("article");
        let body = doc.root();
        doc.append_child(body, article);

        let mut nodes = Vec::new();
        for (index, runs) in paragraphs.iter().enumerate() {
            let p = doc.create_element("p");
            doc.append_child(article, p);
            for (tag, text) in runs.iter() {
                let t = doc.create_text(text);
                if tag.is_empty() {
                    doc.append_child(p, t);
                } else {
                    let el = doc.create_element(tag);
                    doc.append_child(p, el);
                    doc.append_child(el, t);
                }
            }
            let id = identify(&doc.text_content(p), index);
            doc.set_attr(p, PARAGRAPH_ATTR, id.as_str());
            nodes.push(p);
        }
        Fixture {
            doc,
            article,
            paragraphs: nodes,
        }
    }

    fn annotation(
        id: &str,
        kind: AnnotationType,
        paragraph: &str,
        index: usize,
        range: (usize, usize),
        text: &str,
    ) -> Annotation {
        Annotation {
            id: id.to_string(),
            post_id: "post-1".to_string(),
            kind,
            paragraph_id: identify(paragraph, index),
            start_offset: range.0,
            end_offset: range.1,
            selected_text: text.to_string(),
            author_id: AuthorId::Anonymous("anon-1".to_string()),
            author_name: "Reader".to_string(),
            author_image: None,
            content: match kind {
                AnnotationType::Highlight => None,
                _ => Some("A thought".to_string()),
            },
            parent_annotation_id: None,
            likes: 0,
            liked_by_user_ids: Default::default(),
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
                + Duration::seconds(id.len() as i64),
        }
    }

    fn noop() -> ActivateHandler {
        Rc::new(|_| {})
    }

    fn mark_texts(doc: &Document, scope: NodeId) -> Vec<(String, String)> {
        doc.find_all_with_attr(scope, MARK_ATTR)
            .into_iter()
            .map(|m| {
                (
                    doc.attr(m, MARK_ATTR).unwrap_or("").to_string(),
                    doc.text_content(m),
                )
            })
            .collect()
    }

    #[test]
    fn test_wraps_exact_substring() {
        let text = "The quick brown fox";
        let mut f = fixture(&[&[("", text)]]);
        let a = annotation("a1", AnnotationType::Highlight, text, 0, (4, 9), "quick");

        let report = apply(&mut f.doc, f.article, &[a], noop());

        assert_eq!(report.marks, 1);
        assert_eq!(mark_texts(&f.doc, f.article), vec![("a1".into(), "quick".into())]);
        assert_eq!(f.doc.text_content(f.paragraphs[0]), text);
    }

    #[test]
    fn test_wraps_across_inline_formatting() {
        let text = "The quick brown fox";
        let mut f = fixture(&[&[("", "The qu"), ("strong", "ick br"), ("", "own fox")]]);
        let a = annotation("a1", AnnotationType::Highlight, text, 0, (4, 9), "quick");

        let report = apply(&mut f.doc, f.article, &[a], noop());

        let marks = mark_texts(&f.doc, f.article);
        assert_eq!(report.marks, 2);
        let joined: String = marks.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(joined, "quick");
        assert_eq!(
            f.doc.inner_html(f.paragraphs[0]),
            "The <mark class=\"inline-annotation inline-annotation--highlight\" data-annotation-id=\"a1\">qu</mark>\
             <strong><mark class=\"inline-annotation inline-annotation--highlight\" data-annotation-id=\"a1\">ick</mark> br</strong>own fox"
        );
    }

    #[test]
    fn test_disjoint_annotations_get_separate_marks() {
        let text = "Alpha beta gamma delta";
        let mut f = fixture(&[&[("", text)]]);
        let a = annotation("a", AnnotationType::Highlight, text, 0, (0, 5), "Alpha");
        let b = annotation("bb", AnnotationType::Highlight, text, 0, (11, 16), "gamma");

        apply(&mut f.doc, f.article, &[b, a], noop());

        let marks = f.doc.find_all_with_attr(f.article, MARK_ATTR);
        assert_eq!(marks.len(), 2);
        assert!(!f.doc.is_inclusive_ancestor(marks[0], marks[1]));
        assert!(!f.doc.is_inclusive_ancestor(marks[1], marks[0]));
        assert_eq!(
            mark_texts(&f.doc, f.article),
            vec![("a".into(), "Alpha".into()), ("bb".into(), "gamma".into())]
        );
        assert_eq!(f.doc.text_content(f.paragraphs[0]), text);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let text = "The quick brown fox";
        let mut f = fixture(&[&[("", "The "), ("em", "quick"), ("", " brown fox")]]);
        let list = vec![
            annotation("a1", AnnotationType::Highlight, text, 0, (4, 15), "quick brown"),
            annotation("r22", AnnotationType::Response, text, 0, (10, 19), "brown fox"),
        ];

        apply(&mut f.doc, f.article, &list, noop());
        let first = f.doc.to_html(f.article);
        let live = f.doc.live_count();
        let report = apply(&mut f.doc, f.article, &list, noop());

        assert_eq!(f.doc.to_html(f.article), first);
        assert_eq!(f.doc.live_count(), live);
        assert!(report.cleared > 0);
    }

    #[test]
    fn test_clear_restores_rendered_markup() {
        let text = "The quick brown fox";
        let mut f = fixture(&[&[("", "The "), ("em", "quick"), ("", " brown fox")]]);
        let pristine = f.doc.to_html(f.article);

        assert_eq!(clear(&mut f.doc, f.article), 0);
        let list = vec![annotation("a1", AnnotationType::Highlight, text, 0, (2, 12), "e quick br")];
        apply(&mut f.doc, f.article, &list, noop());
        assert_ne!(f.doc.to_html(f.article), pristine);

        clear(&mut f.doc, f.article);
        assert_eq!(f.doc.to_html(f.article), pristine);
    }

    #[test]
    fn test_end_past_length_is_clamped() {
        let text = "The quick brown fox";
        let mut f = fixture(&[&[("", text)]]);
        let a = annotation("a1", AnnotationType::Highlight, text, 0, (10, 60), "brown fox leaps high");

        let report = apply(&mut f.doc, f.article, &[a], noop());

        assert!(report.unresolved.is_empty());
        assert_eq!(mark_texts(&f.doc, f.article), vec![("a1".into(), "brown fox".into())]);
    }

    #[test]
    fn test_missing_paragraph_is_skipped_silently() {
        let mut f = fixture(&[&[("", "Still here")]]);
        let gone = annotation("a1", AnnotationType::Highlight, "Edited away", 0, (0, 6), "Edited");
        let kept = annotation("a2", AnnotationType::Highlight, "Still here", 0, (0, 5), "Still");

        let report = apply(&mut f.doc, f.article, &[gone.clone(), kept], noop());

        assert_eq!(report.missing_paragraphs, vec![gone.paragraph_id]);
        assert_eq!(report.placed, vec!["a2".to_string()]);
    }

    #[test]
    fn test_crossing_annotations_are_placed_adjacent() {
        let text = "one two three four";
        let mut f = fixture(&[&[("", text)]]);
        let outer = annotation("a", AnnotationType::Highlight, text, 0, (0, 7), "one two");
        let crossing = annotation("bb", AnnotationType::Highlight, text, 0, (4, 13), "two three");
        let inner = annotation("ccc", AnnotationType::Highlight, text, 0, (1, 3), "ne");

        let report = apply(&mut f.doc, f.article, &[crossing, inner, outer], noop());

        assert_eq!(
            mark_texts(&f.doc, f.article),
            vec![("a".into(), "one two".into()), ("bb".into(), " three".into())]
        );
        assert_eq!(report.covered, vec!["ccc".to_string()]);
        for mark in f.doc.find_all_with_attr(f.article, MARK_ATTR) {
            assert!(f.doc.find_all_with_attr(mark, MARK_ATTR).is_empty());
        }
    }

    #[test]
    fn test_two_paragraph_scenario_and_click() {
        let mut f = fixture(&[&[("", "Alpha beta")], &[("", "Gamma delta")]]);
        let highlight = annotation("h1", AnnotationType::Highlight, "Alpha beta", 0, (6, 10), "beta");
        let response = annotation("r1", AnnotationType::Response, "Gamma delta", 1, (0, 5), "Gamma");

        let clicked = Rc::new(RefCell::new(Vec::new()));
        let sink = clicked.clone();
        let handler: ActivateHandler = Rc::new(move |id| sink.borrow_mut().push(id.to_string()));
        apply(&mut f.doc, f.article, &[highlight, response], handler);

        let first = mark_texts(&f.doc, f.paragraphs[0]);
        let second = mark_texts(&f.doc, f.paragraphs[1]);
        assert_eq!(first, vec![("h1".into(), "beta".into())]);
        assert_eq!(second, vec![("r1".into(), "Gamma".into())]);

        let response_mark = marks_for(&f.doc, f.article, "r1")[0];
        assert!(f.doc.has_class(response_mark, RESPONSE_CLASS));
        let highlight_mark = marks_for(&f.doc, f.article, "h1")[0];
        assert!(f.doc.has_class(highlight_mark, HIGHLIGHT_CLASS));

        let text_inside = f.doc.children(response_mark)[0];
        f.doc.click(text_inside);
        assert_eq!(*clicked.borrow(), vec!["r1".to_string()]);
    }

    #[test]
    fn test_notes_and_replies_are_not_marked() {
        let text = "Alpha beta";
        let mut f = fixture(&[&[("", text)]]);
        let root = annotation("r1", AnnotationType::Response, text, 0, (0, 5), "Alpha");
        let mut reply = annotation("r2", AnnotationType::Response, text, 0, (0, 5), "Alpha");
        reply.parent_annotation_id = Some("r1".to_string());
        let note = annotation("n1", AnnotationType::Note, text, 0, (6, 10), "beta");

        let report = apply(&mut f.doc, f.article, &[root, reply, note], noop());

        assert_eq!(report.placed, vec!["r1".to_string()]);
        assert_eq!(report.private_notes, vec!["n1".to_string()]);
        let mark = marks_for(&f.doc, f.article, "r1")[0];
        assert_eq!(f.doc.attr(mark, REPLY_COUNT_ATTR), Some("1"));
        assert!(marks_for(&f.doc, f.article, "n1").is_empty());
    }

    #[test]
    fn test_clear_drops_mark_listeners() {
        let text = "Alpha beta";
        let mut f = fixture(&[&[("", text)]]);
        let clicks = Rc::new(RefCell::new(0));
        let sink = clicks.clone();
        let handler: ActivateHandler = Rc::new(move |_| *sink.borrow_mut() += 1);
        apply(
            &mut f.doc,
            f.article,
            &[annotation("h1", AnnotationType::Highlight, text, 0, (0, 5), "Alpha")],
            handler,
        );

        clear(&mut f.doc, f.article);
        let text_node = f.doc.children(f.paragraphs[0])[0];
        assert_eq!(f.doc.click(text_node), 0);
        assert_eq!(*clicks.borrow(), 0);
    }

    #[test]
    fn test_focus_pulses_until_next_pass() {
        let text = "Alpha beta gamma";
        let mut f = fixture(&[&[("", text)]]);
        let pid = identify(text, 0);
        let annotations = [
            annotation("h1", AnnotationType::Highlight, text, 0, (0, 5), "Alpha"),
            annotation("h2", AnnotationType::Highlight, text, 0, (11, 16), "gamma"),
        ];
        apply(&mut f.doc, f.article, &annotations, noop());

        let one = focus(&mut f.doc, f.article, &pid, Some("h2")).unwrap();
        assert_eq!(one.paragraph, f.paragraphs[0]);
        assert_eq!(one.pulsed.len(), 1);
        assert!(f.doc.has_class(one.pulsed[0], PULSE_CLASS));

        let all = focus(&mut f.doc, f.article, &pid, None).unwrap();
        assert_eq!(all.pulsed.len(), 2);
        assert!(focus(&mut f.doc, f.article, &ParagraphId::new("p-none"), None).is_none());

        apply(&mut f.doc, f.article, &annotations, noop());
        assert!(!f.doc.inner_html(f.article).contains(PULSE_CLASS));
    }
}
