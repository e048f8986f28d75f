use crate::dom::{Document, NodeId};
use crate::models::Annotation;

/// A text node and the char range it covers within its block's plain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSegment {
    pub node: NodeId,
    pub start: usize,
    pub end: usize,
}

impl TextSegment {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start < end && start < self.end
    }
}

/// A boundary point as reported by a native selection: a char offset for text
/// nodes, a child index for elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomPoint {
    pub node: NodeId,
    pub offset: usize,
}

impl DomPoint {
    pub fn new(node: NodeId, offset: usize) -> Self {
        Self { node, offset }
    }
}

/// Walks a block's text nodes in document order with running offsets.
pub fn text_segments(doc: &Document, block: NodeId) -> Vec<TextSegment> {
    let mut offset = 0;
    doc.text_nodes(block)
        .into_iter()
        .map(|node| {
            let len = doc.text(node).map(|t| t.chars().count()).unwrap_or(0);
            let segment = TextSegment {
                node,
                start: offset,
                end: offset + len,
            };
            offset += len;
            segment
        })
        .collect()
}

/// Converts a node-relative boundary point into an offset into `block`'s plain
/// text. Returns `None` when the point is outside `block`.
pub fn point_offset(doc: &Document, block: NodeId, point: DomPoint) -> Option<usize> {
    if !doc.is_inclusive_ancestor(block, point.node) {
        return None;
    }

    if let Some(text) = doc.text(point.node) {
        let segment = text_segments(doc, block)
            .into_iter()
            .find(|s| s.node == point.node)?;
        return Some(segment.start + point.offset.min(text.chars().count()));
    }

    let before = if point.node == block {
        0
    } else {
        let order = doc.descendants(block);
        order
            .iter()
            .take_while(|n| **n != point.node)
            .filter_map(|n| doc.text(*n))
            .map(|t| t.chars().count())
            .sum()
    };

    let children = doc.children(point.node);
    let within: usize = children
        .iter()
        .take(point.offset.min(children.len()))
        .map(|c| doc.text_content(*c).chars().count())
        .sum();

    Some(before + within)
}

/// Resolves an annotation's stored offsets against the block's current text.
///
/// When the text at the stored offsets no longer matches `selectedText`, the
/// occurrence nearest the stored start is used instead; failing that the end is
/// clamped to the available length. `None` means nothing sensible is left to mark.
pub fn resolve_span(plain_text: &str, annotation: &Annotation) -> Option<(usize, usize)> {
    let len = plain_text.chars().count();
    let start = annotation.start_offset;
    let end = annotation.end_offset.min(len);
    let wanted = annotation.selected_text.as_str();

    if start < end && char_slice(plain_text, start, end) == wanted {
        return Some((start, end));
    }

    if !wanted.trim().is_empty() {
        if let Some(found) = nearest_occurrence(plain_text, wanted, start) {
            return Some((found, found + wanted.chars().count()));
        }
    }

    (start < end).then_some((start, end))
}

fn char_slice(text: &str, start: usize, end: usize) -> &str {
    let from = crate::dom::char_to_byte(text, start);
    let to = crate::dom::char_to_byte(text, end);
    &text[from..to]
}

fn nearest_occurrence(haystack: &str, needle: &str, near: usize) -> Option<usize> {
    haystack
        .match_indices(needle)
        .map(|(byte, _)| haystack[..byte].chars().count())
        .min_by_key(|pos| pos.abs_diff(near))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::AuthorId;
    use crate::models::{AnnotationType, ParagraphId};
    use chrono::Utc;

    /// `<p>The <strong>quick</strong> brown <em>fox</em></p>`
    fn formatted(doc: &mut Document) -> (NodeId, Vec<NodeId>) {
        let p = doc.create_element("p");
        let root = doc.root();
        doc.append_child(root, p);
        let the = doc.create_text("The ");
        let strong = doc.create_element("strong");
        let quick = doc.create_text("quick");
        let brown = doc.create_text(" brown ");
        let em = doc.create_element("em");
        let fox = doc.create_text("fox");
        doc.append_child(p, the);
        doc.append_child(p, strong);
        doc.append_child(strong, quick);
        doc.append_child(p, brown);
        doc.append_child(p, em);
        doc.append_child(em, fox);
        (p, vec![the, strong, quick, brown, em, fox])
    }

    fn span(start: usize, end: usize, text: &str) -> Annotation {
        Annotation {
            id: "a1".to_string(),
            post_id: "post".to_string(),
            kind: AnnotationType::Highlight,
            paragraph_id: ParagraphId::new("p-x"),
            start_offset: start,
            end_offset: end,
            selected_text: text.to_string(),
            author_id: AuthorId::Anonymous("anon".to_string()),
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
    fn test_segments_accumulate_across_inline_formatting() {
        let mut doc = Document::new();
        let (p, nodes) = formatted(&mut doc);
        let segments = text_segments(&doc, p);

        let ranges: Vec<_> = segments.iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(ranges, vec![(0, 4), (4, 9), (9, 16), (16, 19)]);
        assert_eq!(segments[1].node, nodes[2]);
    }

    #[test]
    fn test_text_point_is_made_paragraph_relative() {
        let mut doc = Document::new();
        let (p, nodes) = formatted(&mut doc);

        assert_eq!(point_offset(&doc, p, DomPoint::new(nodes[2], 0)), Some(4));
        assert_eq!(point_offset(&doc, p, DomPoint::new(nodes[5], 2)), Some(18));
        assert_eq!(point_offset(&doc, p, DomPoint::new(nodes[5], 99)), Some(19));
    }

    #[test]
    fn test_element_point_counts_preceding_children() {
        let mut doc = Document::new();
        let (p, nodes) = formatted(&mut doc);

        assert_eq!(point_offset(&doc, p, DomPoint::new(p, 2)), Some(9));
        assert_eq!(point_offset(&doc, p, DomPoint::new(nodes[4], 0)), Some(16));
        assert_eq!(point_offset(&doc, p, DomPoint::new(nodes[4], 1)), Some(19));
    }

    #[test]
    fn test_point_outside_block_is_rejected() {
        let mut doc = Document::new();
        let (p, _) = formatted(&mut doc);
        let other = doc.create_text("elsewhere");
        let root = doc.root();
        doc.append_child(root, other);

        assert_eq!(point_offset(&doc, p, DomPoint::new(other, 1)), None);
    }

    #[test]
    fn test_resolve_span_exact_match() {
        let text = "The quick brown fox";
        assert_eq!(resolve_span(text, &span(4, 9, "quick")), Some((4, 9)));
    }

    #[test]
    fn test_resolve_span_clamps_past_end() {
        let text = "The quick brown fox";
        assert_eq!(
            resolve_span(text, &span(10, 40, "brown fox jumped")),
            Some((10, 19))
        );
        assert_eq!(resolve_span(text, &span(25, 40, "gone")), None);
    }

    #[test]
    fn test_resolve_span_follows_drifted_text() {
        let text = "Intro. The quick brown fox";
        assert_eq!(resolve_span(text, &span(4, 9, "quick")), Some((11, 16)));
    }

    #[test]
    fn test_resolve_span_picks_nearest_occurrence() {
        let text = "echo one echo two echo";
        assert_eq!(resolve_span(text, &span(15, 19, "echo")), Some((18, 22)));
    }
}
