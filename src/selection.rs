//! Turns the host's native text selection into a paragraph-relative descriptor.

use crate::anchor::{point_offset, DomPoint, PARAGRAPH_ATTR};
use crate::config::Config;
use crate::dom::{char_to_byte, Document, NodeId};
use crate::models::{ParagraphId, Rect, SelectionDescriptor};
use tracing::debug;

/// What the platform reports: the two boundary points in the order the reader
/// dragged them, plus the selection's bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NativeSelection {
    pub anchor: DomPoint,
    pub focus: DomPoint,
    pub rect: Rect,
}

impl NativeSelection {
    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.focus
    }
}

#[derive(Debug)]
pub struct SelectionCapture {
    current: Option<SelectionDescriptor>,
    /// A native selection the reader already acted on; ignored until it changes.
    suppressed: Option<NativeSelection>,
    min_chars: usize,
    max_chars: usize,
}

impl SelectionCapture {
    pub fn new(min_chars: usize, max_chars: usize) -> Self {
        Self {
            current: None,
            suppressed: None,
            min_chars,
            max_chars,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.min_selection_chars, config.max_selection_chars)
    }

    pub fn current(&self) -> Option<&SelectionDescriptor> {
        self.current.as_ref()
    }

    /// Re-reads the native selection after a pointer release. Returns the new
    /// descriptor, if the selection qualifies.
    pub fn observe(
        &mut self,
        doc: &Document,
        container: NodeId,
        native: Option<NativeSelection>,
    ) -> Option<&SelectionDescriptor> {
        self.current = None;

        let native = match native {
            Some(sel) if !sel.is_collapsed() => sel,
            _ => {
                self.suppressed = None;
                return None;
            }
        };
        if self.suppressed == Some(native) {
            return None;
        }
        self.suppressed = None;

        self.current = self.describe(doc, container, &native);
        self.current.as_ref()
    }

    /// Drops the current descriptor and keeps the still-present native selection
    /// from bringing it back.
    pub fn clear(&mut self, native: Option<NativeSelection>) {
        self.current = None;
        self.suppressed = native.filter(|sel| !sel.is_collapsed());
    }

    fn describe(
        &self,
        doc: &Document,
        container: NodeId,
        native: &NativeSelection,
    ) -> Option<SelectionDescriptor> {
        if !doc.is_inclusive_ancestor(container, native.anchor.node)
            || !doc.is_inclusive_ancestor(container, native.focus.node)
        {
            return None;
        }

        let block = doc.closest_with_attr(native.anchor.node, PARAGRAPH_ATTR, container)?;
        if block == container || !doc.is_inclusive_ancestor(block, native.focus.node) {
            debug!("Selection spans more than one paragraph; ignoring");
            return None;
        }
        let paragraph_id = ParagraphId::new(doc.attr(block, PARAGRAPH_ATTR)?);

        let a = point_offset(doc, block, native.anchor)?;
        let b = point_offset(doc, block, native.focus)?;
        let (start, end) = if a <= b { (a, b) } else { (b, a) };

        let plain = doc.text_content(block);
        let raw = &plain[char_to_byte(&plain, start)..char_to_byte(&plain, end)];
        let leading = raw.chars().take_while(|c| c.is_whitespace()).count();
        let text = raw.trim();
        let len = text.chars().count();

        if len < self.min_chars || len > self.max_chars {
            return None;
        }

        let start_offset = start + leading;
        Some(SelectionDescriptor {
            text: text.to_string(),
            paragraph_id,
            start_offset,
            end_offset: start_offset + len,
            screen_position: native.rect,
        })
    }
}

impl Default for SelectionCapture {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
