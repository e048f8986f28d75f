//! Positions in article text that survive re-rendering.
//!
//! Blocks are identified by content (`paragraph`), and positions inside a block are
//! plain-text char offsets (`offsets`) rather than references to DOM nodes.

mod offsets;
mod paragraph;

pub use offsets::{point_offset, resolve_span, text_segments, DomPoint, TextSegment};
pub use paragraph::{identify, ParagraphIdentifier};

/// Attribute the renderer tags every paragraph and list item with.
pub const PARAGRAPH_ATTR: &str = "data-paragraph-id";
