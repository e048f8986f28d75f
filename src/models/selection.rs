use crate::models::{Anchor, ParagraphId};
use serde::{Deserialize, Serialize};

/// Bounding rectangle in viewport coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(top: f64, left: f64, width: f64, height: f64) -> Self {
        Self {
            top,
            left,
            width,
            height,
        }
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }
}

/// A captured, paragraph-relative text selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionDescriptor {
    pub text: String,
    pub paragraph_id: ParagraphId,
    pub start_offset: usize,
    pub end_offset: usize,
    /// Only used to place the toolbar; never persisted.
    pub screen_position: Rect,
}

impl SelectionDescriptor {
    pub fn anchor(&self) -> Anchor {
        Anchor {
            paragraph_id: self.paragraph_id.clone(),
            start_offset: self.start_offset,
            end_offset: self.end_offset,
        }
    }
}
