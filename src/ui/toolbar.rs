use crate::error::{MarginError, Result};
use crate::models::{Annotation, Rect, SelectionDescriptor};

/// Pixels between the selection's bottom edge and the toolbar.
pub const TOOLBAR_OFFSET: f64 = 10.0;
/// Horizontal room the toolbar needs before the viewport edge.
pub const TOOLBAR_WIDTH: f64 = 350.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolbarAction {
    Highlight,
    Respond,
    Note,
    Share,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Viewport {
    pub scroll_x: f64,
    pub scroll_y: f64,
    pub width: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub top: f64,
    pub left: f64,
}

/// Page coordinates for the toolbar under a selection rectangle.
pub fn place(rect: Rect, viewport: &Viewport) -> Position {
    Position {
        top: rect.bottom() + viewport.scroll_y + TOOLBAR_OFFSET,
        left: (rect.left + viewport.scroll_x)
            .min(viewport.width - TOOLBAR_WIDTH)
            .max(viewport.scroll_x),
    }
}

/// What a response compose box answers: a fresh selection or an existing thread.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseTarget {
    Selection(SelectionDescriptor),
    Thread(Box<Annotation>),
}

impl ResponseTarget {
    pub fn selected_text(&self) -> &str {
        match self {
            ResponseTarget::Selection(selection) => &selection.text,
            ResponseTarget::Thread(root) => &root.selected_text,
        }
    }

    pub fn thread_id(&self) -> Option<&str> {
        match self {
            ResponseTarget::Selection(_) => None,
            ResponseTarget::Thread(root) => Some(&root.id),
        }
    }
}

/// The floating surfaces over the article. At most one is open.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Overlay {
    #[default]
    Idle,
    /// Pointer is down; nothing to show yet.
    Selecting,
    Toolbar {
        selection: SelectionDescriptor,
        position: Position,
    },
    ComposeNote {
        selection: SelectionDescriptor,
    },
    ComposeResponse {
        target: ResponseTarget,
    },
}

impl Overlay {
    pub fn is_idle(&self) -> bool {
        matches!(self, Overlay::Idle)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Overlay::Idle => "idle",
            Overlay::Selecting => "selecting",
            Overlay::Toolbar { .. } => "toolbar",
            Overlay::ComposeNote { .. } => "compose-note",
            Overlay::ComposeResponse { .. } => "compose-response",
        }
    }

    pub fn begin_selecting(&mut self) {
        if matches!(self, Overlay::Idle | Overlay::Toolbar { .. }) {
            *self = Overlay::Selecting;
        }
    }

    /// Shows or hides the toolbar after a selection settles. Compose surfaces
    /// stay open while the reader selects elsewhere.
    pub fn selection_settled(&mut self, selection: Option<&SelectionDescriptor>, viewport: &Viewport) {
        if matches!(self, Overlay::ComposeNote { .. } | Overlay::ComposeResponse { .. }) {
            return;
        }
        *self = match selection {
            Some(selection) => Overlay::Toolbar {
                selection: selection.clone(),
                position: place(selection.screen_position, viewport),
            },
            None => Overlay::Idle,
        };
    }

    pub fn open_note(&mut self, selection: SelectionDescriptor) {
        *self = Overlay::ComposeNote { selection };
    }

    pub fn open_response(&mut self, target: ResponseTarget) {
        *self = Overlay::ComposeResponse { target };
    }

    pub fn close(&mut self) {
        *self = Overlay::Idle;
    }

    pub fn toolbar_selection(&self) -> Option<&SelectionDescriptor> {
        match self {
            Overlay::Toolbar { selection, .. } => Some(selection),
            _ => None,
        }
    }
}

/// Deep link that scrolls to and highlights `text` on the post page.
pub fn share_link(site_base_url: &str, post_id: &str, text: &str) -> String {
    format!(
        "{}/posts/{}#:~:text={}",
        site_base_url.trim_end_matches('/'),
        urlencoding::encode(post_id),
        urlencoding::encode(text.trim())
    )
}

pub trait Clipboard {
    fn write_text(&mut self, text: &str) -> Result<()>;
}

/// Keeps the last copied text in memory.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    pub contents: Option<String>,
}

impl Clipboard for MemoryClipboard {
    fn write_text(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Err(MarginError::InvalidArgument("Nothing to copy".to_string()));
        }
        self.contents = Some(text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParagraphId;

    fn selection() -> SelectionDescriptor {
        SelectionDescriptor {
            text: "quick brown".to_string(),
            paragraph_id: ParagraphId::new("p-1"),
            start_offset: 4,
            end_offset: 15,
            screen_position: Rect::new(100.0, 900.0, 80.0, 20.0),
        }
    }

    #[test]
    fn test_place_below_selection_and_inside_viewport() {
        let viewport = Viewport {
            scroll_x: 0.0,
            scroll_y: 500.0,
            width: 1024.0,
        };
        let position = place(Rect::new(100.0, 900.0, 80.0, 20.0), &viewport);
        assert_eq!(position.top, 630.0);
        assert_eq!(position.left, 674.0);

        let near_left = place(Rect::new(0.0, 40.0, 10.0, 10.0), &viewport);
        assert_eq!(near_left.left, 40.0);
    }

    #[test]
    fn test_place_never_starts_left_of_the_viewport() {
        let narrow = Viewport {
            scroll_x: 20.0,
            scroll_y: 0.0,
            width: 300.0,
        };
        let position = place(Rect::new(0.0, 120.0, 40.0, 10.0), &narrow);
        assert_eq!(position.left, 20.0);
    }

    #[test]
    fn test_only_one_surface_is_open() {
        let mut overlay = Overlay::default();
        overlay.begin_selecting();
        overlay.selection_settled(Some(&selection()), &Viewport::default());
        assert_eq!(overlay.name(), "toolbar");

        overlay.open_note(selection());
        assert!(overlay.toolbar_selection().is_none());

        overlay.selection_settled(None, &Viewport::default());
        assert_eq!(overlay.name(), "compose-note");

        overlay.open_response(ResponseTarget::Selection(selection()));
        assert_eq!(overlay.name(), "compose-response");
        overlay.close();
        assert!(overlay.is_idle());
    }

    #[test]
    fn test_collapsed_selection_hides_toolbar() {
        let mut overlay = Overlay::default();
        overlay.selection_settled(Some(&selection()), &Viewport::default());
        overlay.selection_settled(None, &Viewport::default());
        assert!(overlay.is_idle());
    }

    #[test]
    fn test_share_link_encodes_text_fragment() {
        assert_eq!(
            share_link("https://blog.example.com/", "post-1", " quick, brown & fox "),
            "https://blog.example.com/posts/post-1#:~:text=quick%2C%20brown%20%26%20fox"
        );
    }

    #[test]
    fn test_memory_clipboard() {
        let mut clipboard = MemoryClipboard::default();
        clipboard.write_text("hello").unwrap();
        assert_eq!(clipboard.contents.as_deref(), Some("hello"));
        assert!(clipboard.write_text("").is_err());
    }
}
