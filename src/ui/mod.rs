//! Reader-facing surfaces: the selection toolbar, compose boxes, the side
//! panel, notifications, and the session that ties them to one article.

mod notify;
mod panel;
mod session;
mod toolbar;

pub use notify::{user_message, Notice, NoticeLevel, Notifier};
pub use panel::{
    truncate_quote, AnnotationCard, ComposeGate, ComposeView, ListState, PanelView, ParagraphGroup,
    ThreadView, CARD_QUOTE_CHARS,
};
pub use session::ArticleSession;
pub use toolbar::{
    place, share_link, Clipboard, MemoryClipboard, Overlay, Position, ResponseTarget,
    ToolbarAction, Viewport, TOOLBAR_OFFSET, TOOLBAR_WIDTH,
};
