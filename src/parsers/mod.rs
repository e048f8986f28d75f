mod markdown;

pub use markdown::{render, MarkdownParser, MarkdownRenderer, RenderedArticle};
