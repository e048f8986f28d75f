use crate::anchor::{ParagraphIdentifier, PARAGRAPH_ATTR};
use crate::dom::{Document, NodeId};
use crate::error::{MarginError, Result};
use crate::models::Paragraph;
use regex::{Captures, Regex};
use std::fs;
use std::path::Path;

const INLINE_PATTERN: &str = concat!(
    r"(?P<img>!\[(?P<alt>[^\]]*)\]\((?P<src>[^)\s]+)\))",
    r"|(?P<link>\[(?P<label>[^\]]+)\]\((?P<href>[^)\s]+)\))",
    r"|`(?P<code>[^`]+)`",
    r"|\*\*(?P<strong>.+?)\*\*",
    r"|\*(?P<em>[^*\s][^*]*)\*",
    r"|\b_(?P<em_alt>[^_\s][^_]*)_\b",
);

const ORDERED_ITEM_PATTERN: &str = r"^\d{1,9}[.)]\s+";

/// Reads article markdown from disk.
pub struct MarkdownParser {
    file_path: String,
}

impl MarkdownParser {
    pub fn new(file_path: &str) -> Result<Self> {
        let path = Path::new(file_path);
        if !path.exists() {
            return Err(MarginError::NotFound(file_path.to_string()));
        }
        Ok(Self {
            file_path: file_path.to_string(),
        })
    }

    pub fn read(&self) -> Result<String> {
        Ok(fs::read_to_string(&self.file_path)?)
    }

    pub fn render(&self) -> Result<RenderedArticle> {
        render(&self.read()?)
    }
}

/// A freshly rendered article: its own document, the container holding the
/// blocks, and the identified paragraphs in document order.
#[derive(Debug)]
pub struct RenderedArticle {
    pub doc: Document,
    pub container: NodeId,
    pub title: Option<String>,
    pub paragraphs: Vec<Paragraph>,
}

#[derive(Debug, Clone, PartialEq)]
enum Block {
    Heading { level: usize, text: String },
    Paragraph(String),
    List { ordered: bool, items: Vec<String> },
    Quote(Vec<String>),
    Code { lang: Option<String>, text: String },
    Rule,
}

/// Markdown to element tree. Every paragraph and list item is tagged with its
/// content-derived id.
pub struct MarkdownRenderer {
    inline: Regex,
    ordered_item: Regex,
}

impl MarkdownRenderer {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| MarginError::Internal(format!("Invalid markdown pattern: {}", e)))
        };
        Ok(Self {
            inline: compile(INLINE_PATTERN)?,
            ordered_item: compile(ORDERED_ITEM_PATTERN)?,
        })
    }

    pub fn render(&self, markdown: &str) -> RenderedArticle {
        let mut doc = Document::new();
        let container = doc.create_element("article");
        let root = doc.root();
        doc.append_child(root, container);

        let blocks = self.parse_blocks(markdown);
        let title = blocks.iter().find_map(|block| match block {
            Block::Heading { level: 1, text } => Some(self.plain(text)),
            _ => None,
        });
        let paragraphs = self.build(&mut doc, container, &blocks);

        RenderedArticle {
            doc,
            container,
            title,
            paragraphs,
        }
    }

    /// Replaces `container`'s children with the rendered markdown. Listeners on
    /// the old children are dropped along with them.
    pub fn render_into(&self, doc: &mut Document, container: NodeId, markdown: &str) -> Vec<Paragraph> {
        doc.clear_children(container);
        let blocks = self.parse_blocks(markdown);
        self.build(doc, container, &blocks)
    }

    fn build(&self, doc: &mut Document, container: NodeId, blocks: &[Block]) -> Vec<Paragraph> {
        let mut identifier = ParagraphIdentifier::new();
        let mut tagged = Vec::new();

        for block in blocks {
            match block {
                Block::Heading { level, text } => {
                    let h = doc.create_element(&format!("h{}", level));
                    doc.append_child(container, h);
                    self.inline_into(doc, h, text);
                }
                Block::Paragraph(text) => {
                    let p = doc.create_element("p");
                    doc.append_child(container, p);
                    self.inline_into(doc, p, text);
                    tagged.push(p);
                }
                Block::List { ordered, items } => {
                    let list = doc.create_element(if *ordered { "ol" } else { "ul" });
                    doc.append_child(container, list);
                    for item in items {
                        let li = doc.create_element("li");
                        doc.append_child(list, li);
                        self.inline_into(doc, li, item);
                        tagged.push(li);
                    }
                }
                Block::Quote(paragraphs) => {
                    let quote = doc.create_element("blockquote");
                    doc.append_child(container, quote);
                    for text in paragraphs {
                        let p = doc.create_element("p");
                        doc.append_child(quote, p);
                        self.inline_into(doc, p, text);
                        tagged.push(p);
                    }
                }
                Block::Code { lang, text } => {
                    let pre = doc.create_element("pre");
                    let code = doc.create_element("code");
                    if let Some(lang) = lang {
                        doc.set_attr(code, "class", &format!("language-{}", lang));
                    }
                    let body = doc.create_text(text);
                    doc.append_child(container, pre);
                    doc.append_child(pre, code);
                    doc.append_child(code, body);
                }
                Block::Rule => {
                    let hr = doc.create_element("hr");
                    doc.append_child(container, hr);
                }
            }
        }

        doc.normalize(container);

        tagged
            .into_iter()
            .enumerate()
            .map(|(order_index, node)| {
                let text = doc.text_content(node);
                let id = identifier.next(&text);
                doc.set_attr(node, PARAGRAPH_ATTR, id.as_str());
                Paragraph {
                    id,
                    order_index,
                    text,
                }
            })
            .collect()
    }

    fn parse_blocks(&self, content: &str) -> Vec<Block> {
        let lines: Vec<&str> = content.lines().collect();
        let mut blocks = Vec::new();
        let mut i = 0;

        while i < lines.len() {
            let trimmed = lines[i].trim();

            if trimmed.is_empty() {
                i += 1;
                continue;
            }

            if let Some(info) = trimmed.strip_prefix("```") {
                let lang = Some(info.trim().to_string()).filter(|l| !l.is_empty());
                let mut body = Vec::new();
                i += 1;
                while i < lines.len() && !lines[i].trim().starts_with("```") {
                    body.push(lines[i]);
                    i += 1;
                }
                i += 1;
                blocks.push(Block::Code {
                    lang,
                    text: body.join("\n"),
                });
                continue;
            }

            if let Some((level, text)) = heading(trimmed) {
                blocks.push(Block::Heading {
                    level,
                    text: text.to_string(),
                });
                i += 1;
                continue;
            }

            if is_rule(trimmed) {
                blocks.push(Block::Rule);
                i += 1;
                continue;
            }

            if trimmed.starts_with('>') {
                let mut quoted = Vec::new();
                while i < lines.len() && lines[i].trim().starts_with('>') {
                    let line = lines[i].trim().trim_start_matches('>');
                    quoted.push(line.strip_prefix(' ').unwrap_or(line).to_string());
                    i += 1;
                }
                blocks.push(Block::Quote(split_paragraphs(&quoted)));
                continue;
            }

            if let Some(ordered) = self.list_marker(trimmed).map(|(ordered, _)| ordered) {
                let mut items: Vec<String> = Vec::new();
                while i < lines.len() {
                    let line = lines[i].trim();
                    if line.is_empty() {
                        break;
                    }
                    match self.list_marker(line) {
                        Some((kind, rest)) if kind == ordered => items.push(rest.to_string()),
                        Some(_) => break,
                        None => match items.last_mut() {
                            Some(last) => {
                                last.push(' ');
                                last.push_str(line);
                            }
                            None => break,
                        },
                    }
                    i += 1;
                }
                blocks.push(Block::List { ordered, items });
                continue;
            }

            let mut current = Vec::new();
            while i < lines.len() {
                let line = lines[i].trim();
                if line.is_empty() || (!current.is_empty() && self.starts_block(line)) {
                    break;
                }
                current.push(line.to_string());
                i += 1;
            }
            blocks.extend(split_paragraphs(&current).into_iter().map(Block::Paragraph));
        }

        blocks
    }

    fn starts_block(&self, line: &str) -> bool {
        line.starts_with("```")
            || line.starts_with('>')
            || heading(line).is_some()
            || is_rule(line)
            || self.list_marker(line).is_some()
    }

    /// `Some((ordered, rest))` when the line opens a list item.
    fn list_marker<'a>(&self, line: &'a str) -> Option<(bool, &'a str)> {
        for bullet in ["- ", "* ", "+ "] {
            if let Some(rest) = line.strip_prefix(bullet) {
                return Some((false, rest.trim()));
            }
        }
        self.ordered_item
            .find(line)
            .map(|m| (true, line[m.end()..].trim()))
    }

    fn inline_into(&self, doc: &mut Document, parent: NodeId, text: &str) {
        let mut cursor = 0;
        for caps in self.inline.captures_iter(text) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            if whole.start() > cursor {
                let t = doc.create_text(&text[cursor..whole.start()]);
                doc.append_child(parent, t);
            }
            self.inline_element(doc, parent, &caps);
            cursor = whole.end();
        }
        if cursor < text.len() {
            let t = doc.create_text(&text[cursor..]);
            doc.append_child(parent, t);
        }
    }

    fn inline_element(&self, doc: &mut Document, parent: NodeId, caps: &Captures<'_>) {
        let group = |name: &str| caps.name(name).map(|m| m.as_str());

        if caps.name("img").is_some() {
            let img = doc.create_element("img");
            doc.set_attr(img, "src", group("src").unwrap_or(""));
            doc.set_attr(img, "alt", group("alt").unwrap_or(""));
            doc.append_child(parent, img);
        } else if let (Some(label), Some(href)) = (group("label"), group("href")) {
            let a = doc.create_element("a");
            doc.set_attr(a, "href", href);
            doc.append_child(parent, a);
            self.inline_into(doc, a, label);
        } else if let Some(code) = group("code") {
            let el = doc.create_element("code");
            let t = doc.create_text(code);
            doc.append_child(parent, el);
            doc.append_child(el, t);
        } else if let Some(strong) = group("strong") {
            let el = doc.create_element("strong");
            doc.append_child(parent, el);
            self.inline_into(doc, el, strong);
        } else if let Some(em) = group("em").or_else(|| group("em_alt")) {
            let el = doc.create_element("em");
            doc.append_child(parent, el);
            self.inline_into(doc, el, em);
        }
    }

    /// Display text of inline markdown, as the renderer would flatten it.
    pub fn plain(&self, text: &str) -> String {
        let mut doc = Document::new();
        let root = doc.root();
        self.inline_into(&mut doc, root, text);
        doc.text_content(root)
    }
}

/// One-shot render with a fresh renderer.
pub fn render(markdown: &str) -> Result<RenderedArticle> {
    Ok(MarkdownRenderer::new()?.render(markdown))
}

fn heading(line: &str) -> Option<(usize, &str)> {
    let level = line.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &line[level..];
    if !rest.starts_with(' ') {
        return None;
    }
    let text = rest.trim().trim_end_matches('#').trim();
    (!text.is_empty()).then_some((level, text))
}

fn is_rule(line: &str) -> bool {
    let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
    compact.len() >= 3
        && ["-", "*", "_"]
            .iter()
            .any(|m| compact.chars().all(|c| c.to_string() == *m))
}

/// Blank-line separated runs of lines, soft breaks joined with a space.
fn split_paragraphs(lines: &[String]) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();

    for line in lines {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            if !current.trim().is_empty() {
                paragraphs.push(current.trim().to_string());
                current.clear();
            }
            continue;
        }

        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(trimmed);
    }

    if !current.trim().is_empty() {
        paragraphs.push(current.trim().to_string());
    }

    paragraphs
}
