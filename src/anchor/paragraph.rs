use crate::models::ParagraphId;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

const DIGEST_HEX_CHARS: usize = 12;

/// Derives a block's identity from its displayed text.
///
/// Non-empty text hashes to the same id wherever the block sits, so inserting or
/// removing other paragraphs never reassigns it. Blocks without text (a lone
/// image) fall back to their position.
pub fn identify(plain_text: &str, index: usize) -> ParagraphId {
    let trimmed = plain_text.trim();
    if trimmed.is_empty() {
        return ParagraphId::new(format!("p-e{}", to_base36(index)));
    }

    let digest = format!("{:x}", Sha256::digest(trimmed.as_bytes()));
    ParagraphId::new(format!("p-{}", &digest[..DIGEST_HEX_CHARS]))
}

/// Issues ids for the blocks of one document, in traversal order.
///
/// The position only participates when a text repeats earlier in the same
/// document, as a tiebreaker for the later copies.
#[derive(Debug, Default)]
pub struct ParagraphIdentifier {
    next_index: usize,
    issued: HashSet<ParagraphId>,
}

impl ParagraphIdentifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, plain_text: &str) -> ParagraphId {
        let index = self.next_index;
        self.next_index += 1;

        let mut id = identify(plain_text, index);
        if self.issued.contains(&id) {
            id = ParagraphId::new(format!("{}-{}", id, to_base36(index)));
        }
        self.issued.insert(id.clone());
        id
    }

    pub fn count(&self) -> usize {
        self.next_index
    }
}

fn to_base36(mut value: usize) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[value % 36]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify_is_deterministic() {
        assert_eq!(identify("Alpha beta", 0), identify("Alpha beta", 0));
        assert_eq!(identify("  Alpha beta\n", 3), identify("Alpha beta", 3));
    }

    #[test]
    fn test_distinct_texts_get_distinct_ids() {
        let ids: HashSet<_> = (0..500)
            .map(|i| identify(&format!("Paragraph number {}", i), i))
            .collect();
        assert_eq!(ids.len(), 500);
    }

    #[test]
    fn test_id_is_attribute_safe() {
        let id = identify("Some \"quoted\" <text> & more", 7);
        assert!(id.as_str().starts_with("p-"));
        assert!(id
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-'));
    }

    #[test]
    fn test_empty_blocks_use_position() {
        assert_eq!(identify("", 0).as_str(), "p-e0");
        assert_eq!(identify("   ", 37).as_str(), "p-e11");
        assert_ne!(identify("", 1), identify("", 2));
    }

    #[test]
    fn test_inserting_earlier_paragraph_keeps_unique_ids() {
        let mut before = ParagraphIdentifier::new();
        let original: Vec<_> = ["Alpha beta", "Gamma delta"]
            .iter()
            .map(|t| before.next(t))
            .collect();

        let mut after = ParagraphIdentifier::new();
        let edited: Vec<_> = ["A brand new intro", "Alpha beta", "Gamma delta"]
            .iter()
            .map(|t| after.next(t))
            .collect();

        assert_eq!(original[0], edited[1]);
        assert_eq!(original[1], edited[2]);
    }

    #[test]
    fn test_repeated_text_is_disambiguated_by_position() {
        let mut identifier = ParagraphIdentifier::new();
        let first = identifier.next("Note:");
        let second = identifier.next("Note:");
        assert_ne!(first, second);
        assert!(second.as_str().starts_with(first.as_str()));
        assert_eq!(identifier.count(), 2);
    }
}
