//! The document model shared by every direction of the synchronizer: an
//! ordered sequence of lines, each a paragraph or list-item carrying
//! bold-aware inline segments. Markdown is a canonical serialization of
//! this model; HTML parsing (see `super::html`) produces the same model.

use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub bold: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Paragraph,
    ListItem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    None,
    Unchecked,
    Checked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocLine {
    pub kind: LineKind,
    pub state: LineState,
    pub segments: Vec<Segment>,
}

pub type Doc = Vec<DocLine>;

pub(crate) fn push_segment(segments: &mut Vec<Segment>, text: String, bold: bool) {
    if text.is_empty() {
        return;
    }
    if let Some(last) = segments.last_mut() {
        if last.bold == bold {
            last.text.push_str(&text);
            return;
        }
    }
    segments.push(Segment { text, bold });
}

fn is_empty_paragraph(line: &DocLine) -> bool {
    line.kind == LineKind::Paragraph && line.segments.iter().all(|s| s.text.trim().is_empty())
}

/// Trims leading/trailing empty paragraphs and collapses interior runs of
/// empty paragraphs to at most one.
pub fn normalize(doc: Doc) -> Doc {
    let mut start = 0;
    while start < doc.len() && is_empty_paragraph(&doc[start]) {
        start += 1;
    }
    let mut end = doc.len();
    while end > start && is_empty_paragraph(&doc[end - 1]) {
        end -= 1;
    }

    let mut out = Vec::with_capacity(end - start);
    let mut prev_empty = false;
    for line in &doc[start..end] {
        let empty = is_empty_paragraph(line);
        if empty && prev_empty {
            continue;
        }
        out.push(line.clone());
        prev_empty = empty;
    }
    out
}

fn escape_md(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '*' => out.push_str("\\*"),
            _ => out.push(c),
        }
    }
    out
}

fn line_to_md(line: &DocLine) -> String {
    let prefix = match (line.kind, line.state) {
        (LineKind::ListItem, LineState::Checked) => "- [x] ",
        (LineKind::ListItem, LineState::Unchecked) => "- [ ] ",
        (LineKind::ListItem, LineState::None) => "- ",
        (LineKind::Paragraph, _) => "",
    };
    let body: String = line
        .segments
        .iter()
        .map(|s| {
            let escaped = escape_md(&s.text);
            if s.bold {
                format!("**{}**", escaped)
            } else {
                escaped
            }
        })
        .collect();
    format!("{}{}", prefix, body)
}

/// Canonical markdown serialization: lines joined with `\n`, no trailing newline.
pub fn doc_to_md(doc: &Doc) -> String {
    doc.iter().map(line_to_md).collect::<Vec<_>>().join("\n")
}

fn parse_inline(text: &str) -> Vec<Segment> {
    let chars: Vec<char> = text.chars().collect();
    let mut segments = Vec::new();
    let mut cur = String::new();
    let mut bold = false;
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() && (chars[i + 1] == '\\' || chars[i + 1] == '*') => {
                cur.push(chars[i + 1]);
                i += 2;
            }
            '*' if i + 1 < chars.len() && chars[i + 1] == '*' => {
                push_segment(&mut segments, std::mem::take(&mut cur), bold);
                bold = !bold;
                i += 2;
            }
            c => {
                cur.push(c);
                i += 1;
            }
        }
    }
    push_segment(&mut segments, cur, bold);
    segments
}

fn parse_md_line(line: &str) -> DocLine {
    let (kind, state, rest) = if let Some(r) = line.strip_prefix("- [x] ") {
        (LineKind::ListItem, LineState::Checked, r)
    } else if let Some(r) = line.strip_prefix("- [X] ") {
        (LineKind::ListItem, LineState::Checked, r)
    } else if let Some(r) = line.strip_prefix("- [ ] ") {
        (LineKind::ListItem, LineState::Unchecked, r)
    } else if let Some(r) = line.strip_prefix("- ") {
        (LineKind::ListItem, LineState::None, r)
    } else {
        (LineKind::Paragraph, LineState::None, line)
    };
    DocLine {
        kind,
        state,
        segments: parse_inline(rest),
    }
}

/// Inverse of `doc_to_md`, normalized the same way HTML-sourced docs are.
pub fn md_to_doc(src: &str) -> Doc {
    normalize(src.lines().map(parse_md_line).collect())
}

/// One item per bold-bearing line: the concatenation of that line's bold
/// segment text, trimmed. Lines with no (non-blank) bold segment contribute
/// nothing.
pub fn bold_items(doc: &Doc) -> Vec<String> {
    doc.iter()
        .filter_map(|line| {
            let text: String = line
                .segments
                .iter()
                .filter(|s| s.bold)
                .map(|s| s.text.as_str())
                .collect();
            let trimmed = text.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}

/// Line-safe bold-run replacement: walks `doc` and `items` jointly, giving
/// each bold-bearing line the next item verbatim while preserving its kind
/// and state. Leftover items become new all-bold paragraphs; leftover
/// bold lines (items ran out first) are left untouched.
pub fn apply_mirror(doc: &Doc, items: &[String]) -> Doc {
    let mut result = Vec::with_capacity(doc.len());
    let mut it = items.iter();

    for line in doc {
        let has_bold = line
            .segments
            .iter()
            .any(|s| s.bold && !s.text.trim().is_empty());
        if has_bold {
            if let Some(item) = it.next() {
                result.push(DocLine {
                    kind: line.kind,
                    state: line.state,
                    segments: vec![Segment {
                        text: item.clone(),
                        bold: true,
                    }],
                });
                continue;
            }
        }
        result.push(line.clone());
    }

    for remaining in it {
        result.push(DocLine {
            kind: LineKind::Paragraph,
            state: LineState::None,
            segments: vec![Segment {
                text: remaining.clone(),
                bold: true,
            }],
        });
    }

    result
}

fn hash_str(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn hash_doc(doc: &Doc) -> String {
    hash_str(&doc_to_md(doc))
}

pub fn hash_items(items: &[String]) -> String {
    let joined = items
        .iter()
        .map(|s| s.trim())
        .collect::<Vec<_>>()
        .join("\n");
    hash_str(&joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_simple_document() {
        let md = "# Shopping\n- [ ] eggs\n- [x] milk\n**Urgent**";
        let doc = md_to_doc(md);
        assert_eq!(doc_to_md(&doc), md);
    }

    #[test]
    fn escapes_literal_asterisks_and_backslashes() {
        let md = r"plain \* and \\ text";
        let doc = md_to_doc(md);
        assert_eq!(doc_to_md(&doc), md);
    }

    #[test]
    fn collapses_consecutive_empty_paragraphs_and_trims_edges() {
        let md = "\n\nfirst\n\n\n\nsecond\n\n";
        let doc = md_to_doc(md);
        assert_eq!(doc_to_md(&doc), "first\n\nsecond");
    }

    #[test]
    fn bold_items_collects_one_per_bold_line() {
        let doc = md_to_doc("plain line\n**Urgent** note\n**Another**");
        let items = bold_items(&doc);
        assert_eq!(items, vec!["Urgent".to_string(), "Another".to_string()]);
    }

    #[test]
    fn apply_mirror_preserves_non_bold_lines_and_list_state() {
        let doc = md_to_doc("- [ ] eggs\n**A**\n- [x] milk\n**B**");
        let replaced = apply_mirror(&doc, &["A2".to_string(), "B2".to_string()]);
        assert_eq!(replaced.len(), doc.len());
        assert_eq!(doc_to_md(&replaced), "- [ ] eggs\n**A2**\n- [x] milk\n**B2**");
    }

    #[test]
    fn apply_mirror_appends_leftover_items_as_new_paragraphs() {
        let doc = md_to_doc("**A**");
        let replaced = apply_mirror(&doc, &["A2".to_string(), "B2".to_string()]);
        assert_eq!(doc_to_md(&replaced), "**A2**\n**B2**");
    }

    #[test]
    fn apply_mirror_leaves_extra_bold_lines_untouched_when_items_run_out() {
        let doc = md_to_doc("**A**\n**B**");
        let replaced = apply_mirror(&doc, &["A2".to_string()]);
        assert_eq!(doc_to_md(&replaced), "**A2**\n**B**");
    }

    #[test]
    fn hash_is_stable_for_equal_docs() {
        let a = md_to_doc("same text");
        let b = md_to_doc("same text");
        assert_eq!(hash_doc(&a), hash_doc(&b));
    }
}
