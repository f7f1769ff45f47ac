//! The "Plasma" rich-text HTML dialect: serialization of the document model
//! to the widget skeleton, and a hand-rolled tag scanner that parses it back
//! (mirroring the original daemon's own hand-rolled `HTMLParser` subclasses —
//! no general-purpose HTML crate is in the dependency stack, so this module
//! stays a small state machine over `<tag ...>`/`</tag>` tokens, same idiom
//! as `doc::parse_inline`'s character walk).

use std::collections::HashMap;

use regex::Regex;

use super::doc::{push_segment, Doc, DocLine, LineKind, LineState};
use crate::error::SyncError;

const HEADER_PREFIX: &str = concat!(
    "<!DOCTYPE HTML PUBLIC \"-//W3C//DTD HTML 4.0//EN\" ",
    "\"http://www.w3.org/TR/REC-html40/strict.dtd\">\n",
    "<html><head><meta name=\"qrichtext\" content=\"1\" />",
    "<meta charset=\"utf-8\" />\n",
    "<style type=\"text/css\">\n",
);
const BASE_CSS: &str = "p, li { white-space: pre-wrap; }\nhr { height: 1px; border-width: 0; }\n";
const CHECKBOX_CSS: &str = concat!(
    "li.unchecked::marker { content: \"\\2610\"; }\n",
    "li.checked::marker { content: \"\\2612\"; }\n"
);
const HEADER_SUFFIX: &str = concat!(
    "</style></head>",
    "<body style=\" font-family:'Noto Sans'; font-size:10pt; font-weight:400; font-style:normal;\">\n",
);
const FOOTER: &str = "</body></html>\n";
const BASE_STYLE: &str =
    " margin-top:0px; margin-bottom:0px; margin-left:0px; margin-right:0px; -qt-block-indent:0; text-indent:0px;";

fn style_block(checkbox_marks: bool) -> String {
    if checkbox_marks {
        format!("{}{}", BASE_CSS, CHECKBOX_CSS)
    } else {
        BASE_CSS.to_string()
    }
}

/// HTML-escapes `&`, `<`, `>` only — quote characters pass through unescaped,
/// matching the widget dialect's own `html.escape(text, quote=False)` origin.
fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\n' => out.push_str("<br/>"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape_html(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

fn render_segments(segments: &[super::doc::Segment]) -> String {
    segments
        .iter()
        .map(|s| {
            let escaped = escape_html(&s.text);
            if s.bold {
                format!("<span style=\" font-weight:600;\">{}</span>", escaped)
            } else {
                escaped
            }
        })
        .collect()
}

fn line_is_empty(line: &DocLine) -> bool {
    line.kind == LineKind::Paragraph && line.segments.iter().all(|s| s.text.trim().is_empty())
}

fn render_paragraph(line: &DocLine) -> String {
    if line_is_empty(line) {
        format!("<p style=\"-qt-paragraph-type:empty;{}\"><br /></p>\n", BASE_STYLE)
    } else {
        format!("<p style=\"{}\">{}</p>\n", BASE_STYLE, render_segments(&line.segments))
    }
}

fn render_list_item(line: &DocLine) -> String {
    let class_attr = match line.state {
        LineState::Checked => " class=\"checked\"",
        LineState::Unchecked => " class=\"unchecked\"",
        LineState::None => "",
    };
    format!(
        "<li{}><p style=\"{}\">{}</p></li>\n",
        class_attr,
        BASE_STYLE,
        render_segments(&line.segments)
    )
}

/// Full regeneration of the main widget (or mirror) document body.
pub fn render_html(doc: &Doc, checkbox_marks: bool) -> String {
    let mut body = String::new();
    let mut i = 0;
    while i < doc.len() {
        if doc[i].kind == LineKind::ListItem {
            body.push_str("<ul>\n");
            while i < doc.len() && doc[i].kind == LineKind::ListItem {
                body.push_str(&render_list_item(&doc[i]));
                i += 1;
            }
            body.push_str("</ul>\n");
        } else {
            body.push_str(&render_paragraph(&doc[i]));
            i += 1;
        }
    }

    format!(
        "{}{}{}{}{}{}",
        HEADER_PREFIX,
        style_block(checkbox_marks),
        HEADER_SUFFIX,
        body,
        "",
        FOOTER
    )
}

/// One all-bold paragraph per non-empty item — the bold-mirror file's
/// canonical rendering.
pub fn render_mirror_html(items: &[String], checkbox_marks: bool) -> String {
    let doc: Doc = items
        .iter()
        .filter(|s| !s.trim().is_empty())
        .map(|s| DocLine {
            kind: LineKind::Paragraph,
            state: LineState::None,
            segments: vec![super::doc::Segment {
                text: s.trim().to_string(),
                bold: true,
            }],
        })
        .collect();
    render_html(&doc, checkbox_marks)
}

/// Rewrites only the `<style>` block of an already-rendered widget document
/// to match `checkbox_marks`, leaving the body untouched. Returns `None` if
/// the style block already matches (no-op).
pub fn apply_checkbox_toggle(existing_html: &str, checkbox_marks: bool) -> Option<String> {
    let re = Regex::new(r"(?s)<style type=\"text/css\">\n(.*?)</style>").unwrap();
    let wanted_block = style_block(checkbox_marks);
    let caps = re.captures(existing_html)?;
    if &caps[1] == wanted_block.as_str() {
        return None;
    }
    let whole = caps.get(0).unwrap();
    let mut out = String::with_capacity(existing_html.len());
    out.push_str(&existing_html[..whole.start()]);
    out.push_str("<style type=\"text/css\">\n");
    out.push_str(&wanted_block);
    out.push_str("</style>");
    out.push_str(&existing_html[whole.end()..]);
    Some(out)
}

#[derive(Debug, Clone)]
struct Tag {
    name: String,
    closing: bool,
    self_closing: bool,
    attrs: HashMap<String, String>,
}

fn attr_re() -> Regex {
    Regex::new(r#"([A-Za-z][A-Za-z0-9-]*)\s*=\s*"([^"]*)""#).unwrap()
}

fn parse_tag(inner: &str) -> Tag {
    let closing = inner.starts_with('/');
    let mut rest = inner.trim_start_matches('/').trim();
    let self_closing = rest.ends_with('/');
    if self_closing {
        rest = rest[..rest.len() - 1].trim();
    }
    let name_end = rest.find(|c: char| c.is_whitespace()).unwrap_or(rest.len());
    let name = rest[..name_end].to_lowercase();
    let attr_str = &rest[name_end..];
    let attrs = attr_re()
        .captures_iter(attr_str)
        .map(|c| (c[1].to_lowercase(), c[2].to_string()))
        .collect();
    Tag {
        name,
        closing,
        self_closing,
        attrs,
    }
}

enum Token {
    Tag(Tag),
    Text(String),
}

fn tokenize(html: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let bytes = html.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] == b'<' {
            if let Some(end) = html[i..].find('>') {
                let inner = &html[i + 1..i + end];
                tokens.push(Token::Tag(parse_tag(inner)));
                i += end + 1;
                continue;
            } else {
                break;
            }
        }
        let next_lt = html[i..].find('<').map(|p| i + p).unwrap_or(html.len());
        let text = &html[i..next_lt];
        if !text.is_empty() {
            tokens.push(Token::Text(unescape_html(text)));
        }
        i = next_lt;
    }
    tokens
}

fn style_is_bold(style: Option<&String>) -> bool {
    let style = match style {
        Some(s) => s.to_lowercase().replace(' ', ""),
        None => return false,
    };
    if style.contains("font-weight:bold") {
        return true;
    }
    if let Some(idx) = style.rfind("font-weight:") {
        let rest = &style[idx + "font-weight:".len()..];
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(n) = digits.parse::<u32>() {
            return n >= 600;
        }
    }
    false
}

#[derive(PartialEq)]
enum BlockMarker {
    Paragraph,
    InlineParagraph,
    ListItem,
}

/// Parses the widget HTML dialect into the shared document model, applying
/// the `<li><p>…</p></li>` inline-container rule and the bold-contribution
/// stack described in spec §4.E. Returns `PartialHtml` if the document lacks
/// a matched `<body>`/`</body>` pair (captured mid-write by a rich editor).
pub fn parse_html(html: &str, source: std::path::PathBuf) -> Result<Doc, SyncError> {
    let lower = html.to_lowercase();
    if !lower.contains("<body") || !lower.contains("</body") {
        return Err(SyncError::PartialHtml(source));
    }

    let mut in_body = false;
    let mut lines: Vec<DocLine> = Vec::new();
    let mut bold_stack: Vec<bool> = Vec::new();
    let mut bold_depth: i32 = 0;
    let mut block_stack: Vec<BlockMarker> = Vec::new();
    let mut cur_kind = LineKind::Paragraph;
    let mut cur_state = LineState::None;
    let mut cur_segments: Vec<super::doc::Segment> = Vec::new();
    let mut accumulating = false;

    for token in tokenize(html) {
        match token {
            Token::Text(text) => {
                if accumulating {
                    push_segment(&mut cur_segments, text, bold_depth > 0);
                }
            }
            Token::Tag(tag) if !tag.closing => {
                let name = tag.name.as_str();
                if name == "body" {
                    in_body = true;
                    continue;
                }
                if !in_body {
                    continue;
                }
                match name {
                    "p" => {
                        let is_bold = style_is_bold(tag.attrs.get("style"));
                        if block_stack.last() == Some(&BlockMarker::ListItem) {
                            block_stack.push(BlockMarker::InlineParagraph);
                        } else {
                            cur_kind = LineKind::Paragraph;
                            cur_state = LineState::None;
                            cur_segments = Vec::new();
                            accumulating = true;
                            block_stack.push(BlockMarker::Paragraph);
                        }
                        bold_stack.push(is_bold);
                        if is_bold {
                            bold_depth += 1;
                        }
                    }
                    "li" => {
                        cur_kind = LineKind::ListItem;
                        cur_state = match tag.attrs.get("class").map(String::as_str) {
                            Some("checked") => LineState::Checked,
                            Some("unchecked") => LineState::Unchecked,
                            _ => LineState::None,
                        };
                        cur_segments = Vec::new();
                        accumulating = true;
                        let is_bold = style_is_bold(tag.attrs.get("style"));
                        bold_stack.push(is_bold);
                        if is_bold {
                            bold_depth += 1;
                        }
                        block_stack.push(BlockMarker::ListItem);
                    }
                    "b" | "strong" => {
                        bold_stack.push(true);
                        bold_depth += 1;
                    }
                    "span" | "font" => {
                        let is_bold = style_is_bold(tag.attrs.get("style"));
                        bold_stack.push(is_bold);
                        if is_bold {
                            bold_depth += 1;
                        }
                    }
                    "br" => {
                        if accumulating {
                            push_segment(&mut cur_segments, "\n".to_string(), bold_depth > 0);
                        }
                    }
                    _ => {}
                }
                if tag.self_closing && matches!(name, "b" | "strong" | "span" | "font") {
                    if let Some(was_bold) = bold_stack.pop() {
                        if was_bold {
                            bold_depth -= 1;
                        }
                    }
                }
            }
            Token::Tag(tag) => {
                let name = tag.name.as_str();
                if name == "body" {
                    in_body = false;
                    continue;
                }
                if !in_body {
                    continue;
                }
                match name {
                    "p" => match block_stack.pop() {
                        Some(BlockMarker::Paragraph) => {
                            lines.push(DocLine {
                                kind: cur_kind,
                                state: cur_state,
                                segments: std::mem::take(&mut cur_segments),
                            });
                            accumulating = false;
                            pop_bold(&mut bold_stack, &mut bold_depth);
                        }
                        Some(BlockMarker::InlineParagraph) => {
                            pop_bold(&mut bold_stack, &mut bold_depth);
                        }
                        _ => {}
                    },
                    "li" => {
                        block_stack.pop();
                        lines.push(DocLine {
                            kind: cur_kind,
                            state: cur_state,
                            segments: std::mem::take(&mut cur_segments),
                        });
                        accumulating = false;
                        pop_bold(&mut bold_stack, &mut bold_depth);
                    }
                    "b" | "strong" | "span" | "font" => {
                        pop_bold(&mut bold_stack, &mut bold_depth);
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(super::doc::normalize(lines))
}

fn pop_bold(stack: &mut Vec<bool>, depth: &mut i32) {
    if let Some(was_bold) = stack.pop() {
        if was_bold {
            *depth = (*depth - 1).max(0);
        }
    }
}

/// Each non-empty plain-text line (bold ignored) becomes one bold-mirror item.
pub fn plain_lines(doc: &Doc) -> Vec<String> {
    doc.iter()
        .map(|line| line.segments.iter().map(|s| s.text.as_str()).collect::<String>())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::doc::md_to_doc;

    #[test]
    fn renders_list_and_bold_paragraph() {
        let doc = md_to_doc("- [ ] eggs\n- [x] milk\n**Urgent**");
        let html = render_html(&doc, false);
        assert!(html.contains("<li class=\"unchecked\"><p"));
        assert!(html.contains("eggs</p></li>"));
        assert!(html.contains("<li class=\"checked\"><p"));
        assert!(html.contains("milk</p></li>"));
        assert!(html.contains("font-weight:600"));
        assert!(html.contains("Urgent"));
    }

    #[test]
    fn round_trips_through_html() {
        let md = "# Shopping\n- [ ] eggs\n- [x] milk\n**Urgent**";
        let doc = md_to_doc(md);
        let html = render_html(&doc, false);
        let parsed = parse_html(&html, std::path::PathBuf::from("w.html")).unwrap();
        assert_eq!(super::super::doc::doc_to_md(&parsed), md);
    }

    #[test]
    fn li_wrapped_paragraph_is_inline_not_a_new_line() {
        let html = "<html><body><ul><li class=\"unchecked\"><p style=\"\">bread</p></li></ul></body></html>";
        let doc = parse_html(html, std::path::PathBuf::from("w.html")).unwrap();
        assert_eq!(doc.len(), 1);
        assert_eq!(doc[0].kind, LineKind::ListItem);
    }

    #[test]
    fn missing_body_close_is_partial() {
        let html = "<html><body><p>oops";
        let err = parse_html(html, std::path::PathBuf::from("w.html")).unwrap_err();
        assert!(matches!(err, SyncError::PartialHtml(_)));
    }

    #[test]
    fn checkbox_toggle_rewrites_only_style_block() {
        let doc = md_to_doc("- [ ] a");
        let html = render_html(&doc, false);
        let toggled = apply_checkbox_toggle(&html, true).unwrap();
        assert!(toggled.contains("li.unchecked::marker"));
        assert!(toggled.contains("<li class=\"unchecked\">"));
        assert!(apply_checkbox_toggle(&toggled, true).is_none());
    }

    #[test]
    fn bold_span_inside_list_item_round_trips() {
        let doc = md_to_doc("- [ ] **urgent** thing");
        let html = render_html(&doc, false);
        let parsed = parse_html(&html, std::path::PathBuf::from("w.html")).unwrap();
        assert_eq!(super::super::doc::doc_to_md(&parsed), "- [ ] **urgent** thing");
    }
}
