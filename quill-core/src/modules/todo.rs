//! Checklist formatter (§4.G): rewrites every `- X` line of a Markdown file
//! to `- [ ] X` unless it is already a checklist item. Grounded on
//! `lucy_notes_manager/modules/todo_formatter.py`.

use regex::Regex;

use crate::args::{FlagKind, FlagSpec, Template, Value};
use crate::module::{ChangeMap, Context, EventKind, Module, System};

fn bullet_re() -> Regex {
    Regex::new(r"^(?P<indent>\s*)-\s+(?P<content>.+)$").unwrap()
}

fn is_already_checklist(content: &str) -> bool {
    content.starts_with("[ ] ") || content.starts_with("[x] ") || content.starts_with("[X] ")
}

/// Rewrites bare `- X` bullets to `- [ ] X`. Returns `None` (no write) if
/// nothing changed.
fn rewrite(text: &str) -> Option<String> {
    let re = bullet_re();
    let mut changed = false;
    let mut out = String::with_capacity(text.len());

    let mut rest = text;
    loop {
        let newline_at = rest.find('\n');
        let (line, remainder) = match newline_at {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => (rest, ""),
        };

        if let Some(caps) = re.captures(line) {
            let content = &caps["content"];
            if !is_already_checklist(content) {
                out.push_str(&caps["indent"]);
                out.push_str("- [ ] ");
                out.push_str(content);
                changed = true;
            } else {
                out.push_str(line);
            }
        } else {
            out.push_str(line);
        }

        if newline_at.is_some() {
            out.push('\n');
            rest = remainder;
        } else {
            break;
        }
    }

    if changed {
        Some(out)
    } else {
        None
    }
}

pub struct ChecklistFormatter;

impl ChecklistFormatter {
    pub fn new() -> Self {
        ChecklistFormatter
    }
}

impl Default for ChecklistFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn apply(ctx: &Context) -> Option<ChangeMap> {
    let enabled = ctx.config.get("todo").map(|v| v.as_bool()).unwrap_or(false);
    if !enabled {
        return None;
    }
    let is_markdown = ctx
        .path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("md"))
        .unwrap_or(false);
    if !is_markdown {
        return None;
    }

    let original = std::fs::read_to_string(ctx.path).ok()?;
    let rewritten = rewrite(&original)?;
    std::fs::write(ctx.path, &rewritten).ok()?;

    let mut changes = ChangeMap::new();
    changes.insert(ctx.path.to_path_buf(), 1);
    Some(changes)
}

impl Module for ChecklistFormatter {
    fn name(&self) -> &'static str {
        "todo"
    }

    fn priority(&self) -> i64 {
        10
    }

    fn template(&self) -> Template {
        vec![FlagSpec::new("--todo", FlagKind::Bool, Value::Bool(false), "Rewrite bare bullets as checklist items")]
    }

    fn created(&self, ctx: &Context, _sys: &System) -> Option<ChangeMap> {
        apply(ctx)
    }

    fn modified(&self, ctx: &Context, _sys: &System) -> Option<ChangeMap> {
        apply(ctx)
    }

    fn moved(&self, ctx: &Context, _sys: &System) -> Option<ChangeMap> {
        apply(ctx)
    }

    fn handles(&self, kind: EventKind) -> bool {
        matches!(kind, EventKind::Created | EventKind::Modified | EventKind::Moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_bare_bullet_only() {
        let text = "- eggs\n- [ ] milk\n- [x] bread\nplain line\n";
        let rewritten = rewrite(text).unwrap();
        assert_eq!(rewritten, "- [ ] eggs\n- [ ] milk\n- [x] bread\nplain line\n");
    }

    #[test]
    fn no_change_returns_none() {
        let text = "- [ ] eggs\nplain\n";
        assert!(rewrite(text).is_none());
    }

    #[test]
    fn preserves_indentation() {
        let text = "  - eggs\n";
        let rewritten = rewrite(text).unwrap();
        assert_eq!(rewritten, "  - [ ] eggs\n");
    }
}
