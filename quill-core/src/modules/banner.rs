//! Banner inserter (§4.G): replaces the directive line with a rendered
//! ASCII banner block. Grounded on `banner_inserter.py`'s line-splice
//! behaviour (insert block under the first line, keep any residual text).
//! `pyfiglet`'s font rendering is itself out of scope (spec.md §1
//! "figlet-style banner rendering"); this substitutes a framed block-letter
//! renderer rather than pull in an unlisted dependency for it.

use chrono::Local;

use crate::args::{self, FlagKind, FlagSpec, Template, Value};
use crate::module::{ChangeMap, Context, EventKind, Module, System};

const BANNER_FLAG: &str = "--banner";

/// A simple framed rendering: an `=`-bordered box around the (uppercased)
/// banner text, one glyph row per character. Stands in for figlet-style
/// multi-line block lettering without depending on a font-rendering crate.
fn render_banner(text: &str) -> String {
    let upper = text.to_uppercase();
    let width = upper.chars().count().max(1);
    let border = "=".repeat(width + 4);
    format!("{border}\n= {upper} =\n{border}\n")
}

fn banner_text(raw: &str) -> String {
    if raw == "date" {
        Local::now().format("%Y-%m-%d").to_string()
    } else {
        raw.to_string()
    }
}

pub struct BannerInserter;

impl BannerInserter {
    pub fn new() -> Self {
        BannerInserter
    }
}

impl Default for BannerInserter {
    fn default() -> Self {
        Self::new()
    }
}

fn apply(ctx: &Context) -> Option<ChangeMap> {
    let raw = ctx.config.get("banner").and_then(|v| v.first_string())?.to_string();
    if raw.is_empty() {
        return None;
    }
    let lineno = *ctx.arg_lines.get("banner")?.first()?;

    let content = std::fs::read_to_string(ctx.path).ok()?;
    let had_trailing_newline = content.ends_with('\n');
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    if lines.is_empty() {
        lines.push(String::new());
    }
    let idx = lineno.saturating_sub(1).min(lines.len() - 1);

    let residual = args::strip_flags_from_line(&lines[idx], &[BANNER_FLAG.to_string()]);
    let residual = residual.trim();

    let block = render_banner(&banner_text(&raw));
    let mut replacement: Vec<String> = block.lines().map(str::to_string).collect();
    if !residual.is_empty() {
        replacement.push(residual.to_string());
    }

    lines.splice(idx..=idx, replacement);

    let mut rendered = lines.join("\n");
    if had_trailing_newline {
        rendered.push('\n');
    }
    std::fs::write(ctx.path, &rendered).ok()?;

    let mut changes = ChangeMap::new();
    changes.insert(ctx.path.to_path_buf(), 1);
    Some(changes)
}

impl Module for BannerInserter {
    fn name(&self) -> &'static str {
        "banner"
    }

    fn priority(&self) -> i64 {
        5
    }

    fn template(&self) -> Template {
        vec![FlagSpec::new(
            BANNER_FLAG,
            FlagKind::Str,
            Value::Strings(vec![]),
            "Insert a rendered ASCII banner at this directive's line ('date' for today's date)",
        )]
    }

    fn modified(&self, ctx: &Context, _sys: &System) -> Option<ChangeMap> {
        apply(ctx)
    }

    fn created(&self, ctx: &Context, _sys: &System) -> Option<ChangeMap> {
        apply(ctx)
    }

    fn handles(&self, kind: EventKind) -> bool {
        matches!(kind, EventKind::Created | EventKind::Modified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{self as argsmod, ArgLines};

    #[test]
    fn replaces_directive_line_with_banner_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.md");
        std::fs::write(&path, "--banner Hi\nrest of note\n").unwrap();

        let template = BannerInserter.template();
        let mut config = argsmod::defaults_of(&template);
        config.insert("banner".into(), Value::Strings(vec!["Hi".into()]));
        let mut lines = ArgLines::new();
        lines.insert("banner".into(), vec![1]);

        let ctx = Context {
            path: &path,
            config: &config,
            arg_lines: &lines,
        };
        let changes = apply(&ctx).unwrap();
        assert_eq!(changes.get(path.as_path()), Some(&1));

        let rewritten = std::fs::read_to_string(&path).unwrap();
        assert!(rewritten.contains("= HI ="));
        assert!(rewritten.contains("rest of note"));
        assert!(!rewritten.contains("--banner"));
    }

    #[test]
    fn date_keyword_substitutes_todays_date() {
        let rendered = banner_text("date");
        assert_eq!(rendered.len(), "YYYY-MM-DD".len());
    }
}
