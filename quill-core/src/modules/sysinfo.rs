//! Sys-info reporter (§4.G): for `--mods`, `--config`, `--man`/`--help`, and
//! `--sys-event` directives, emits an informational block inline at the
//! flag's line. Grounded on `lucy_notes_manager/modules/sys_info.py` and
//! `sys.py`; the `--config` block and `--sys-separator` flag are the
//! supplemented features from SPEC_FULL §11.2–§11.3.

use chrono::Local;

use crate::args::{self, FlagKind, FlagSpec, Template, Value};
use crate::module::{ChangeMap, Context, EventKind, Module, System};

pub struct SysInfoReporter;

impl SysInfoReporter {
    pub fn new() -> Self {
        SysInfoReporter
    }
}

impl Default for SysInfoReporter {
    fn default() -> Self {
        Self::new()
    }
}

const OPT_KEYS: [(&str, &str); 5] = [
    ("mods", "mods"),
    ("man", "man"),
    ("help", "help"),
    ("config", "config"),
    ("sys_event", "event"),
];

fn active_opts(ctx: &Context) -> Vec<(&'static str, usize)> {
    let mut out = Vec::new();
    for (key, opt) in OPT_KEYS {
        let enabled = ctx.config.get(key).map(|v| v.as_bool()).unwrap_or(false);
        if !enabled {
            continue;
        }
        if let Some(lines) = ctx.arg_lines.get(key) {
            if let Some(first) = lines.first() {
                out.push((opt, *first));
            }
        }
    }
    out
}

fn build_block(opt: &str, ctx: &Context, sys: &System, separator: &str) -> String {
    let mut out = String::new();
    out.push_str(separator);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&format!("--- {} ---\n", opt));

    match opt {
        "mods" => {
            for module in sys.modules {
                out.push_str(&format!("* {} ({})\n", module.name(), module.priority()));
            }
        }
        "man" => {
            for spec in sys.template {
                out.push_str(&format!("* {} [{:?}] default={:?} -- {}\n", spec.flag, spec.kind, spec.default, spec.description));
            }
        }
        "help" => {
            for spec in sys.template {
                out.push_str(&format!("* {}\n", spec.flag));
            }
        }
        "config" => {
            let mut keys: Vec<&String> = ctx.config.keys().collect();
            keys.sort();
            for key in keys {
                out.push_str(&format!("* {} = {:?}\n", key, ctx.config.get(key).unwrap()));
            }
        }
        "event" => {
            out.push_str(&format!("time: {}\n", Local::now().format("%Y-%m-%d %H:%M:%S")));
            out.push_str(&format!("type: {}\n", sys.event.kind_name()));
            out.push_str(&format!("path: {}\n", ctx.path.display()));
        }
        _ => {}
    }
    out.push('\n');
    out
}

fn flag_for(opt: &str) -> &'static str {
    match opt {
        "mods" => "--mods",
        "man" => "--man",
        "help" => "--help",
        "config" => "--config",
        "event" => "--sys-event",
        _ => "",
    }
}

fn apply(ctx: &Context, sys: &System) -> Option<ChangeMap> {
    let occurrences = active_opts(ctx);
    if occurrences.is_empty() {
        return None;
    }
    let separator = ctx
        .config
        .get("sys_separator")
        .and_then(|v| v.first_string())
        .unwrap_or("---")
        .to_string();

    let content = std::fs::read_to_string(ctx.path).ok()?;
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    if lines.is_empty() {
        lines.push(String::new());
    }

    let mut by_line: std::collections::BTreeMap<usize, Vec<&str>> = std::collections::BTreeMap::new();
    for (opt, lineno) in &occurrences {
        by_line.entry(*lineno).or_default().push(opt);
    }

    let mut sorted_lines: Vec<usize> = by_line.keys().copied().collect();
    sorted_lines.sort_by(|a, b| b.cmp(a));

    for lineno in sorted_lines {
        let idx = lineno.saturating_sub(1).min(lines.len() - 1);
        let opts = &by_line[&lineno];
        let remove_flags: Vec<String> = opts.iter().map(|o| flag_for(o).to_string()).collect();
        let residual = args::strip_flags_from_line(&lines[idx], &remove_flags);

        let mut replacement = String::new();
        for opt in opts.iter() {
            replacement.push_str(&build_block(opt, ctx, sys, &separator));
        }
        let mut replacement_lines: Vec<String> = replacement.lines().map(str::to_string).collect();
        let residual = residual.trim();
        if !residual.is_empty() {
            replacement_lines.push(residual.to_string());
        }
        lines.splice(idx..=idx, replacement_lines);
    }

    let rendered = format!("{}\n", lines.join("\n"));
    std::fs::write(ctx.path, &rendered).ok()?;

    let mut changes = ChangeMap::new();
    changes.insert(ctx.path.to_path_buf(), 1);
    Some(changes)
}

impl Module for SysInfoReporter {
    fn name(&self) -> &'static str {
        "sys"
    }

    fn priority(&self) -> i64 {
        0
    }

    fn template(&self) -> Template {
        vec![
            FlagSpec::new("--mods", FlagKind::Bool, Value::Bool(false), "Emit the loaded module list"),
            FlagSpec::new("--man", FlagKind::Bool, Value::Bool(false), "Emit the full flag template with descriptions"),
            FlagSpec::new("--help", FlagKind::Bool, Value::Bool(false), "Emit the flag name list"),
            FlagSpec::new("--config", FlagKind::Bool, Value::Bool(false), "Emit the merged configuration map"),
            FlagSpec::new("--sys-event", FlagKind::Bool, Value::Bool(false), "Emit the triggering event's details"),
            FlagSpec::new("--sys-separator", FlagKind::Str, Value::Strings(vec!["---".to_string()]), "Block separator line"),
        ]
    }

    fn created(&self, ctx: &Context, sys: &System) -> Option<ChangeMap> {
        apply(ctx, sys)
    }

    fn modified(&self, ctx: &Context, sys: &System) -> Option<ChangeMap> {
        apply(ctx, sys)
    }

    fn moved(&self, ctx: &Context, sys: &System) -> Option<ChangeMap> {
        apply(ctx, sys)
    }

    fn handles(&self, kind: EventKind) -> bool {
        matches!(kind, EventKind::Created | EventKind::Modified | EventKind::Moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{self as argsmod, ArgLines};
    use crate::event::Event;

    #[test]
    fn emits_mods_block_and_strips_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.md");
        std::fs::write(&path, "--mods\n").unwrap();

        let template = SysInfoReporter.template();
        let mut config = argsmod::defaults_of(&template);
        config.insert("mods".into(), Value::Bool(true));
        let mut lines = ArgLines::new();
        lines.insert("mods".into(), vec![1]);

        let ctx = Context {
            path: &path,
            config: &config,
            arg_lines: &lines,
        };
        let event = Event::Modified {
            path: path.clone(),
            is_dir: false,
        };
        let modules: Vec<Box<dyn Module>> = vec![Box::new(SysInfoReporter::new())];
        let sys = System {
            event: &event,
            template: &template,
            modules: &modules,
        };
        let changes = apply(&ctx, &sys).unwrap();
        assert_eq!(changes.get(path.as_path()), Some(&1));

        let rewritten = std::fs::read_to_string(&path).unwrap();
        assert!(rewritten.contains("--- mods ---"));
        assert!(rewritten.contains("* sys (0)"));
        assert!(!rewritten.contains("--mods"));
    }
}
