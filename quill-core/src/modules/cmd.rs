//! Command embedder (§4.G): for each `--c <tokens…>` directive, spawns the
//! process with no shell, captures stdout+stderr with a byte cap, and
//! replaces the originating line with a titled output block. Grounded on
//! `lucy_notes_manager/modules/cmd.py`.

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::Duration;

use wait_timeout::ChildExt;

use crate::args::{self, FlagKind, FlagSpec, Template, Value};
use crate::module::{ChangeMap, Context, EventKind, Module, System};

const DEFAULT_TIMEOUT_SECS: i64 = 5;
const DEFAULT_MAX_BYTES: i64 = 20_000;

pub struct CommandEmbedder;

impl CommandEmbedder {
    pub fn new() -> Self {
        CommandEmbedder
    }
}

impl Default for CommandEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

struct Run {
    line_no: usize,
    tokens: Vec<String>,
}

/// Groups `--c` values by the line that contributed them, in ascending order.
fn collect_runs(ctx: &Context) -> Vec<Run> {
    let values = ctx.config.get("c").map(|v| v.as_strings()).unwrap_or(&[]);
    let line_nos = ctx.arg_lines.get("c").cloned().unwrap_or_default();
    if values.is_empty() || line_nos.is_empty() || values.len() != line_nos.len() {
        return Vec::new();
    }

    let mut by_line: std::collections::BTreeMap<usize, Vec<String>> = std::collections::BTreeMap::new();
    for (tok, ln) in values.iter().zip(line_nos.iter()) {
        if !tok.is_empty() {
            by_line.entry(*ln).or_default().push(tok.clone());
        }
    }

    by_line
        .into_iter()
        .filter(|(_, tokens)| !tokens.is_empty())
        .map(|(line_no, tokens)| Run { line_no, tokens })
        .collect()
}

fn clip(bytes: &[u8], max_bytes: usize) -> String {
    if max_bytes == 0 {
        return String::new();
    }
    if bytes.len() <= max_bytes {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let mut end = max_bytes;
    while end > 0 && (bytes[end] & 0xC0) == 0x80 {
        end -= 1;
    }
    format!("{}\n…(clipped)…\n", String::from_utf8_lossy(&bytes[..end]))
}

struct RunOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    timed_out: bool,
    spawn_error: Option<String>,
}

fn run_command(tokens: &[String], cwd: &std::path::Path, timeout: Duration) -> RunOutput {
    let mut cmd = Command::new(&tokens[0]);
    cmd.args(&tokens[1..])
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            return RunOutput {
                stdout: Vec::new(),
                stderr: Vec::new(),
                timed_out: false,
                spawn_error: Some(format!("command not found: {}: {}", tokens[0], e)),
            }
        }
    };

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let stdout_reader = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(p) = stdout_pipe.as_mut() {
            let _ = p.read_to_end(&mut buf);
        }
        buf
    });
    let stderr_reader = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(p) = stderr_pipe.as_mut() {
            let _ = p.read_to_end(&mut buf);
        }
        buf
    });

    let timed_out = match child.wait_timeout(timeout) {
        Ok(Some(_status)) => false,
        Ok(None) => {
            let _ = child.kill();
            let _ = child.wait();
            true
        }
        Err(_) => false,
    };

    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();

    RunOutput {
        stdout,
        stderr,
        timed_out,
        spawn_error: None,
    }
}

fn build_block(tokens: &[String], output: &RunOutput, show_stdout: bool, show_stderr: bool, max_bytes: usize) -> String {
    let title = tokens.first().map(String::as_str).unwrap_or("cmd");
    let mut out = String::new();
    out.push_str(&format!("--- {} ---\n", title));

    if let Some(err) = &output.spawn_error {
        out.push_str(err);
        out.push('\n');
        return out;
    }

    let mut wrote_any = false;
    if show_stdout && !output.stdout.is_empty() {
        out.push_str(&clip(&output.stdout, max_bytes));
        if !out.ends_with('\n') {
            out.push('\n');
        }
        wrote_any = true;
    }
    if show_stderr && !output.stderr.is_empty() {
        if wrote_any {
            out.push('\n');
        }
        out.push_str(&clip(&output.stderr, max_bytes));
        if !out.ends_with('\n') {
            out.push('\n');
        }
        wrote_any = true;
    }
    if output.timed_out {
        out.push_str(&format!("TIMEOUT\n"));
        wrote_any = true;
    }
    if !wrote_any {
        out.push_str("(empty)\n");
    }
    out
}

fn apply(ctx: &Context) -> Option<ChangeMap> {
    let runs = collect_runs(ctx);
    if runs.is_empty() {
        return None;
    }

    let timeout_secs = ctx
        .config
        .get("cmd_timeout")
        .and_then(|v| v.first_int())
        .unwrap_or(DEFAULT_TIMEOUT_SECS)
        .max(1) as u64;
    let max_bytes = ctx
        .config
        .get("cmd_max_bytes")
        .and_then(|v| v.first_int())
        .unwrap_or(DEFAULT_MAX_BYTES)
        .max(0) as usize;
    let show_stdout = ctx.config.get("cmd_show_stdout").map(|v| v.as_bool()).unwrap_or(true);
    let show_stderr = ctx.config.get("cmd_show_stderr").map(|v| v.as_bool()).unwrap_or(true);

    let content = std::fs::read_to_string(ctx.path).ok()?;
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    if lines.is_empty() {
        lines.push(String::new());
    }
    let cwd = ctx.path.parent().map(Path::to_path_buf).unwrap_or_else(|| std::path::PathBuf::from("."));

    let mut sorted_runs = runs;
    sorted_runs.sort_by(|a, b| b.line_no.cmp(&a.line_no));

    for run in &sorted_runs {
        let idx = run.line_no.saturating_sub(1).min(lines.len() - 1);
        let residual = args::strip_flags_from_line(&lines[idx], &["--c".to_string()]);
        let output = run_command(&run.tokens, &cwd, Duration::from_secs(timeout_secs));
        let block = build_block(&run.tokens, &output, show_stdout, show_stderr, max_bytes);

        let mut replacement: Vec<String> = block.lines().map(str::to_string).collect();
        let residual = residual.trim();
        if !residual.is_empty() {
            replacement.push(residual.to_string());
        }
        lines.splice(idx..=idx, replacement);
    }

    let rendered = format!("{}\n", lines.join("\n"));
    std::fs::write(ctx.path, &rendered).ok()?;

    let mut changes = ChangeMap::new();
    changes.insert(ctx.path.to_path_buf(), 1);
    Some(changes)
}

use std::path::Path;

impl Module for CommandEmbedder {
    fn name(&self) -> &'static str {
        "cmd"
    }

    fn priority(&self) -> i64 {
        50
    }

    fn template(&self) -> Template {
        vec![
            FlagSpec::new("--c", FlagKind::Str, Value::Strings(vec![]), "Command tokens to run and embed the output of"),
            FlagSpec::new("--cmd-timeout", FlagKind::Int, Value::Ints(vec![DEFAULT_TIMEOUT_SECS]), "Seconds before the spawned command is killed"),
            FlagSpec::new("--cmd-max-bytes", FlagKind::Int, Value::Ints(vec![DEFAULT_MAX_BYTES]), "Byte cap on embedded stdout/stderr"),
            FlagSpec::new("--cmd-show-stderr", FlagKind::Bool, Value::Bool(true), "Include stderr in the embedded block"),
            FlagSpec::new("--cmd-show-stdout", FlagKind::Bool, Value::Bool(true), "Include stdout in the embedded block"),
        ]
    }

    fn created(&self, ctx: &Context, _sys: &System) -> Option<ChangeMap> {
        apply(ctx)
    }

    fn modified(&self, ctx: &Context, _sys: &System) -> Option<ChangeMap> {
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
    fn embeds_command_output_and_strips_directive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.md");
        std::fs::write(&path, "--c echo hello\n").unwrap();

        let template = CommandEmbedder.template();
        let mut config = argsmod::defaults_of(&template);
        config.insert("c".into(), Value::Strings(vec!["echo".into(), "hello".into()]));
        let mut lines = ArgLines::new();
        lines.insert("c".into(), vec![1, 1]);

        let ctx = Context {
            path: &path,
            config: &config,
            arg_lines: &lines,
        };
        let changes = apply(&ctx).unwrap();
        assert_eq!(changes.get(path.as_path()), Some(&1));

        let rewritten = std::fs::read_to_string(&path).unwrap();
        assert!(rewritten.contains("--- echo ---"));
        assert!(rewritten.contains("hello"));
        assert!(!rewritten.contains("--c"));
    }

    #[test]
    fn clip_truncates_on_char_boundary() {
        let text = "x".repeat(10);
        let clipped = clip(text.as_bytes(), 4);
        assert!(clipped.starts_with("xxxx"));
    }
}
