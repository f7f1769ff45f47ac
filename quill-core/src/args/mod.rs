//! Dynamic argument-template system: one parser used uniformly for CLI argv,
//! config-file lines, and per-file directive lines. Grounded on the single
//! `parse_args` entry point the teacher's ancestor scripts all funnelled
//! through, rather than a static derive-style CLI parser, because the
//! recognized flag set is only known at runtime (system + every loaded
//! module's template, concatenated) and has to be re-applied per file event.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use regex::Regex;

/// Declared type of a flag's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagKind {
    Str,
    Int,
    Float,
    Bool,
}

/// One entry of a flag template: name, kind, default, description.
#[derive(Debug, Clone)]
pub struct FlagSpec {
    pub flag: String,
    pub kind: FlagKind,
    pub default: Value,
    pub description: String,
}

impl FlagSpec {
    pub fn new(flag: impl Into<String>, kind: FlagKind, default: Value, description: impl Into<String>) -> Self {
        FlagSpec {
            flag: flag.into(),
            kind,
            default,
            description: description.into(),
        }
    }

    /// Destination key: leading dashes stripped, remaining dashes to underscores.
    pub fn dest(&self) -> String {
        dest_key(&self.flag)
    }
}

pub fn dest_key(flag: &str) -> String {
    flag.trim_start_matches('-').replace('-', "_")
}

/// A parsed or default flag value. Non-boolean flags are always variadic,
/// even when only a single value was supplied.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Strings(Vec<String>),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
}

impl Value {
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Bool(_) => false,
            Value::Strings(v) => v.is_empty(),
            Value::Ints(v) => v.is_empty(),
            Value::Floats(v) => v.is_empty(),
        }
    }

    pub fn as_bool(&self) -> bool {
        matches!(self, Value::Bool(true))
    }

    pub fn as_strings(&self) -> &[String] {
        match self {
            Value::Strings(v) => v,
            _ => &[],
        }
    }

    pub fn first_string(&self) -> Option<&str> {
        self.as_strings().first().map(|s| s.as_str())
    }

    pub fn as_ints(&self) -> &[i64] {
        match self {
            Value::Ints(v) => v,
            _ => &[],
        }
    }

    pub fn first_int(&self) -> Option<i64> {
        self.as_ints().first().copied()
    }

    pub fn as_floats(&self) -> &[f64] {
        match self {
            Value::Floats(v) => v,
            _ => &[],
        }
    }

    pub fn first_float(&self) -> Option<f64> {
        self.as_floats().first().copied()
    }
}

pub type Template = Vec<FlagSpec>;
pub type ArgMap = HashMap<String, Value>;
pub type ArgLines = HashMap<String, Vec<usize>>;

/// Token that starts a known or unknown flag, per `--[a-zA-Z][a-zA-Z0-9_-]*(=value)?`.
fn valid_flag_token_re() -> Regex {
    Regex::new(r"^--[A-Za-z][A-Za-z0-9_-]*(=(?s:.*))?$").unwrap()
}

/// Splits `--flag=value` into (`--flag`, Some("value")), or returns (tok, None).
fn split_inline_value(tok: &str) -> (&str, Option<&str>) {
    match tok.find('=') {
        Some(idx) if tok.starts_with("--") => (&tok[..idx], Some(&tok[idx + 1..])),
        _ => (tok, None),
    }
}

/// A "flag-like" token per the line-stripping helper: `--`+letter, or
/// `-`+non-digit-non-dot (so `-1.5` survives as a value).
fn is_flag_like_token(tok: &str) -> bool {
    if tok.starts_with("--") {
        return tok.chars().nth(2).map(|c| c.is_ascii_alphabetic()).unwrap_or(false);
    }
    if let Some(rest) = tok.strip_prefix('-') {
        if let Some(c) = rest.chars().next() {
            return !c.is_ascii_digit() && c != '.';
        }
    }
    false
}

fn build_index(template: &Template) -> HashMap<&str, &FlagSpec> {
    template.iter().map(|s| (s.flag.as_str(), s)).collect()
}

/// Core parser: walks `tokens`, consuming known flags (and their variadic
/// value runs) and returning the leftovers in original order. Never aborts:
/// on any internal failure it degrades to `({}, tokens)`.
pub fn parse(tokens: &[String], template: &Template) -> (ArgMap, Vec<String>) {
    let index = build_index(template);
    let valid = valid_flag_token_re();

    let mut known: ArgMap = HashMap::new();
    let mut unknown: Vec<String> = Vec::new();

    let mut i = 0usize;
    while i < tokens.len() {
        let tok = tokens[i].as_str();
        if !valid.is_match(tok) {
            unknown.push(tokens[i].clone());
            i += 1;
            continue;
        }

        let (flag_name, inline) = split_inline_value(tok);
        let spec = match index.get(flag_name) {
            Some(spec) => *spec,
            None => {
                unknown.push(tokens[i].clone());
                i += 1;
                continue;
            }
        };

        if spec.kind == FlagKind::Bool {
            known.insert(spec.dest(), Value::Bool(true));
            i += 1;
            continue;
        }

        let mut raw_values: Vec<String> = Vec::new();
        let mut j = i + 1;
        if let Some(v) = inline {
            raw_values.push(v.to_string());
        } else {
            while j < tokens.len() && !valid.is_match(&tokens[j]) {
                raw_values.push(tokens[j].clone());
                j += 1;
            }
        }

        merge_typed_values(&mut known, &mut unknown, spec, raw_values);
        i = j;
    }

    (known, unknown)
}

fn merge_typed_values(known: &mut ArgMap, unknown: &mut Vec<String>, spec: &FlagSpec, raw_values: Vec<String>) {
    let dest = spec.dest();
    match spec.kind {
        FlagKind::Str => {
            let entry = known
                .entry(dest)
                .or_insert_with(|| Value::Strings(Vec::new()));
            if let Value::Strings(v) = entry {
                v.extend(raw_values);
            }
        }
        FlagKind::Int => {
            let entry = known.entry(dest).or_insert_with(|| Value::Ints(Vec::new()));
            if let Value::Ints(v) = entry {
                for raw in raw_values {
                    match raw.parse::<i64>() {
                        Ok(n) => v.push(n),
                        Err(_) => unknown.push(raw),
                    }
                }
            }
        }
        FlagKind::Float => {
            let entry = known.entry(dest).or_insert_with(|| Value::Floats(Vec::new()));
            if let Value::Floats(v) = entry {
                for raw in raw_values {
                    match raw.parse::<f64>() {
                        Ok(n) => v.push(n),
                        Err(_) => unknown.push(raw),
                    }
                }
            }
        }
        FlagKind::Bool => unreachable!("handled by caller"),
    }
}

/// Tokenizes a config file's content: blank lines and `#` comments ignored,
/// remaining lines shell-quote-tokenized and concatenated in order. Exposed
/// separately from `parse_config_file` so a caller that doesn't yet know the
/// full (system + module) template — e.g. a daemon's startup bootstrap,
/// which needs the config path before the module set is built — can still
/// read the file once and hand the raw tokens to `ModuleManager::new`.
pub fn tokenize_config_file(path: &Path) -> std::io::Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    let mut tokens: Vec<String> = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match shlex::split(trimmed) {
            Some(mut parts) => tokens.append(&mut parts),
            None => log::debug!("unparsable config line (unbalanced quoting): {}", trimmed),
        }
    }
    Ok(tokens)
}

/// Reads a config file: blank lines and `#` comments ignored, remaining
/// lines shell-tokenized and concatenated before a single `parse` call.
pub fn parse_config_file(path: &Path, template: &Template) -> std::io::Result<(ArgMap, Vec<String>)> {
    let tokens = tokenize_config_file(path)?;
    Ok(parse(&tokens, template))
}

/// Per-file directive parsing. Lines whose first token is a valid flag token
/// are directive lines; everything else is prose and ignored. Populates
/// `arg_lines` with one entry per contributed value (or once per switch),
/// and counts unbound values under the reserved key `__unknown__`.
pub fn parse_file_directives(
    path: &Path,
    template: &Template,
    only_first_line: bool,
) -> std::io::Result<(ArgMap, ArgLines)> {
    let content = fs::read_to_string(path)?;
    let valid = valid_flag_token_re();
    let mut known: ArgMap = HashMap::new();
    let mut arg_lines: ArgLines = HashMap::new();

    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;
        if only_first_line && line_no > 1 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let first_token = match trimmed.split_whitespace().next() {
            Some(t) => t,
            None => continue,
        };
        if !valid.is_match(first_token) {
            continue;
        }

        let tokens = match shlex::split(trimmed) {
            Some(t) => t,
            None => {
                log::debug!("unparsable directive line {}: {}", line_no, trimmed);
                continue;
            }
        };

        for run in split_directive_runs(&tokens, &valid) {
            let (run_known, run_unknown) = parse(&run, template);
            for (dest, value) in run_known {
                let contributed = match &value {
                    Value::Bool(_) => 1,
                    Value::Strings(v) => v.len().max(1),
                    Value::Ints(v) => v.len().max(1),
                    Value::Floats(v) => v.len().max(1),
                };
                arg_lines
                    .entry(dest.clone())
                    .or_default()
                    .extend(std::iter::repeat(line_no).take(contributed));
                merge_known_value(&mut known, dest, value);
            }
            if !run_unknown.is_empty() {
                arg_lines
                    .entry("__unknown__".to_string())
                    .or_default()
                    .extend(std::iter::repeat(line_no).take(run_unknown.len()));
            }
        }
    }

    Ok((known, arg_lines))
}

fn merge_known_value(known: &mut ArgMap, dest: String, value: Value) {
    match known.entry(dest).or_insert_with(|| match &value {
        Value::Bool(_) => Value::Bool(false),
        Value::Strings(_) => Value::Strings(Vec::new()),
        Value::Ints(_) => Value::Ints(Vec::new()),
        Value::Floats(_) => Value::Floats(Vec::new()),
    }) {
        Value::Bool(b) => {
            if let Value::Bool(new) = value {
                *b = *b || new;
            }
        }
        Value::Strings(v) => {
            if let Value::Strings(mut new) = value {
                v.append(&mut new);
            }
        }
        Value::Ints(v) => {
            if let Value::Ints(mut new) = value {
                v.append(&mut new);
            }
        }
        Value::Floats(v) => {
            if let Value::Floats(mut new) = value {
                v.append(&mut new);
            }
        }
    }
}

/// Splits a directive line's tokens into `flag [values...]` runs, each run
/// starting at a valid flag token and stopping at the next one.
fn split_directive_runs(tokens: &[String], valid: &Regex) -> Vec<Vec<String>> {
    let mut runs = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        if !valid.is_match(&tokens[i]) {
            i += 1;
            continue;
        }
        let start = i;
        i += 1;
        while i < tokens.len() && !valid.is_match(&tokens[i]) {
            i += 1;
        }
        runs.push(tokens[start..i].to_vec());
    }
    runs
}

/// `overrides` wins per key unless its value is unset/empty; variadic values
/// are replaced wholesale, never concatenated with the default.
pub fn merge(defaults: &ArgMap, overrides: &ArgMap) -> ArgMap {
    let mut result = defaults.clone();
    for (k, v) in overrides {
        if v.is_empty() {
            continue;
        }
        result.insert(k.clone(), v.clone());
    }
    result
}

/// Builds the map of declared defaults for a template, so callers can seed
/// `merge`'s `defaults` argument without duplicating every module's spec.
pub fn defaults_of(template: &Template) -> ArgMap {
    template
        .iter()
        .map(|spec| (spec.dest(), spec.default.clone()))
        .collect()
}

/// Removes every occurrence of any flag in `flag_set` (with its value run)
/// from a tokenized line, preserving a trailing newline if present.
pub fn strip_flags_from_line(line: &str, flag_set: &[String]) -> String {
    let had_newline = line.ends_with('\n');
    let body = line.trim_end_matches('\n');
    let tokens = match shlex::split(body) {
        Some(t) => t,
        None => return line.to_string(),
    };

    let mut kept: Vec<String> = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let (flag_name, _inline) = split_inline_value(&tokens[i]);
        if flag_set.iter().any(|f| f == flag_name) {
            if tokens[i].contains('=') {
                i += 1;
                continue;
            }
            i += 1;
            while i < tokens.len() && !is_flag_like_token(&tokens[i]) {
                i += 1;
            }
            continue;
        }
        kept.push(tokens[i].clone());
        i += 1;
    }

    let rejoined = kept
        .iter()
        .map(|t| shlex::try_quote(t).unwrap_or(std::borrow::Cow::Borrowed(t.as_str())).into_owned())
        .collect::<Vec<_>>()
        .join(" ");

    if had_newline {
        format!("{}\n", rejoined)
    } else {
        rejoined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn str_spec(flag: &str) -> FlagSpec {
        FlagSpec::new(flag, FlagKind::Str, Value::Strings(vec![]), "")
    }

    fn bool_spec(flag: &str) -> FlagSpec {
        FlagSpec::new(flag, FlagKind::Bool, Value::Bool(false), "")
    }

    fn int_spec(flag: &str) -> FlagSpec {
        FlagSpec::new(flag, FlagKind::Int, Value::Ints(vec![]), "")
    }

    #[test]
    fn parses_variadic_string_flag() {
        let template = vec![str_spec("--sys-notes-dirs")];
        let tokens: Vec<String> = vec!["--sys-notes-dirs", "/a", "/b"]
            .into_iter()
            .map(String::from)
            .collect();
        let (known, unknown) = parse(&tokens, &template);
        assert!(unknown.is_empty());
        assert_eq!(
            known.get("sys_notes_dirs"),
            Some(&Value::Strings(vec!["/a".into(), "/b".into()]))
        );
    }

    #[test]
    fn switch_flag_does_not_consume_following_tokens() {
        let template = vec![bool_spec("--sys-debug"), str_spec("--sys-notes-dirs")];
        let tokens: Vec<String> = vec!["--sys-debug", "--sys-notes-dirs", "/a"]
            .into_iter()
            .map(String::from)
            .collect();
        let (known, _) = parse(&tokens, &template);
        assert_eq!(known.get("sys_debug"), Some(&Value::Bool(true)));
        assert_eq!(known.get("sys_notes_dirs"), Some(&Value::Strings(vec!["/a".into()])));
    }

    #[test]
    fn unknown_tokens_preserved_in_order() {
        let template = vec![str_spec("--sys-notes-dirs")];
        let tokens: Vec<String> = vec!["ghost", "--sys-notes-dirs", "/a", "extra"]
            .into_iter()
            .map(String::from)
            .collect();
        let (_known, unknown) = parse(&tokens, &template);
        assert_eq!(unknown, vec!["ghost".to_string(), "extra".to_string()]);
    }

    #[test]
    fn int_conversion_failure_demotes_value_to_unknown() {
        let template = vec![int_spec("--sys-on-open-cooldown")];
        let tokens: Vec<String> = vec!["--sys-on-open-cooldown", "abc"]
            .into_iter()
            .map(String::from)
            .collect();
        let (known, unknown) = parse(&tokens, &template);
        assert_eq!(known.get("sys_on_open_cooldown"), Some(&Value::Ints(vec![])));
        assert_eq!(unknown, vec!["abc".to_string()]);
    }

    #[test]
    fn merge_prefers_non_empty_overrides() {
        let mut defaults = ArgMap::new();
        defaults.insert("exclude".into(), Value::Strings(vec![]));
        defaults.insert("sys_debug".into(), Value::Bool(false));

        let mut overrides = ArgMap::new();
        overrides.insert("exclude".into(), Value::Strings(vec![]));
        overrides.insert("sys_debug".into(), Value::Bool(true));

        let merged = merge(&defaults, &overrides);
        assert_eq!(merged.get("exclude"), Some(&Value::Strings(vec![])));
        assert_eq!(merged.get("sys_debug"), Some(&Value::Bool(true)));
    }

    #[test]
    fn parse_file_directives_extends_across_lines_and_tracks_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("note.md");
        std::fs::write(&file, "--force git\nsome prose\n--force todo\n").unwrap();

        let template = vec![str_spec("--force")];
        let (known, lines) = parse_file_directives(&file, &template, false).unwrap();
        assert_eq!(
            known.get("force"),
            Some(&Value::Strings(vec!["git".into(), "todo".into()]))
        );
        assert_eq!(lines.get("force"), Some(&vec![1usize, 3usize]));
    }

    #[test]
    fn only_first_line_restricts_directive_scan() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("note.md");
        std::fs::write(&file, "--force git\n--force todo\n").unwrap();

        let template = vec![str_spec("--force")];
        let (known, _lines) = parse_file_directives(&file, &template, true).unwrap();
        assert_eq!(known.get("force"), Some(&Value::Strings(vec!["git".into()])));
    }

    #[test]
    fn strip_flags_removes_flag_and_its_value_run() {
        let line = "--banner hello world --todo\n";
        let stripped = strip_flags_from_line(line, &["--banner".to_string()]);
        assert_eq!(stripped, "--todo\n");
    }

    #[test]
    fn strip_flags_preserves_negative_numeric_value() {
        let line = "--sys-on-open-cooldown -1.5 --todo";
        let stripped = strip_flags_from_line(line, &[]);
        assert_eq!(stripped, "--sys-on-open-cooldown -1.5 --todo");
    }
}
