//! Renamer (§4.G): when `--r <newname>` is present, atomically renames the
//! file within its own directory, refusing if the destination exists.
//! Grounded on `lucy_notes_manager/modules/renamer.py`.

use std::path::PathBuf;

use crate::args::{FlagKind, FlagSpec, Template, Value};
use crate::module::{ChangeMap, Context, EventKind, Module, System};

pub struct Renamer;

impl Renamer {
    pub fn new() -> Self {
        Renamer
    }
}

impl Default for Renamer {
    fn default() -> Self {
        Self::new()
    }
}

fn apply(ctx: &Context) -> Option<ChangeMap> {
    let new_name = ctx.config.get("r").and_then(|v| v.first_string())?.trim().to_string();
    if new_name.is_empty() {
        return None;
    }
    if ctx.path.is_dir() {
        return None;
    }

    let dir = ctx.path.parent()?;
    let new_path: PathBuf = dir.join(&new_name);

    if new_path == ctx.path {
        return None;
    }
    if new_path.exists() {
        return None;
    }

    std::fs::rename(ctx.path, &new_path).ok()?;

    let mut changes = ChangeMap::new();
    changes.insert(ctx.path.to_path_buf(), 1);
    changes.insert(new_path, 1);
    Some(changes)
}

impl Module for Renamer {
    fn name(&self) -> &'static str {
        "renamer"
    }

    fn priority(&self) -> i64 {
        20
    }

    fn template(&self) -> Template {
        vec![FlagSpec::new("--r", FlagKind::Str, Value::Strings(vec![]), "Rename the file within its directory")]
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
    use crate::args::{self, ArgLines};

    #[test]
    fn renames_when_destination_is_free() {
        let dir = tempfile::tempdir().unwrap();
        let old_path = dir.path().join("note.md");
        std::fs::write(&old_path, "hello").unwrap();

        let template = Renamer.template();
        let mut config = args::defaults_of(&template);
        config.insert("r".into(), Value::Strings(vec!["renamed.md".into()]));
        let lines = ArgLines::new();
        let ctx = Context {
            path: &old_path,
            config: &config,
            arg_lines: &lines,
        };
        let changes = apply(&ctx).unwrap();
        assert!(!old_path.exists());
        assert!(dir.path().join("renamed.md").exists());
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn refuses_when_destination_exists() {
        let dir = tempfile::tempdir().unwrap();
        let old_path = dir.path().join("note.md");
        std::fs::write(&old_path, "hello").unwrap();
        std::fs::write(dir.path().join("taken.md"), "x").unwrap();

        let template = Renamer.template();
        let mut config = args::defaults_of(&template);
        config.insert("r".into(), Value::Strings(vec!["taken.md".into()]));
        let lines = ArgLines::new();
        let ctx = Context {
            path: &old_path,
            config: &config,
            arg_lines: &lines,
        };
        assert!(apply(&ctx).is_none());
        assert!(old_path.exists());
    }
}
