//! The synchronizer module's own flag template (§4.B) and the resolved,
//! per-event path configuration it reads from a merged `Context::config`.

use std::path::{Path, PathBuf};

use crate::args::{ArgMap, FlagKind, FlagSpec, Template, Value};
use crate::error::SyncError;
use crate::event::resolve_path;

pub const DEFAULT_NOTES_DIR: &str = "~/.local/share/plasma_notes";
pub const DEFAULT_NOTE_ID: &str = "bfe86b19-c35c-489b-bed7-3d561471f8";
pub const DEFAULT_MARKDOWN: &str = "~/notes/todo.md";

pub fn template() -> Template {
    vec![
        FlagSpec::new(
            "--plasma-notes-dir",
            FlagKind::Str,
            Value::Strings(vec![DEFAULT_NOTES_DIR.to_string()]),
            "Directory holding the main widget (and bold-mirror) HTML notes",
        ),
        FlagSpec::new(
            "--plasma-note-id",
            FlagKind::Str,
            Value::Strings(vec![DEFAULT_NOTE_ID.to_string()]),
            "Filename of the main widget note within --plasma-notes-dir",
        ),
        FlagSpec::new(
            "--plasma-bold-note-id",
            FlagKind::Str,
            Value::Strings(vec![]),
            "Filename of the optional bold-mirror note within --plasma-notes-dir",
        ),
        FlagSpec::new(
            "--plasma-markdown",
            FlagKind::Str,
            Value::Strings(vec![DEFAULT_MARKDOWN.to_string()]),
            "Path to the canonical Markdown note",
        ),
        FlagSpec::new(
            "--plasma-checkbox-marks",
            FlagKind::Bool,
            Value::Bool(false),
            "Render ☐/☒ list-marker CSS in the main widget's style block",
        ),
    ]
}

fn expand(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

/// Resolved, absolute paths for one event's synchronizer invocation.
pub struct SyncPaths {
    pub notes_dir: PathBuf,
    pub markdown: PathBuf,
    pub widget: PathBuf,
    pub mirror: Option<PathBuf>,
    pub checkbox_marks: bool,
}

/// Finds the main widget note by configured id, falling back to the first
/// non-dotfile directory entry, and lazily creating `notes_dir` — the
/// auto-discovery fallback carried over from the original daemon (see
/// SPEC_FULL §11.1).
fn resolve_widget_path(notes_dir: &Path, note_id: &str) -> Result<PathBuf, SyncError> {
    let configured = notes_dir.join(note_id);
    match std::fs::read_dir(notes_dir) {
        Ok(entries) => {
            let mut names: Vec<String> = entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.file_name().into_string().ok())
                .collect();
            names.sort();
            if names.iter().any(|n| n == note_id) {
                return Ok(configured);
            }
            if let Some(first) = names.iter().find(|n| !n.starts_with('.')) {
                return Ok(notes_dir.join(first));
            }
            Ok(configured)
        }
        Err(_) => {
            std::fs::create_dir_all(notes_dir)
                .map_err(|_| SyncError::MissingConfiguredPath("plasma-notes-dir"))?;
            Ok(configured)
        }
    }
}

pub fn resolve(config: &ArgMap) -> Result<SyncPaths, SyncError> {
    let notes_dir = expand(
        config
            .get("plasma_notes_dir")
            .and_then(|v| v.first_string())
            .unwrap_or(DEFAULT_NOTES_DIR),
    );
    let note_id = config
        .get("plasma_note_id")
        .and_then(|v| v.first_string())
        .unwrap_or(DEFAULT_NOTE_ID)
        .to_string();
    let markdown_raw = config
        .get("plasma_markdown")
        .and_then(|v| v.first_string())
        .unwrap_or(DEFAULT_MARKDOWN);
    if markdown_raw.trim().is_empty() {
        return Err(SyncError::MissingConfiguredPath("plasma-markdown"));
    }
    let markdown = expand(markdown_raw);

    let widget = resolve_widget_path(&notes_dir, &note_id)?;

    let mirror = config
        .get("plasma_bold_note_id")
        .and_then(|v| v.first_string())
        .filter(|s| !s.trim().is_empty())
        .map(|id| notes_dir.join(id));

    let checkbox_marks = config.get("plasma_checkbox_marks").map(|v| v.as_bool()).unwrap_or(false);

    Ok(SyncPaths {
        notes_dir,
        markdown,
        widget,
        mirror,
        checkbox_marks,
    })
}

impl SyncPaths {
    /// True if `path` (already absolute/symlink-resolved) is the markdown file.
    pub fn is_markdown(&self, path: &Path) -> bool {
        resolve_path(&self.markdown) == path
    }

    pub fn is_widget(&self, path: &Path) -> bool {
        resolve_path(&self.widget) == path
    }

    pub fn is_mirror(&self, path: &Path) -> bool {
        self.mirror.as_deref().map(resolve_path).as_deref() == Some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::defaults_of;

    #[test]
    fn resolves_widget_by_configured_id_when_present() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("note-id"), "x").unwrap();
        let widget = resolve_widget_path(dir.path(), "note-id").unwrap();
        assert_eq!(widget, dir.path().join("note-id"));
    }

    #[test]
    fn falls_back_to_first_non_dotfile_entry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".hidden"), "x").unwrap();
        std::fs::write(dir.path().join("actual.html"), "x").unwrap();
        let widget = resolve_widget_path(dir.path(), "missing-id").unwrap();
        assert_eq!(widget, dir.path().join("actual.html"));
    }

    #[test]
    fn missing_markdown_flag_is_a_sync_error() {
        let mut config = defaults_of(&template());
        config.insert("plasma_markdown".into(), Value::Strings(vec![String::new()]));
        let err = resolve(&config).unwrap_err();
        assert!(matches!(err, SyncError::MissingConfiguredPath("plasma-markdown")));
    }
}
