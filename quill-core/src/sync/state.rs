//! The synchronizer module itself: wires `doc`/`html` into the `Module`
//! trait, owning the process-wide hash state described in SPEC_FULL §4.E.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, warn};

use crate::error::SyncError;
use crate::event::resolve_path;
use crate::module::{ChangeMap, Context, EventKind, Module, System};

use super::config::{self, SyncPaths};
use super::doc::{self, Doc};
use super::html;

/// The three agreement-point hashes plus the last-applied checkbox-toggle
/// state, process-wide and initialized at most once (§3 "Sync state").
struct SyncState {
    initialized: bool,
    canonical_doc_hash: Option<String>,
    main_bold_hash: Option<String>,
    mirror_items_hash: Option<String>,
    checkbox_marks_applied: Option<bool>,
}

impl SyncState {
    fn fresh() -> Self {
        SyncState {
            initialized: false,
            canonical_doc_hash: None,
            main_bold_hash: None,
            mirror_items_hash: None,
            checkbox_marks_applied: None,
        }
    }
}

pub struct PlasmaSync {
    state: Mutex<SyncState>,
}

impl PlasmaSync {
    pub fn new() -> Self {
        PlasmaSync {
            state: Mutex::new(SyncState::fresh()),
        }
    }
}

impl Default for PlasmaSync {
    fn default() -> Self {
        Self::new()
    }
}

fn read_to_string(path: &Path) -> Result<String, SyncError> {
    std::fs::read_to_string(path).map_err(|source| SyncError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn write_if_changed(path: &Path, content: &str) -> Result<bool, SyncError> {
    if let Ok(existing) = std::fs::read_to_string(path) {
        if existing == content {
            return Ok(false);
        }
    }
    std::fs::write(path, content).map_err(|source| SyncError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(true)
}

fn record_write(changes: &mut ChangeMap, path: &Path) {
    *changes.entry(path.to_path_buf()).or_insert(0) += 1;
}

/// Reads the on-disk state once per process, preferring Markdown, then the
/// main widget, else starting from an empty document (§4.E step 1).
fn lazily_initialize(state: &mut SyncState, paths: &SyncPaths) {
    if state.initialized {
        return;
    }
    state.initialized = true;

    let doc = if let Ok(md) = read_to_string(&paths.markdown) {
        doc::md_to_doc(&md)
    } else if let Ok(html_src) = read_to_string(&paths.widget) {
        html::parse_html(&html_src, paths.widget.clone()).unwrap_or_default()
    } else {
        Doc::new()
    };

    state.canonical_doc_hash = Some(doc::hash_doc(&doc));
    state.main_bold_hash = Some(doc::hash_items(&doc::bold_items(&doc)));

    if let Some(mirror) = &paths.mirror {
        let items = read_to_string(mirror)
            .map(|text| text.lines().map(str::to_string).filter(|l| !l.trim().is_empty()).collect::<Vec<_>>())
            .unwrap_or_default();
        state.mirror_items_hash = Some(doc::hash_items(&items));
    }
}

/// Applies the checkbox-marker CSS toggle to `widget` independently of any
/// semantic change, recording a write in `changes` if the style block moved.
fn apply_toggle(state: &mut SyncState, paths: &SyncPaths, changes: &mut ChangeMap) {
    if state.checkbox_marks_applied == Some(paths.checkbox_marks) {
        return;
    }
    let existing = match read_to_string(&paths.widget) {
        Ok(s) => s,
        Err(_) => return,
    };
    match html::apply_checkbox_toggle(&existing, paths.checkbox_marks) {
        Some(updated) => match std::fs::write(&paths.widget, &updated) {
            Ok(()) => {
                state.checkbox_marks_applied = Some(paths.checkbox_marks);
                record_write(changes, &paths.widget);
            }
            Err(e) => warn!("failed to rewrite checkbox-toggle style block in {:?}: {}", paths.widget, e),
        },
        None => state.checkbox_marks_applied = Some(paths.checkbox_marks),
    }
}

fn write_mirror_if_changed(
    state: &mut SyncState,
    paths: &SyncPaths,
    items: &[String],
    changes: &mut ChangeMap,
) -> Result<(), SyncError> {
    let Some(mirror) = &paths.mirror else {
        return Ok(());
    };
    let hash = doc::hash_items(items);
    if state.mirror_items_hash.as_deref() == Some(hash.as_str()) {
        return Ok(());
    }
    let rendered = html::render_mirror_html(items, paths.checkbox_marks);
    if write_if_changed(mirror, &rendered)? {
        record_write(changes, mirror);
    }
    state.mirror_items_hash = Some(hash);
    Ok(())
}

fn markdown_to_main(state: &mut SyncState, paths: &SyncPaths) -> Result<ChangeMap, SyncError> {
    let md = read_to_string(&paths.markdown)?;
    let doc = doc::md_to_doc(&md);
    let hash = doc::hash_doc(&doc);
    let mut changes = ChangeMap::new();

    if state.canonical_doc_hash.as_deref() == Some(hash.as_str()) {
        apply_toggle(state, paths, &mut changes);
        return Ok(changes);
    }

    state.canonical_doc_hash = Some(hash);
    let rendered = html::render_html(&doc, paths.checkbox_marks);
    if write_if_changed(&paths.widget, &rendered)? {
        record_write(&mut changes, &paths.widget);
    }
    state.checkbox_marks_applied = Some(paths.checkbox_marks);

    let items = doc::bold_items(&doc);
    state.main_bold_hash = Some(doc::hash_items(&items));
    write_mirror_if_changed(state, paths, &items, &mut changes)?;

    Ok(changes)
}

fn main_to_markdown(state: &mut SyncState, paths: &SyncPaths) -> Result<ChangeMap, SyncError> {
    let html_src = read_to_string(&paths.widget)?;
    let doc = html::parse_html(&html_src, paths.widget.clone())?;
    let hash = doc::hash_doc(&doc);
    let mut changes = ChangeMap::new();

    apply_toggle(state, paths, &mut changes);

    if state.canonical_doc_hash.as_deref() != Some(hash.as_str()) {
        state.canonical_doc_hash = Some(hash);
        let md = doc::doc_to_md(&doc);
        if write_if_changed(&paths.markdown, &md)? {
            record_write(&mut changes, &paths.markdown);
        }
    }

    let items = doc::bold_items(&doc);
    state.main_bold_hash = Some(doc::hash_items(&items));
    write_mirror_if_changed(state, paths, &items, &mut changes)?;

    Ok(changes)
}

fn mirror_to_main_and_markdown(state: &mut SyncState, paths: &SyncPaths) -> Result<ChangeMap, SyncError> {
    let mirror_path = paths
        .mirror
        .as_ref()
        .ok_or(SyncError::MissingConfiguredPath("plasma-bold-note-id"))?;
    let text = read_to_string(mirror_path)?;
    let items: Vec<String> = text.lines().map(str::to_string).filter(|l| !l.trim().is_empty()).collect();
    let hash = doc::hash_items(&items);
    let mut changes = ChangeMap::new();

    if state.mirror_items_hash.as_deref() == Some(hash.as_str()) {
        apply_toggle(state, paths, &mut changes);
        return Ok(changes);
    }
    state.mirror_items_hash = Some(hash);

    let main_html = read_to_string(&paths.widget)?;
    let doc = html::parse_html(&main_html, paths.widget.clone())?;
    let replaced = doc::apply_mirror(&doc, &items);

    state.canonical_doc_hash = Some(doc::hash_doc(&replaced));
    let rendered = html::render_html(&replaced, paths.checkbox_marks);
    if write_if_changed(&paths.widget, &rendered)? {
        record_write(&mut changes, &paths.widget);
    }
    state.checkbox_marks_applied = Some(paths.checkbox_marks);

    let md = doc::doc_to_md(&replaced);
    if write_if_changed(&paths.markdown, &md)? {
        record_write(&mut changes, &paths.markdown);
    }

    let canonical_items = doc::bold_items(&replaced);
    state.main_bold_hash = Some(doc::hash_items(&canonical_items));
    let canonical_mirror = html::render_mirror_html(&canonical_items, paths.checkbox_marks);
    if write_if_changed(mirror_path, &canonical_mirror)? {
        record_write(&mut changes, mirror_path);
    }
    state.mirror_items_hash = Some(doc::hash_items(&canonical_items));

    Ok(changes)
}

fn handle_path(inner: &Mutex<SyncState>, ctx: &Context, path: &Path) -> Option<ChangeMap> {
    let paths = match config::resolve(ctx.config) {
        Ok(p) => p,
        Err(e) => {
            warn!("plasma sync: {}", e);
            return None;
        }
    };

    let mut state = inner.lock().unwrap_or_else(|p| p.into_inner());
    lazily_initialize(&mut state, &paths);

    let resolved = resolve_path(path);
    let outcome = if paths.is_markdown(&resolved) {
        markdown_to_main(&mut state, &paths)
    } else if paths.is_widget(&resolved) {
        main_to_markdown(&mut state, &paths)
    } else if paths.is_mirror(&resolved) {
        mirror_to_main_and_markdown(&mut state, &paths)
    } else {
        debug!("plasma sync: event path {:?} matches none of the configured notes", resolved);
        return None;
    };

    match outcome {
        Ok(changes) if changes.is_empty() => None,
        Ok(changes) => Some(changes),
        Err(SyncError::PartialHtml(p)) => {
            debug!("plasma sync: skipping reconcile, partial HTML document at {:?}", p);
            None
        }
        Err(e) => {
            warn!("plasma sync: {}", e);
            None
        }
    }
}

impl Module for PlasmaSync {
    fn name(&self) -> &'static str {
        "plasma_notes_sync"
    }

    fn priority(&self) -> i64 {
        30
    }

    fn template(&self) -> Vec<crate::args::FlagSpec> {
        config::template()
    }

    fn created(&self, ctx: &Context, _sys: &System) -> Option<ChangeMap> {
        handle_path(&self.state, ctx, ctx.path)
    }

    fn modified(&self, ctx: &Context, _sys: &System) -> Option<ChangeMap> {
        handle_path(&self.state, ctx, ctx.path)
    }

    fn moved(&self, ctx: &Context, _sys: &System) -> Option<ChangeMap> {
        handle_path(&self.state, ctx, ctx.path)
    }

    fn handles(&self, kind: EventKind) -> bool {
        matches!(kind, EventKind::Created | EventKind::Modified | EventKind::Moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{self, ArgLines};
    use crate::event::Event;

    fn ctx_for<'a>(path: &'a Path, config: &'a crate::args::ArgMap, lines: &'a ArgLines) -> Context<'a> {
        Context {
            path,
            config,
            arg_lines: lines,
        }
    }

    fn sys_for(event: &Event, template: &crate::args::Template, modules: &[Box<dyn Module>]) -> System<'_> {
        System {
            event,
            template,
            modules,
        }
    }

    #[test]
    fn markdown_write_propagates_to_widget() {
        let dir = tempfile::tempdir().unwrap();
        let markdown = dir.path().join("t.md");
        let widget = dir.path().join(".w.html");
        std::fs::write(&markdown, "- [ ] eggs\n- [x] milk\n**Urgent**").unwrap();
        std::fs::write(&widget, "placeholder").unwrap();

        let template = config::template();
        let mut config = args::defaults_of(&template);
        config.insert(
            "plasma_markdown".into(),
            crate::args::Value::Strings(vec![markdown.display().to_string()]),
        );
        config.insert(
            "plasma_notes_dir".into(),
            crate::args::Value::Strings(vec![dir.path().display().to_string()]),
        );
        config.insert(
            "plasma_note_id".into(),
            crate::args::Value::Strings(vec![".w.html".to_string()]),
        );

        let lines = ArgLines::new();
        let sync = PlasmaSync::new();
        let modules: Vec<Box<dyn Module>> = Vec::new();

        // The very first event only establishes the baseline from what's
        // already on disk; it must not rewrite a widget that matches.
        let event = Event::Modified {
            path: markdown.clone(),
            is_dir: false,
        };
        let ctx = ctx_for(&markdown, &config, &lines);
        let sys = sys_for(&event, &template, &modules);
        assert!(sync.modified(&ctx, &sys).is_none());

        // A genuine subsequent edit must propagate.
        std::fs::write(&markdown, "- [ ] eggs\n- [x] milk\n**Urgent**\n**Later**").unwrap();
        let event2 = Event::Modified {
            path: markdown.clone(),
            is_dir: false,
        };
        let ctx2 = ctx_for(&markdown, &config, &lines);
        let sys2 = sys_for(&event2, &template, &modules);
        let changes = sync.modified(&ctx2, &sys2).expect("expected a write");
        assert_eq!(changes.get(&widget), Some(&1));

        let widget_html = std::fs::read_to_string(&widget).unwrap();
        assert!(widget_html.contains("eggs"));
        assert!(widget_html.contains("font-weight:600"));
        assert!(widget_html.contains("Later"));

        // Third invocation on unchanged markdown is a no-op.
        let event3 = Event::Modified {
            path: markdown.clone(),
            is_dir: false,
        };
        let ctx3 = ctx_for(&markdown, &config, &lines);
        let sys3 = sys_for(&event3, &template, &modules);
        assert!(sync.modified(&ctx3, &sys3).is_none());
    }

    #[test]
    fn missing_configuration_is_handled_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        let markdown = dir.path().join("t.md");
        std::fs::write(&markdown, "hello").unwrap();

        let template = config::template();
        let mut config = args::defaults_of(&template);
        config.insert("plasma_markdown".into(), crate::args::Value::Strings(vec![String::new()]));

        let lines = ArgLines::new();
        let sync = PlasmaSync::new();
        let event = Event::Modified {
            path: markdown.clone(),
            is_dir: false,
        };
        let modules: Vec<Box<dyn Module>> = Vec::new();
        let ctx = ctx_for(&markdown, &config, &lines);
        let sys = sys_for(&event, &template, &modules);
        assert!(sync.modified(&ctx, &sys).is_none());
    }
}
