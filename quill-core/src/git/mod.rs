//! Git Committer module (§4.F): per-repository debounced batcher that
//! stages, commits, optionally merges, and pushes with retry and backoff.
//! `GitCommitter` is the `Module`-trait front door; it only ever enqueues
//! onto the mailbox the background `worker` owns — per spec §3 "this module
//! never writes observable files", it always returns `None`.

pub mod batch;
pub mod config;
pub mod process;
pub mod worker;

use std::path::Path;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;

use log::debug;

use crate::event::resolve_path;
use crate::module::{ChangeMap, Context, EventKind, Module, System};
use crate::notify::Notifier;

use batch::QueueItem;

pub struct GitCommitter {
    sender: Sender<QueueItem>,
    worker: std::sync::Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl GitCommitter {
    pub fn new() -> Self {
        Self::with_notifier(Arc::new(Notifier::new()))
    }

    pub fn with_notifier(notifier: Arc<Notifier>) -> Self {
        let (sender, receiver) = mpsc::channel();
        let handle = worker::spawn(receiver, notifier);
        GitCommitter {
            sender,
            worker: std::sync::Mutex::new(Some(handle)),
        }
    }

    fn enqueue(&self, ctx: &Context, sys: &System, path: &Path, wants_pull: bool) {
        if path.components().any(|c| c.as_os_str() == ".git") {
            return;
        }
        let Some(repo_root) = process::find_git_root(path) else {
            debug!("git committer: {:?} is not inside a repository", path);
            return;
        };
        let item = QueueItem {
            repo_root,
            event_type: sys.event.kind_name(),
            hinted_path: Some(path.to_path_buf()),
            config: config::resolve(ctx.config),
            wants_pull,
        };
        // The worker owns ordering and batching; a disconnected receiver
        // only happens if the worker thread panicked, in which case there
        // is nothing left to notify (§5 "background task with mailbox").
        let _ = self.sender.send(item);
    }
}

impl Default for GitCommitter {
    fn default() -> Self {
        Self::new()
    }
}

/// Joins the background worker so the daemon doesn't exit mid-commit
/// (§5 "the process exits only after join"). Dropping the sender closes the
/// channel, which drains and flushes any pending batches before returning.
impl Drop for GitCommitter {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.worker.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Module for GitCommitter {
    fn name(&self) -> &'static str {
        "git"
    }

    fn priority(&self) -> i64 {
        50
    }

    fn template(&self) -> crate::args::Template {
        config::template()
    }

    fn created(&self, ctx: &Context, sys: &System) -> Option<ChangeMap> {
        self.enqueue(ctx, sys, resolve_path(ctx.path).as_path(), false);
        None
    }

    fn modified(&self, ctx: &Context, sys: &System) -> Option<ChangeMap> {
        self.enqueue(ctx, sys, resolve_path(ctx.path).as_path(), false);
        None
    }

    fn moved(&self, ctx: &Context, sys: &System) -> Option<ChangeMap> {
        self.enqueue(ctx, sys, resolve_path(ctx.path).as_path(), false);
        None
    }

    fn deleted(&self, ctx: &Context, sys: &System) -> Option<ChangeMap> {
        self.enqueue(ctx, sys, resolve_path(ctx.path).as_path(), false);
        None
    }

    fn opened(&self, ctx: &Context, sys: &System) -> Option<ChangeMap> {
        let wants_pull = ctx.config.get("git_auto_pull").map(|v| v.as_bool()).unwrap_or(false);
        self.enqueue(ctx, sys, resolve_path(ctx.path).as_path(), wants_pull);
        None
    }

    fn handles(&self, kind: EventKind) -> bool {
        matches!(
            kind,
            EventKind::Created | EventKind::Modified | EventKind::Moved | EventKind::Deleted | EventKind::Opened
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{self, ArgLines};
    use crate::event::Event;

    fn init_repo(dir: &Path) {
        std::process::Command::new("git")
            .args(["init", "-q"])
            .current_dir(dir)
            .status()
            .expect("git init");
        std::process::Command::new("git")
            .args(["config", "user.email", "quill@example.test"])
            .current_dir(dir)
            .status()
            .unwrap();
        std::process::Command::new("git")
            .args(["config", "user.name", "quill"])
            .current_dir(dir)
            .status()
            .unwrap();
    }

    #[test]
    fn non_repo_path_is_not_enqueued_and_module_never_writes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("note.md");
        std::fs::write(&file, "hello").unwrap();

        let committer = GitCommitter::new();
        let template = config::template();
        let config = args::defaults_of(&template);
        let lines = ArgLines::new();
        let event = Event::Modified {
            path: file.clone(),
            is_dir: false,
        };
        let modules: Vec<Box<dyn Module>> = Vec::new();
        let ctx = Context {
            path: &file,
            config: &config,
            arg_lines: &lines,
        };
        let sys = System {
            event: &event,
            template: &template,
            modules: &modules,
        };
        assert!(committer.modified(&ctx, &sys).is_none());
    }

    #[test]
    fn modify_inside_repo_eventually_produces_a_commit() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let file = dir.path().join("note.md");
        std::fs::write(&file, "hello").unwrap();

        let template = config::template();
        let mut config = args::defaults_of(&template);
        config.insert("git_debounce".into(), crate::args::Value::Floats(vec![0.05]));
        let lines = ArgLines::new();

        let committer = GitCommitter::new();
        let event = Event::Modified {
            path: file.clone(),
            is_dir: false,
        };
        let modules: Vec<Box<dyn Module>> = Vec::new();
        let ctx = Context {
            path: &file,
            config: &config,
            arg_lines: &lines,
        };
        let sys = System {
            event: &event,
            template: &template,
            modules: &modules,
        };
        assert!(committer.modified(&ctx, &sys).is_none());

        drop(committer); // joins the worker, which flushes the batch

        let log = std::process::Command::new("git")
            .args(["log", "--oneline"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        let log_text = String::from_utf8_lossy(&log.stdout);
        assert!(log_text.contains("modified"), "expected a commit, got: {}", log_text);
    }
}
