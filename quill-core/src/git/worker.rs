//! The committer's single background thread (§5 "Background task with
//! mailbox"): drains the mpsc queue into per-repo batches, flushes batches
//! past their debounce window, and runs the stage/commit/pull/push sequence
//! with merge-conflict auto-resolution and exponential push backoff.
//! Grounded on `lucy_notes_manager/modules/git.py`'s `_worker_loop`/
//! `_process_batch`, extended per spec §4.F with the safe pull-merge and
//! conflict-resolution machinery the original never implemented.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, warn};
use logging_timer::stimer;

use crate::error::GitError;
use crate::notify::Notifier;

use super::batch::{GitConfig, MergeMode, PushBackoff, QueueItem, RepoBatch};
use super::process;

const QUEUE_POLL: Duration = Duration::from_millis(200);

/// Output substrings that mean "the remote moved ahead of us" and so are
/// worth retrying after a safe pull-merge, per spec §4.F step 6.
const RETRYABLE_PUSH_REJECTIONS: &[&str] = &[
    "non-fast-forward",
    "fetch first",
    "failed to push some refs",
    "rejected",
    "remote contains work",
    "updates were rejected",
];

pub fn spawn(receiver: Receiver<QueueItem>, notifier: Arc<Notifier>) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("quill-git-committer".to_string())
        .spawn(move || run_loop(receiver, notifier))
        .expect("failed to spawn git committer worker thread")
}

fn run_loop(receiver: Receiver<QueueItem>, notifier: Arc<Notifier>) {
    let mut pending: HashMap<PathBuf, RepoBatch> = HashMap::new();
    let backoff: Mutex<HashMap<PathBuf, PushBackoff>> = Mutex::new(HashMap::new());

    loop {
        match receiver.recv_timeout(QUEUE_POLL) {
            Ok(item) => {
                if let Some(existing) = pending.get_mut(&item.repo_root) {
                    existing.absorb(item);
                } else {
                    let root = item.repo_root.clone();
                    pending.insert(root, RepoBatch::new(item));
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                flush_all(&mut pending, &backoff, &notifier);
                return;
            }
        }

        let now = Instant::now();
        let due: Vec<(PathBuf, RepoBatch)> = pending
            .iter()
            .filter(|(_, b)| b.ready(now))
            .map(|(root, _)| root.clone())
            .filter_map(|root| pending.remove(&root).map(|b| (root, b)))
            .collect();

        for (root, batch) in due {
            process_batch(&root, &batch, &backoff, &notifier);
        }
    }
}

fn flush_all(pending: &mut HashMap<PathBuf, RepoBatch>, backoff: &Mutex<HashMap<PathBuf, PushBackoff>>, notifier: &Notifier) {
    for (root, batch) in pending.drain() {
        process_batch(&root, &batch, backoff, notifier);
    }
}

fn notify_failure(notifier: &Notifier, key_prefix: &str, root: &Path, op: &str, excerpt: &str) {
    notifier.notify(
        &format!("{}:{}", key_prefix, root.display()),
        "quill: git committer",
        &format!("Repository:\n{}\n\nCommand: git {}\n\nError:\n{}", root.display(), op, excerpt),
    );
}

fn process_batch(
    root: &Path,
    batch: &RepoBatch,
    backoff: &Mutex<HashMap<PathBuf, PushBackoff>>,
    notifier: &Notifier,
) {
    let _tmr = stimer!("git-batch-process");
    let env = process::build_env(batch.config.ssh_key.as_deref(), notifier);

    if process::merge_in_progress(root) {
        if let Err(e) = resolve_in_progress_merge(root, &env, &batch.config, notifier) {
            warn!("git committer: {}", e);
            return;
        }
    }

    let opened_only = batch.event_types.len() == 1 && batch.event_types.contains("opened");
    if opened_only {
        if batch.config.auto_pull {
            if let Err(e) = safe_pull_merge(root, &env, &batch.config, notifier) {
                debug!("git committer: opened-event auto-pull skipped: {}", e);
            }
        }
        return;
    }

    if !stage_and_commit(root, &env, batch, notifier) {
        return;
    }

    if batch.wants_pull {
        if let Err(e) = safe_pull_merge(root, &env, &batch.config, notifier) {
            debug!("git committer: requested pull skipped: {}", e);
        }
    }

    push_with_backoff(root, &env, &batch.config, backoff, notifier);
}

/// Stages all changes, commits if there is anything to commit, tolerating
/// "nothing to commit" silently. Returns false if a step failed (and the
/// caller should not proceed to pull/push).
fn stage_and_commit(root: &Path, env: &HashMap<String, String>, batch: &RepoBatch, notifier: &Notifier) -> bool {
    let add = match process::run_git(root, &["add", "-A"], env, batch.config.timeouts.add, "add") {
        Ok(out) => out,
        Err(e) => {
            handle_timeout_or_fail(root, "add", &e, notifier);
            return false;
        }
    };
    if !add.success() {
        notify_failure(notifier, "addfail", root, "add", &add.excerpt());
        return false;
    }

    let status = match process::run_git(root, &["status", "--porcelain"], env, batch.config.timeouts.status, "status") {
        Ok(out) => out,
        Err(e) => {
            handle_timeout_or_fail(root, "status", &e, notifier);
            return false;
        }
    };
    if !status.success() {
        notify_failure(notifier, "statusfail", root, "status", &status.excerpt());
        return false;
    }

    let porcelain = status.stdout.trim();
    if porcelain.is_empty() {
        return true;
    }

    let changed_paths = process::parse_porcelain_paths(porcelain);
    let message = batch.commit_message(&changed_paths);
    let commit = match process::run_git(root, &["commit", "-m", &message], env, batch.config.timeouts.commit, "commit") {
        Ok(out) => out,
        Err(e) => {
            handle_timeout_or_fail(root, "commit", &e, notifier);
            return false;
        }
    };
    if !commit.success() && !commit.combined_lower().contains("nothing to commit") {
        notify_failure(notifier, "commitfail", root, "commit", &commit.excerpt());
        return false;
    }
    true
}

fn handle_timeout_or_fail(root: &Path, op: &'static str, err: &GitError, notifier: &Notifier) {
    notifier.notify(
        &format!("timeout:{}:{}", op, root.display()),
        "quill: git committer",
        &err.to_string(),
    );
}

fn push_with_backoff(
    root: &Path,
    env: &HashMap<String, String>,
    config: &GitConfig,
    backoff: &Mutex<HashMap<PathBuf, PushBackoff>>,
    notifier: &Notifier,
) {
    {
        let mut table = backoff.lock().unwrap_or_else(|p| p.into_inner());
        let entry = table.entry(root.to_path_buf()).or_insert_with(|| PushBackoff::idle(config.backoff_start));
        if entry.blocked(Instant::now()) {
            return;
        }
    }

    let result = attempt_push(root, env, config, notifier);
    match result {
        Ok(true) => {
            let mut table = backoff.lock().unwrap_or_else(|p| p.into_inner());
            table
                .entry(root.to_path_buf())
                .or_insert_with(|| PushBackoff::idle(config.backoff_start))
                .reset(config.backoff_start);
        }
        Ok(false) => {
            let mut table = backoff.lock().unwrap_or_else(|p| p.into_inner());
            table
                .entry(root.to_path_buf())
                .or_insert_with(|| PushBackoff::idle(config.backoff_start))
                .register_failure(config.backoff_max);
        }
        Err(e) => {
            notify_failure(notifier, "timeout:push", root, "push", &e.to_string());
            let mut table = backoff.lock().unwrap_or_else(|p| p.into_inner());
            table
                .entry(root.to_path_buf())
                .or_insert_with(|| PushBackoff::idle(config.backoff_start))
                .register_failure(config.backoff_max);
        }
    }
}

/// Pushes once; on a retryable rejection with auto-merge-on-push enabled,
/// performs a safe pull-merge and retries exactly once. Returns `Ok(true)`
/// on eventual success, `Ok(false)` on a registered (non-timeout) failure.
fn attempt_push(root: &Path, env: &HashMap<String, String>, config: &GitConfig, notifier: &Notifier) -> Result<bool, GitError> {
    let push = process::run_git(root, &["push"], env, config.timeouts.push, "push")?;
    if push.success() {
        return Ok(true);
    }

    let lower = push.combined_lower();
    let retryable = RETRYABLE_PUSH_REJECTIONS.iter().any(|s| lower.contains(s));
    if retryable && config.auto_merge_on_push {
        if safe_pull_merge(root, env, config, notifier).is_ok() {
            let retry = process::run_git(root, &["push"], env, config.timeouts.push, "push")?;
            if retry.success() {
                return Ok(true);
            }
            notify_failure(notifier, "pushfail", root, "push", &retry.excerpt());
            return Ok(false);
        }
    }

    notify_failure(notifier, "pushfail", root, "push", &push.excerpt());
    Ok(false)
}

/// `pull --no-rebase --no-edit`, never rebase or force. Requires a
/// configured upstream. On conflict, resolves per `config.merge_mode` and
/// commits the merge; aborts and notifies if resolution fails or the mode
/// is `none`.
fn safe_pull_merge(root: &Path, env: &HashMap<String, String>, config: &GitConfig, notifier: &Notifier) -> Result<(), GitError> {
    let upstream = process::run_git(
        root,
        &["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"],
        env,
        config.timeouts.status,
        "rev-parse",
    )?;
    if !upstream.success() {
        notifier.notify(
            &format!("noupstream:{}", root.display()),
            "quill: git committer",
            &format!("No upstream configured for {}", root.display()),
        );
        return Err(GitError::NoUpstream(root.to_path_buf()));
    }

    let pull = process::run_git(root, &["pull", "--no-rebase", "--no-edit"], env, config.timeouts.pull, "pull")?;
    if pull.success() {
        return Ok(());
    }

    if !process::merge_in_progress(root) {
        notify_failure(notifier, "pullfail", root, "pull", &pull.excerpt());
        return Err(GitError::CommandFailed {
            op: "pull",
            root: root.to_path_buf(),
            excerpt: pull.excerpt(),
        });
    }

    resolve_in_progress_merge(root, env, config, notifier)
}

/// Resolves a merge that is already in progress (`.git/MERGE_HEAD` present),
/// per the configured mode. `none` aborts; the other three modes resolve
/// every conflicted path then commit the merge without prompting.
fn resolve_in_progress_merge(root: &Path, env: &HashMap<String, String>, config: &GitConfig, notifier: &Notifier) -> Result<(), GitError> {
    if config.merge_mode == MergeMode::None {
        abort_merge(root, env, config, notifier);
        return Err(GitError::UnresolvedConflict {
            root: root.to_path_buf(),
            excerpt: "merge mode is none; conflict left for manual resolution".to_string(),
        });
    }

    let conflicted = match process::run_git(root, &["diff", "--name-only", "--diff-filter=U"], env, config.timeouts.status, "diff") {
        Ok(out) if out.success() => out.stdout.lines().map(str::to_string).filter(|l| !l.trim().is_empty()).collect::<Vec<_>>(),
        _ => {
            abort_merge(root, env, config, notifier);
            return Err(GitError::UnresolvedConflict {
                root: root.to_path_buf(),
                excerpt: "could not list conflicted paths".to_string(),
            });
        }
    };

    if conflicted.is_empty() {
        abort_merge(root, env, config, notifier);
        return Err(GitError::UnresolvedConflict {
            root: root.to_path_buf(),
            excerpt: "merge in progress but no conflicted paths found".to_string(),
        });
    }

    for path in &conflicted {
        if !resolve_one_conflict(root, env, config, path) {
            abort_merge(root, env, config, notifier);
            return Err(GitError::UnresolvedConflict {
                root: root.to_path_buf(),
                excerpt: format!("failed to resolve conflict in {}", path),
            });
        }
        let _ = process::run_git(root, &["add", "--", path], env, config.timeouts.add, "add");
    }

    let commit = process::run_git(root, &["commit", "--no-edit"], env, config.timeouts.commit, "commit")?;
    if !commit.success() && !commit.combined_lower().contains("nothing to commit") {
        notify_failure(notifier, "mergecommitfail", root, "commit", &commit.excerpt());
        return Err(GitError::UnresolvedConflict {
            root: root.to_path_buf(),
            excerpt: commit.excerpt(),
        });
    }
    Ok(())
}

fn abort_merge(root: &Path, env: &HashMap<String, String>, config: &GitConfig, notifier: &Notifier) {
    let result = process::run_git(root, &["merge", "--abort"], env, config.timeouts.commit, "merge");
    let excerpt = match result {
        Ok(out) => out.excerpt(),
        Err(e) => e.to_string(),
    };
    notifier.notify(
        &format!("mergeabort:{}", root.display()),
        "quill: git committer",
        &format!("Merge aborted in {}:\n{}", root.display(), excerpt),
    );
}

fn resolve_one_conflict(root: &Path, env: &HashMap<String, String>, config: &GitConfig, path: &str) -> bool {
    match config.merge_mode {
        MergeMode::None => false,
        MergeMode::Ours => checkout_side(root, env, config, path, "--ours"),
        MergeMode::Theirs => checkout_side(root, env, config, path, "--theirs"),
        MergeMode::Union => resolve_union(root, path).unwrap_or_else(|| checkout_side(root, env, config, path, "--ours")),
    }
}

fn checkout_side(root: &Path, env: &HashMap<String, String>, config: &GitConfig, path: &str, side: &str) -> bool {
    process::run_git(root, &["checkout", side, "--", path], env, config.timeouts.add, "checkout")
        .map(|out| out.success())
        .unwrap_or(false)
}

/// Concatenates the ours-region then the theirs-region of a text file's
/// conflict markers. Returns `None` (fall back to `ours`) if the file isn't
/// valid UTF-8 or the markers don't parse.
fn resolve_union(root: &Path, rel_path: &str) -> Option<bool> {
    let full = root.join(rel_path);
    let content = std::fs::read_to_string(&full).ok()?;
    let merged = union_merge_text(&content)?;
    std::fs::write(&full, merged).ok()?;
    Some(true)
}

fn union_merge_text(content: &str) -> Option<String> {
    let mut out = String::new();
    let mut lines = content.lines().peekable();
    let mut saw_conflict = false;

    while let Some(line) = lines.next() {
        if line.starts_with("<<<<<<<") {
            saw_conflict = true;
            let mut ours = String::new();
            let mut theirs = String::new();
            let mut in_theirs = false;
            let mut closed = false;
            for inner in lines.by_ref() {
                if inner.starts_with("=======") {
                    in_theirs = true;
                    continue;
                }
                if inner.starts_with(">>>>>>>") {
                    closed = true;
                    break;
                }
                if in_theirs {
                    theirs.push_str(inner);
                    theirs.push('\n');
                } else {
                    ours.push_str(inner);
                    ours.push('\n');
                }
            }
            if !closed {
                return None;
            }
            out.push_str(&ours);
            if !ours.is_empty() && !ours.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&theirs);
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }

    if !saw_conflict {
        return None;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_merge_concatenates_both_sides() {
        let text = "head\n<<<<<<< HEAD\nours line\n=======\ntheirs line\n>>>>>>> branch\ntail\n";
        let merged = union_merge_text(text).unwrap();
        assert_eq!(merged, "head\nours line\ntheirs line\ntail\n");
    }

    #[test]
    fn union_merge_returns_none_without_markers() {
        assert!(union_merge_text("plain file\nwith no conflicts\n").is_none());
    }

    #[test]
    fn union_merge_returns_none_on_unclosed_marker() {
        let text = "<<<<<<< HEAD\nours\n=======\ntheirs\n";
        assert!(union_merge_text(text).is_none());
    }
}
