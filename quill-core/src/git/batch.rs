//! Per-repo batching state: the configuration snapshot carried on every
//! queued event, the debounce accumulator, and the push-backoff table.
//! Grounded on `lucy_notes_manager/modules/git.py`'s `_PENDING`/`_BACKOFF`
//! module-level dictionaries, reshaped as owned structs passed through an
//! mpsc channel instead of globals guarded by a lock per access.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    None,
    Ours,
    Theirs,
    Union,
}

impl MergeMode {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "ours" => MergeMode::Ours,
            "theirs" => MergeMode::Theirs,
            "union" => MergeMode::Union,
            _ => MergeMode::None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub add: Duration,
    pub status: Duration,
    pub commit: Duration,
    pub push: Duration,
    pub pull: Duration,
}

#[derive(Debug, Clone)]
pub struct GitConfig {
    pub debounce: Duration,
    pub base_message: String,
    pub timestamp: bool,
    pub timestamp_format: String,
    pub ssh_key: Option<PathBuf>,
    pub auto_pull: bool,
    pub auto_merge_on_push: bool,
    pub merge_mode: MergeMode,
    pub timeouts: Timeouts,
    pub backoff_start: Duration,
    pub backoff_max: Duration,
}

/// One event's contribution to a repo's pending batch, sent across the
/// mailbox channel from the module's `apply` callback to the worker thread.
pub struct QueueItem {
    pub repo_root: PathBuf,
    pub event_type: &'static str,
    pub hinted_path: Option<PathBuf>,
    pub config: GitConfig,
    pub wants_pull: bool,
}

/// Accumulated, not-yet-flushed state for one repository.
pub struct RepoBatch {
    pub config: GitConfig,
    pub last_event_at: Instant,
    pub event_types: BTreeSet<&'static str>,
    pub hinted_paths: BTreeSet<PathBuf>,
    pub wants_pull: bool,
}

impl RepoBatch {
    pub fn new(item: QueueItem) -> Self {
        let mut event_types = BTreeSet::new();
        event_types.insert(item.event_type);
        let mut hinted_paths = BTreeSet::new();
        if let Some(p) = item.hinted_path {
            hinted_paths.insert(p);
        }
        RepoBatch {
            config: item.config,
            last_event_at: Instant::now(),
            event_types,
            hinted_paths,
            wants_pull: item.wants_pull,
        }
    }

    pub fn absorb(&mut self, item: QueueItem) {
        self.config = item.config;
        self.last_event_at = Instant::now();
        self.event_types.insert(item.event_type);
        if let Some(p) = item.hinted_path {
            self.hinted_paths.insert(p);
        }
        self.wants_pull = self.wants_pull || item.wants_pull;
    }

    pub fn ready(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_event_at) >= self.config.debounce
    }

    /// `{base}: {sorted event types}+joined {basenames, capped at 8, "+N more"}`.
    /// `changed_paths` is the porcelain-derived list of what git actually
    /// staged; when empty (e.g. status couldn't be parsed) this falls back
    /// to the event-hinted paths, matching `_build_commit_message`'s
    /// `changed_paths or sorted(batch.hinted_paths)`.
    pub fn commit_message(&self, changed_paths: &[String]) -> String {
        let kinds = self
            .event_types
            .iter()
            .copied()
            .collect::<Vec<_>>()
            .join("+");

        let mut names: Vec<String> = if changed_paths.is_empty() {
            self.hinted_paths
                .iter()
                .filter_map(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .collect()
        } else {
            changed_paths
                .iter()
                .map(|p| {
                    Path::new(p)
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| p.clone())
                })
                .collect()
        };
        names.sort();
        names.dedup();

        let shown: Vec<String> = names.iter().take(8).cloned().collect();
        let mut summary = shown.join(", ");
        if names.len() > 8 {
            summary.push_str(&format!(", +{} more", names.len() - 8));
        }

        let mut message = format!("{}: {}", self.config.base_message, kinds);
        if !summary.is_empty() {
            message.push(' ');
            message.push_str(&summary);
        }
        if self.config.timestamp {
            message.push_str(&format!(
                " [{}]",
                chrono::Local::now().format(self.config.timestamp_format.as_str())
            ));
        }
        message
    }
}

/// Per-repo exponential push backoff.
#[derive(Debug, Clone, Copy)]
pub struct PushBackoff {
    pub current: Duration,
    pub next_allowed: Option<Instant>,
}

impl PushBackoff {
    pub fn idle(start: Duration) -> Self {
        PushBackoff {
            current: start,
            next_allowed: None,
        }
    }

    pub fn blocked(&self, now: Instant) -> bool {
        self.next_allowed.map(|at| now < at).unwrap_or(false)
    }

    pub fn register_failure(&mut self, max: Duration) {
        let doubled = self.current.saturating_mul(2);
        self.current = doubled.min(max).max(self.current);
        self.next_allowed = Some(Instant::now() + self.current);
    }

    pub fn reset(&mut self, start: Duration) {
        self.current = start;
        self.next_allowed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GitConfig {
        GitConfig {
            debounce: Duration::from_millis(800),
            base_message: "notes".into(),
            timestamp: false,
            timestamp_format: "%Y-%m-%d_%H-%M-%S".into(),
            ssh_key: None,
            auto_pull: false,
            auto_merge_on_push: false,
            merge_mode: MergeMode::None,
            timeouts: Timeouts {
                add: Duration::from_secs(8),
                status: Duration::from_secs(8),
                commit: Duration::from_secs(8),
                push: Duration::from_secs(20),
                pull: Duration::from_secs(30),
            },
            backoff_start: Duration::from_secs(5),
            backoff_max: Duration::from_secs(120),
        }
    }

    #[test]
    fn commit_message_joins_sorted_event_kinds_and_caps_names() {
        let item = QueueItem {
            repo_root: PathBuf::from("/repo"),
            event_type: "modified",
            hinted_path: Some(PathBuf::from("/repo/b.md")),
            config: config(),
            wants_pull: false,
        };
        let mut batch = RepoBatch::new(item);
        batch.absorb(QueueItem {
            repo_root: PathBuf::from("/repo"),
            event_type: "created",
            hinted_path: Some(PathBuf::from("/repo/a.md")),
            config: config(),
            wants_pull: false,
        });
        let msg = batch.commit_message(&[]);
        assert!(msg.starts_with("notes: created+modified"));
        assert_eq!(msg, "notes: created+modified a.md, b.md");
    }

    #[test]
    fn commit_message_prefers_porcelain_changed_paths_over_hinted_paths() {
        let item = QueueItem {
            repo_root: PathBuf::from("/repo"),
            event_type: "modified",
            hinted_path: Some(PathBuf::from("/repo/stale-hint.md")),
            config: config(),
            wants_pull: false,
        };
        let batch = RepoBatch::new(item);
        let msg = batch.commit_message(&["actual.md".to_string()]);
        assert_eq!(msg, "notes: modified actual.md");
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let mut backoff = PushBackoff::idle(Duration::from_secs(5));
        backoff.register_failure(Duration::from_secs(20));
        assert_eq!(backoff.current, Duration::from_secs(10));
        backoff.register_failure(Duration::from_secs(20));
        assert_eq!(backoff.current, Duration::from_secs(20));
        backoff.register_failure(Duration::from_secs(20));
        assert_eq!(backoff.current, Duration::from_secs(20));
    }

    #[test]
    fn merge_mode_parses_known_strings_and_defaults_to_none() {
        assert_eq!(MergeMode::parse("union"), MergeMode::Union);
        assert_eq!(MergeMode::parse("OURS"), MergeMode::Ours);
        assert_eq!(MergeMode::parse("bogus"), MergeMode::None);
    }
}
