use std::path::PathBuf;

/// Startup-time failures: everything in this table stops the process before
/// the watch loop begins (see the "Fail at startup" row of the error table).
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("no --sys-notes-dirs was configured")]
    NoNotesDirs,

    #[error("invalid --sys-priority item '{item}': {reason}")]
    InvalidPriority { item: String, reason: String },

    #[error("required path for module '{module}' is not configured")]
    MissingRequiredPath { module: &'static str },

    #[error("duplicate flag name '{flag}' across system and module templates")]
    DuplicateFlag { flag: String },
}

/// Synchronizer failures that *do* stop the current reconcile pass but never
/// the daemon itself, besides the one true configuration failure variant.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("required synchronizer path is not configured: {0}")]
    MissingConfiguredPath(&'static str),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("partial HTML document at {0}, skipping reconcile")]
    PartialHtml(PathBuf),
}

/// Git committer failures. All of these are caught at the worker loop and
/// turned into a notification; none of them ever propagate to the caller.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git {op} timed out after {timeout_secs}s in {root}")]
    Timeout {
        op: &'static str,
        timeout_secs: u64,
        root: PathBuf,
    },

    #[error("git {op} failed in {root}: {excerpt}")]
    CommandFailed {
        op: &'static str,
        root: PathBuf,
        excerpt: String,
    },

    #[error("no upstream configured for {0}")]
    NoUpstream(PathBuf),

    #[error("merge conflict in {root} could not be auto-resolved: {excerpt}")]
    UnresolvedConflict { root: PathBuf, excerpt: String },
}
