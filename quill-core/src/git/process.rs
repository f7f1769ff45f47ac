//! Subprocess plumbing for the git committer: timed `git` invocations,
//! repository-root discovery, porcelain-status parsing, and the SSH
//! environment override. Grounded on `lucy_notes_manager/modules/git.py`'s
//! `_run_git`/`_git_env`/`_find_git_root`, translated from
//! `subprocess.run(..., timeout=...)` to `std::process::Command` +
//! `wait-timeout` (the crate this workspace already depends on for bounded
//! subprocess waits, matching `rtest_core`'s own timed-job idiom).

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use wait_timeout::ChildExt;

use crate::error::GitError;

pub struct GitOutput {
    pub status_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }

    pub fn combined_lower(&self) -> String {
        format!("{}\n{}", self.stderr, self.stdout).to_lowercase()
    }

    pub fn excerpt(&self) -> String {
        let text = if !self.stderr.trim().is_empty() {
            self.stderr.trim()
        } else {
            self.stdout.trim()
        };
        crate::notify::cap_excerpt(text)
    }
}

/// Runs `git <args>` in `root` with `env` applied, bounded by `timeout`.
/// Never blocks past `timeout`: on expiry the child is killed and a
/// `GitError::Timeout` is returned.
pub fn run_git(
    root: &Path,
    args: &[&str],
    env: &HashMap<String, String>,
    timeout: Duration,
    op: &'static str,
) -> Result<GitOutput, GitError> {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .current_dir(root)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| GitError::CommandFailed {
        op,
        root: root.to_path_buf(),
        excerpt: format!("failed to spawn git: {}", e),
    })?;

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

    let wait_result = child.wait_timeout(timeout).map_err(|e| GitError::CommandFailed {
        op,
        root: root.to_path_buf(),
        excerpt: e.to_string(),
    })?;

    let status = match wait_result {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            let _ = stdout_reader.join();
            let _ = stderr_reader.join();
            return Err(GitError::Timeout {
                op,
                timeout_secs: timeout.as_secs(),
                root: root.to_path_buf(),
            });
        }
    };

    let stdout = String::from_utf8_lossy(&stdout_reader.join().unwrap_or_default()).into_owned();
    let stderr = String::from_utf8_lossy(&stderr_reader.join().unwrap_or_default()).into_owned();

    Ok(GitOutput {
        status_code: status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}

/// Builds the child environment: a copy of the process environment, with
/// `GIT_TERMINAL_PROMPT` disabled and, if `ssh_key` is configured and
/// exists, a `GIT_SSH_COMMAND` forcing that key with `IdentitiesOnly=yes`,
/// `BatchMode=yes`, and `StrictHostKeyChecking=accept-new`.
pub fn build_env(ssh_key: Option<&Path>, notifier: &crate::notify::Notifier) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars().collect();
    env.insert("GIT_TERMINAL_PROMPT".to_string(), "0".to_string());

    let Some(key) = ssh_key else {
        return env;
    };
    if !key.as_os_str().is_empty() {
        if key.is_file() {
            env.insert(
                "GIT_SSH_COMMAND".to_string(),
                format!(
                    "ssh -i \"{}\" -o IdentitiesOnly=yes -o BatchMode=yes -o StrictHostKeyChecking=accept-new",
                    key.display()
                ),
            );
        } else {
            notifier.notify(
                &format!("gkey-missing:{}", key.display()),
                "quill: git committer",
                &format!("SSH key not found:\n{}", key.display()),
            );
        }
    }
    env
}

/// Walks upward from `path` (file or directory) looking for a `.git`
/// directory, returning the first ancestor that contains one.
pub fn find_git_root(path: &Path) -> Option<PathBuf> {
    let mut cur = if path.is_dir() {
        path.to_path_buf()
    } else {
        path.parent()?.to_path_buf()
    };
    loop {
        if cur.join(".git").is_dir() {
            return Some(cur);
        }
        match cur.parent() {
            Some(parent) if parent != cur => cur = parent.to_path_buf(),
            _ => return None,
        }
    }
}

pub fn merge_in_progress(root: &Path) -> bool {
    root.join(".git").join("MERGE_HEAD").is_file()
}

/// Extracts file paths from `git status --porcelain` output, following
/// rename arrows (`R  old -> new`) through to the new path.
pub fn parse_porcelain_paths(porcelain: &str) -> Vec<String> {
    let mut out = Vec::new();
    for line in porcelain.lines() {
        if line.len() < 4 {
            continue;
        }
        let path_part = &line[3..];
        let path = match path_part.split_once(" -> ") {
            Some((_, new)) => new,
            None => path_part,
        };
        out.push(path.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_and_rename_porcelain_lines() {
        let porcelain = " M src/lib.rs\n?? new.md\nR  old.md -> new2.md\n";
        let paths = parse_porcelain_paths(porcelain);
        assert_eq!(paths, vec!["src/lib.rs", "new.md", "new2.md"]);
    }

    #[test]
    fn finds_repo_root_by_walking_upward() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        let file = nested.join("note.md");
        std::fs::write(&file, "hi").unwrap();

        let root = find_git_root(&file).unwrap();
        assert_eq!(root, dir.path());
    }

    #[test]
    fn no_repo_root_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("note.md");
        std::fs::write(&file, "hi").unwrap();
        assert!(find_git_root(&file).is_none());
    }
}
