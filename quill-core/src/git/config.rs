//! The git committer module's own flag template (§4.B) and the resolved,
//! per-event `GitConfig` snapshot carried on every queued item. Grounded on
//! `lucy_notes_manager/modules/git.py`'s `template` tuple (`--gmsg`, `--tsmsg`,
//! `--tsfmt`, `--gkey`), extended with the debounce/backoff/merge knobs spec
//! §4.F and §5 require but the original hardcoded as class attributes.

use std::path::PathBuf;
use std::time::Duration;

use crate::args::{ArgMap, FlagKind, FlagSpec, Template, Value};

use super::batch::{GitConfig, MergeMode, Timeouts};

pub const DEFAULT_BASE_MESSAGE: &str = "Auto-commit";
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
const DEFAULT_DEBOUNCE_SECS: f64 = 0.8;
const DEFAULT_GIT_TIMEOUT_SECS: i64 = 8;
const DEFAULT_PUSH_TIMEOUT_SECS: i64 = 20;
const DEFAULT_PULL_TIMEOUT_SECS: i64 = 30;
const DEFAULT_BACKOFF_START_SECS: i64 = 5;
const DEFAULT_BACKOFF_MAX_SECS: i64 = 120;

pub fn template() -> Template {
    vec![
        FlagSpec::new(
            "--gmsg",
            FlagKind::Str,
            Value::Strings(vec![DEFAULT_BASE_MESSAGE.to_string()]),
            "Base commit message prefix",
        ),
        FlagSpec::new(
            "--tsmsg",
            FlagKind::Bool,
            Value::Bool(false),
            "Append a formatted timestamp to the commit message",
        ),
        FlagSpec::new(
            "--tsfmt",
            FlagKind::Str,
            Value::Strings(vec![DEFAULT_TIMESTAMP_FORMAT.to_string()]),
            "strftime-style format for --tsmsg",
        ),
        FlagSpec::new(
            "--gkey",
            FlagKind::Str,
            Value::Strings(vec![]),
            "Private SSH key path used for git push/pull (no .pub)",
        ),
        FlagSpec::new(
            "--git-debounce",
            FlagKind::Float,
            Value::Floats(vec![DEFAULT_DEBOUNCE_SECS]),
            "Quiet-window seconds before a repo's batch is flushed",
        ),
        FlagSpec::new(
            "--git-auto-pull",
            FlagKind::Bool,
            Value::Bool(false),
            "Perform a safe pull-merge on opened events",
        ),
        FlagSpec::new(
            "--git-merge-on-push",
            FlagKind::Bool,
            Value::Bool(false),
            "On a rejected push, safe-pull-merge then retry once",
        ),
        FlagSpec::new(
            "--git-merge-mode",
            FlagKind::Str,
            Value::Strings(vec!["none".to_string()]),
            "Conflict auto-resolution: none, ours, theirs, union",
        ),
        FlagSpec::new(
            "--git-timeout-add",
            FlagKind::Int,
            Value::Ints(vec![DEFAULT_GIT_TIMEOUT_SECS]),
            "Timeout in seconds for git add",
        ),
        FlagSpec::new(
            "--git-timeout-status",
            FlagKind::Int,
            Value::Ints(vec![DEFAULT_GIT_TIMEOUT_SECS]),
            "Timeout in seconds for git status",
        ),
        FlagSpec::new(
            "--git-timeout-commit",
            FlagKind::Int,
            Value::Ints(vec![DEFAULT_GIT_TIMEOUT_SECS]),
            "Timeout in seconds for git commit",
        ),
        FlagSpec::new(
            "--git-timeout-push",
            FlagKind::Int,
            Value::Ints(vec![DEFAULT_PUSH_TIMEOUT_SECS]),
            "Timeout in seconds for git push",
        ),
        FlagSpec::new(
            "--git-timeout-pull",
            FlagKind::Int,
            Value::Ints(vec![DEFAULT_PULL_TIMEOUT_SECS]),
            "Timeout in seconds for git pull",
        ),
        FlagSpec::new(
            "--git-backoff-start",
            FlagKind::Int,
            Value::Ints(vec![DEFAULT_BACKOFF_START_SECS]),
            "Initial push-retry backoff in seconds",
        ),
        FlagSpec::new(
            "--git-backoff-max",
            FlagKind::Int,
            Value::Ints(vec![DEFAULT_BACKOFF_MAX_SECS]),
            "Cap on push-retry backoff in seconds",
        ),
    ]
}

pub fn resolve(config: &ArgMap) -> GitConfig {
    let base_message = config
        .get("gmsg")
        .and_then(|v| v.first_string())
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_BASE_MESSAGE)
        .to_string();
    let timestamp = config.get("tsmsg").map(|v| v.as_bool()).unwrap_or(false);
    let timestamp_format = config
        .get("tsfmt")
        .and_then(|v| v.first_string())
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_TIMESTAMP_FORMAT)
        .to_string();
    let ssh_key = config
        .get("gkey")
        .and_then(|v| v.first_string())
        .filter(|s| !s.is_empty())
        .map(|raw| PathBuf::from(shellexpand::tilde(raw).into_owned()));
    let debounce = Duration::from_secs_f64(
        config
            .get("git_debounce")
            .and_then(|v| v.first_float())
            .filter(|f| *f >= 0.0)
            .unwrap_or(DEFAULT_DEBOUNCE_SECS),
    );
    let auto_pull = config.get("git_auto_pull").map(|v| v.as_bool()).unwrap_or(false);
    let auto_merge_on_push = config.get("git_merge_on_push").map(|v| v.as_bool()).unwrap_or(false);
    let merge_mode = MergeMode::parse(
        config
            .get("git_merge_mode")
            .and_then(|v| v.first_string())
            .unwrap_or("none"),
    );

    let secs = |key: &str, default: i64| -> u64 {
        config
            .get(key)
            .and_then(|v| v.first_int())
            .filter(|n| *n > 0)
            .unwrap_or(default) as u64
    };

    GitConfig {
        debounce,
        base_message,
        timestamp,
        timestamp_format,
        ssh_key,
        auto_pull,
        auto_merge_on_push,
        merge_mode,
        timeouts: Timeouts {
            add: Duration::from_secs(secs("git_timeout_add", DEFAULT_GIT_TIMEOUT_SECS)),
            status: Duration::from_secs(secs("git_timeout_status", DEFAULT_GIT_TIMEOUT_SECS)),
            commit: Duration::from_secs(secs("git_timeout_commit", DEFAULT_GIT_TIMEOUT_SECS)),
            push: Duration::from_secs(secs("git_timeout_push", DEFAULT_PUSH_TIMEOUT_SECS)),
            pull: Duration::from_secs(secs("git_timeout_pull", DEFAULT_PULL_TIMEOUT_SECS)),
        },
        backoff_start: Duration::from_secs(secs("git_backoff_start", DEFAULT_BACKOFF_START_SECS)),
        backoff_max: Duration::from_secs(secs("git_backoff_max", DEFAULT_BACKOFF_MAX_SECS)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::defaults_of;

    #[test]
    fn defaults_resolve_to_auto_commit_and_none_merge_mode() {
        let config = defaults_of(&template());
        let cfg = resolve(&config);
        assert_eq!(cfg.base_message, DEFAULT_BASE_MESSAGE);
        assert_eq!(cfg.merge_mode, MergeMode::None);
        assert_eq!(cfg.debounce, Duration::from_millis(800));
    }

    #[test]
    fn overridden_values_take_effect() {
        let mut config = defaults_of(&template());
        config.insert("gmsg".into(), Value::Strings(vec!["wip".into()]));
        config.insert("git_merge_mode".into(), Value::Strings(vec!["union".into()]));
        config.insert("git_debounce".into(), Value::Floats(vec![2.5]));
        let cfg = resolve(&config);
        assert_eq!(cfg.base_message, "wip");
        assert_eq!(cfg.merge_mode, MergeMode::Union);
        assert_eq!(cfg.debounce, Duration::from_millis(2500));
    }
}
