//! The system flag template (§6) and the resolved startup configuration
//! derived from it. `ModuleManager::new` concatenates this template with
//! every module's own template before parsing argv.

use std::collections::HashSet;

use crate::args::{ArgMap, FlagKind, FlagSpec, Template, Value};
use crate::error::StartupError;

pub fn system_template() -> Template {
    vec![
        FlagSpec::new(
            "--sys-config-path",
            FlagKind::Str,
            Value::Strings(vec!["config.txt".to_string()]),
            "Path to config file",
        ),
        FlagSpec::new(
            "--sys-debug",
            FlagKind::Bool,
            Value::Bool(false),
            "Enable debug logging",
        ),
        FlagSpec::new(
            "--sys-logging-format",
            FlagKind::Str,
            Value::Strings(vec!["full".to_string()]),
            "Log record layout preset: compact or full",
        ),
        FlagSpec::new(
            "--sys-notes-dirs",
            FlagKind::Str,
            Value::Strings(vec![]),
            "Directories to watch recursively",
        ),
        FlagSpec::new(
            "--sys-on-open-cooldown",
            FlagKind::Int,
            Value::Ints(vec![20]),
            "Seconds between accepted open events per file",
        ),
        FlagSpec::new(
            "--force",
            FlagKind::Str,
            Value::Strings(vec![]),
            "Module names to force-enable even if excluded",
        ),
        FlagSpec::new(
            "--exclude",
            FlagKind::Str,
            Value::Strings(vec![]),
            "Module names to disable",
        ),
        FlagSpec::new(
            "--sys-priority",
            FlagKind::Str,
            Value::Strings(vec![]),
            "Items name=int overriding module priorities",
        ),
        FlagSpec::new(
            "--sys-use-only-first-line",
            FlagKind::Bool,
            Value::Bool(false),
            "Restrict per-file directive parsing to line 1",
        ),
    ]
}

/// Preset log layouts selected by the `--sys-logging-format` flag's value.
/// See DESIGN.md for why this replaced a free-form template string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingFormat {
    Compact,
    Full,
}

impl LoggingFormat {
    pub fn from_flag(value: &str) -> Self {
        match value {
            "compact" => LoggingFormat::Compact,
            _ => LoggingFormat::Full,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Configuration {
    pub config_path: String,
    pub debug: bool,
    pub logging_format: LoggingFormat,
    pub notes_dirs: Vec<String>,
    pub on_open_cooldown: i64,
    pub force: HashSet<String>,
    pub exclude: HashSet<String>,
    pub priority_overrides: Vec<(String, i64)>,
    pub use_only_first_line: bool,
}

impl Configuration {
    pub fn from_merged(config: &ArgMap) -> Result<Self, StartupError> {
        let notes_dirs: Vec<String> = config
            .get("sys_notes_dirs")
            .map(|v| v.as_strings().to_vec())
            .unwrap_or_default();
        if notes_dirs.is_empty() {
            return Err(StartupError::NoNotesDirs);
        }

        let priority_overrides = parse_priority_items(
            config
                .get("sys_priority")
                .map(|v| v.as_strings())
                .unwrap_or(&[]),
        )?;

        Ok(Configuration {
            config_path: config
                .get("sys_config_path")
                .and_then(|v| v.first_string())
                .unwrap_or("config.txt")
                .to_string(),
            debug: config.get("sys_debug").map(|v| v.as_bool()).unwrap_or(false),
            logging_format: LoggingFormat::from_flag(
                config
                    .get("sys_logging_format")
                    .and_then(|v| v.first_string())
                    .unwrap_or("full"),
            ),
            notes_dirs,
            on_open_cooldown: config
                .get("sys_on_open_cooldown")
                .and_then(|v| v.first_int())
                .unwrap_or(20),
            force: config
                .get("force")
                .map(|v| v.as_strings().iter().cloned().collect())
                .unwrap_or_default(),
            exclude: config
                .get("exclude")
                .map(|v| v.as_strings().iter().cloned().collect())
                .unwrap_or_default(),
            priority_overrides,
            use_only_first_line: config
                .get("sys_use_only_first_line")
                .map(|v| v.as_bool())
                .unwrap_or(false),
        })
    }
}

fn parse_priority_items(items: &[String]) -> Result<Vec<(String, i64)>, StartupError> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let (name, raw) = item.split_once('=').ok_or_else(|| StartupError::InvalidPriority {
            item: item.clone(),
            reason: "expected name=int".to_string(),
        })?;
        let value = raw.parse::<i64>().map_err(|e| StartupError::InvalidPriority {
            item: item.clone(),
            reason: e.to_string(),
        })?;
        out.push((name.to_string(), value));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::defaults_of;

    #[test]
    fn requires_notes_dirs() {
        let template = system_template();
        let defaults = defaults_of(&template);
        let err = Configuration::from_merged(&defaults).unwrap_err();
        assert!(matches!(err, StartupError::NoNotesDirs));
    }

    #[test]
    fn parses_priority_overrides() {
        let mut config = defaults_of(&system_template());
        config.insert("sys_notes_dirs".into(), Value::Strings(vec!["/notes".into()]));
        config.insert(
            "sys_priority".into(),
            Value::Strings(vec!["git=5".into(), "todo=30".into()]),
        );
        let cfg = Configuration::from_merged(&config).unwrap();
        assert_eq!(
            cfg.priority_overrides,
            vec![("git".to_string(), 5), ("todo".to_string(), 30)]
        );
    }

    #[test]
    fn rejects_malformed_priority_item() {
        let mut config = defaults_of(&system_template());
        config.insert("sys_notes_dirs".into(), Value::Strings(vec!["/notes".into()]));
        config.insert("sys_priority".into(), Value::Strings(vec!["bogus".into()]));
        let err = Configuration::from_merged(&config).unwrap_err();
        assert!(matches!(err, StartupError::InvalidPriority { .. }));
    }
}
