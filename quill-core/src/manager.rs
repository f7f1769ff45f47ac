//! Owns the ordered module set, merges per-event directives over the
//! startup config, applies exclude/force policy, and dispatches each event
//! through the pipeline.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use log::{error, info};

use crate::args::{self, ArgMap, Template};
use crate::config::{self, Configuration};
use crate::error::StartupError;
use crate::event::Event;
use crate::handler::PipelineRunner;
use crate::module::{dispatch, merge_change_maps, ChangeMap, Context, EventKind, Module, System};

pub struct ModuleManager {
    modules: Vec<Box<dyn Module>>,
    global_template: Template,
    startup_config: ArgMap,
    cfg: Configuration,
}

impl ModuleManager {
    /// `cli_tokens` and `config_file_tokens` are the tokenized, not-yet-bound
    /// argv and config-file content; the manager alone owns the concatenated
    /// system+module template needed to resolve them.
    pub fn new(
        modules: Vec<Box<dyn Module>>,
        cli_tokens: &[String],
        config_file_tokens: &[String],
    ) -> Result<Self, StartupError> {
        let mut global_template = config::system_template();
        for module in &modules {
            global_template.extend(module.template());
        }
        check_unique_flags(&global_template)?;

        let defaults = args::defaults_of(&global_template);
        let (cfg_known, _) = args::parse(config_file_tokens, &global_template);
        let (cli_known, _) = args::parse(cli_tokens, &global_template);
        let startup_config = args::merge(&args::merge(&defaults, &cfg_known), &cli_known);

        let cfg = Configuration::from_merged(&startup_config)?;

        let mut modules = modules;
        modules.sort_by_key(|m| priority_of(m.as_ref(), &cfg.priority_overrides));

        Ok(ModuleManager {
            modules,
            global_template,
            startup_config,
            cfg,
        })
    }

    pub fn config(&self) -> &Configuration {
        &self.cfg
    }

    pub fn global_template(&self) -> &Template {
        &self.global_template
    }

    fn reparse_context(&self, path: &Path) -> (ArgMap, crate::args::ArgLines) {
        let (file_known, arg_lines) =
            args::parse_file_directives(path, &self.global_template, self.cfg.use_only_first_line)
                .unwrap_or_default();
        let config = args::merge(&self.startup_config, &file_known);
        (config, arg_lines)
    }

    /// Runs one event through every module whose priority-sorted slot
    /// declares interest, re-parsing directives between modules since a
    /// prior module may have rewritten the file.
    pub fn run(&self, path: &Path, event: &Event) -> Option<ChangeMap> {
        let (mut config, mut arg_lines) = self.reparse_context(path);
        let mut aggregated: ChangeMap = ChangeMap::new();
        let kind = EventKind::of(event);

        for i in 0..self.modules.len() {
            let module = &self.modules[i];
            let name = module.name();

            if self.cfg.exclude.contains(name) && !self.cfg.force.contains(name) {
                continue;
            }
            if !module.handles(kind) {
                continue;
            }

            let ctx = Context {
                path,
                config: &config,
                arg_lines: &arg_lines,
            };
            let sys = System {
                event,
                template: &self.global_template,
                modules: &self.modules,
            };

            info!("STARTING: {}", name);
            // A module that panics must not take the whole pipeline down
            // with it (§7 "module raises unexpectedly -> log, continue").
            let result = match panic::catch_unwind(AssertUnwindSafe(|| dispatch(module.as_ref(), &ctx, &sys))) {
                Ok(result) => result,
                Err(payload) => {
                    error!("module {} panicked: {}", name, panic_message(&payload));
                    None
                }
            };
            info!("END: {}", name);

            if let Some(changes) = result {
                if !changes.is_empty() {
                    merge_change_maps(&mut aggregated, changes);
                    let (next_config, next_lines) = self.reparse_context(path);
                    config = next_config;
                    arg_lines = next_lines;
                }
            }
        }

        if aggregated.is_empty() {
            None
        } else {
            Some(aggregated)
        }
    }
}

impl PipelineRunner for ModuleManager {
    fn run(&mut self, path: &Path, event: &Event) -> Option<ChangeMap> {
        ModuleManager::run(self, path, event)
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn priority_of(module: &dyn Module, overrides: &[(String, i64)]) -> i64 {
    overrides
        .iter()
        .find(|(name, _)| name == module.name())
        .map(|(_, p)| *p)
        .unwrap_or_else(|| module.priority())
}

fn check_unique_flags(template: &Template) -> Result<(), StartupError> {
    let mut seen: HashSet<&str> = HashSet::new();
    for spec in template {
        if !seen.insert(spec.flag.as_str()) {
            return Err(StartupError::DuplicateFlag {
                flag: spec.flag.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ChangeMap;
    use std::path::PathBuf;

    struct Stub {
        name: &'static str,
        priority: i64,
        writes: Option<PathBuf>,
    }

    impl Module for Stub {
        fn name(&self) -> &'static str {
            self.name
        }
        fn priority(&self) -> i64 {
            self.priority
        }
        fn modified(&self, ctx: &Context, _sys: &System) -> Option<ChangeMap> {
            self.writes.as_ref().map(|p| {
                let mut cm = ChangeMap::new();
                cm.insert(p.clone(), 1);
                let _ = ctx.path;
                cm
            })
        }
        fn handles(&self, kind: EventKind) -> bool {
            matches!(kind, EventKind::Modified)
        }
    }

    #[test]
    fn sorts_modules_by_priority_with_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("note.md");
        std::fs::write(&file, "hello\n").unwrap();

        let modules: Vec<Box<dyn Module>> = vec![
            Box::new(Stub {
                name: "b",
                priority: 20,
                writes: None,
            }),
            Box::new(Stub {
                name: "a",
                priority: 10,
                writes: None,
            }),
        ];
        let cli = vec!["--sys-notes-dirs".to_string(), dir.path().display().to_string()];
        let manager = ModuleManager::new(modules, &cli, &[]).unwrap();
        assert_eq!(manager.modules[0].name(), "a");
        assert_eq!(manager.modules[1].name(), "b");
    }

    #[test]
    fn excluded_module_is_skipped_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("note.md");
        std::fs::write(&file, "hello\n").unwrap();

        let modules: Vec<Box<dyn Module>> = vec![Box::new(Stub {
            name: "git",
            priority: 10,
            writes: Some(file.clone()),
        })];
        let cli = vec![
            "--sys-notes-dirs".to_string(),
            dir.path().display().to_string(),
            "--exclude".to_string(),
            "git".to_string(),
        ];
        let manager = ModuleManager::new(modules, &cli, &[]).unwrap();
        let result = manager.run(
            &file,
            &Event::Modified {
                path: file.clone(),
                is_dir: false,
            },
        );
        assert!(result.is_none());
    }

    struct Panicker;

    impl Module for Panicker {
        fn name(&self) -> &'static str {
            "panicker"
        }
        fn modified(&self, _ctx: &Context, _sys: &System) -> Option<ChangeMap> {
            panic!("boom");
        }
        fn handles(&self, kind: EventKind) -> bool {
            matches!(kind, EventKind::Modified)
        }
    }

    #[test]
    fn a_panicking_module_does_not_stop_the_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("note.md");
        std::fs::write(&file, "hello\n").unwrap();

        let modules: Vec<Box<dyn Module>> = vec![
            Box::new(Panicker),
            Box::new(Stub {
                name: "after",
                priority: 20,
                writes: Some(file.clone()),
            }),
        ];
        let cli = vec!["--sys-notes-dirs".to_string(), dir.path().display().to_string()];
        let manager = ModuleManager::new(modules, &cli, &[]).unwrap();
        let result = manager
            .run(
                &file,
                &Event::Modified {
                    path: file.clone(),
                    is_dir: false,
                },
            )
            .unwrap();
        assert_eq!(result.get(&file), Some(&1));
    }

    #[test]
    fn aggregates_change_maps_across_modules() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("note.md");
        std::fs::write(&file, "hello\n").unwrap();

        let modules: Vec<Box<dyn Module>> = vec![
            Box::new(Stub {
                name: "one",
                priority: 10,
                writes: Some(file.clone()),
            }),
            Box::new(Stub {
                name: "two",
                priority: 20,
                writes: Some(file.clone()),
            }),
        ];
        let cli = vec!["--sys-notes-dirs".to_string(), dir.path().display().to_string()];
        let manager = ModuleManager::new(modules, &cli, &[]).unwrap();
        let result = manager
            .run(
                &file,
                &Event::Modified {
                    path: file.clone(),
                    is_dir: false,
                },
            )
            .unwrap();
        assert_eq!(result.get(&file), Some(&2));
    }
}
