//! The module interface every pipeline stage implements, and the read-only
//! views (`Context`, `System`) the manager hands it per event.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::args::{ArgLines, ArgMap, Template};
use crate::event::Event;

/// Default module priority when a module doesn't override it.
pub const DEFAULT_PRIORITY: i64 = 15;

/// Module return value: absolute path -> expected count of self-generated
/// watch events. Empty means "this invocation made no writes".
pub type ChangeMap = HashMap<PathBuf, u32>;

pub fn merge_change_maps(into: &mut ChangeMap, from: ChangeMap) {
    for (path, count) in from {
        *into.entry(path).or_insert(0) += count;
    }
}

/// Per-call, read-only input describing the triggering file.
pub struct Context<'a> {
    pub path: &'a Path,
    pub config: &'a ArgMap,
    pub arg_lines: &'a ArgLines,
}

/// Per-call, read-only input describing the pipeline itself.
pub struct System<'a> {
    pub event: &'a Event,
    pub template: &'a Template,
    pub modules: &'a [Box<dyn Module>],
}

/// Contract every pipeline stage implements. Absence of an override for an
/// event kind means "not interested" — the manager simply skips the module
/// for that event.
pub trait Module: Send {
    fn name(&self) -> &'static str;

    fn priority(&self) -> i64 {
        DEFAULT_PRIORITY
    }

    fn template(&self) -> Template {
        Vec::new()
    }

    fn created(&self, _ctx: &Context, _sys: &System) -> Option<ChangeMap> {
        None
    }

    fn modified(&self, _ctx: &Context, _sys: &System) -> Option<ChangeMap> {
        None
    }

    fn moved(&self, _ctx: &Context, _sys: &System) -> Option<ChangeMap> {
        None
    }

    fn deleted(&self, _ctx: &Context, _sys: &System) -> Option<ChangeMap> {
        None
    }

    fn opened(&self, _ctx: &Context, _sys: &System) -> Option<ChangeMap> {
        None
    }

    /// Whether this module declares an override for the given event kind,
    /// used by the manager to skip invocation entirely rather than call a
    /// default handler that always returns `None`.
    fn handles(&self, kind: EventKind) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Modified,
    Moved,
    Deleted,
    Opened,
}

impl EventKind {
    pub fn of(event: &Event) -> Self {
        match event {
            Event::Created { .. } => EventKind::Created,
            Event::Modified { .. } => EventKind::Modified,
            Event::Moved { .. } => EventKind::Moved,
            Event::Deleted { .. } => EventKind::Deleted,
            Event::Opened { .. } => EventKind::Opened,
        }
    }
}

/// Dispatches a module's handler for the event kind carried by `sys.event`.
pub fn dispatch(module: &dyn Module, ctx: &Context, sys: &System) -> Option<ChangeMap> {
    match EventKind::of(sys.event) {
        EventKind::Created => module.created(ctx, sys),
        EventKind::Modified => module.modified(ctx, sys),
        EventKind::Moved => module.moved(ctx, sys),
        EventKind::Deleted => module.deleted(ctx, sys),
        EventKind::Opened => module.opened(ctx, sys),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_change_maps_sums_per_path() {
        let mut acc: ChangeMap = HashMap::new();
        acc.insert(PathBuf::from("/a"), 1);
        let mut more: ChangeMap = HashMap::new();
        more.insert(PathBuf::from("/a"), 2);
        more.insert(PathBuf::from("/b"), 1);
        merge_change_maps(&mut acc, more);
        assert_eq!(acc.get(Path::new("/a")), Some(&3));
        assert_eq!(acc.get(Path::new("/b")), Some(&1));
    }
}
