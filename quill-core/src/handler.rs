//! The event dispatch fabric's front door: dotfile/`.git` filtering, the
//! self-write ignore ledger, and open-event throttling, before anything
//! reaches the module pipeline.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::event::{is_dotfile, is_ignored_component, resolve_path, Event};
use crate::module::ChangeMap;

/// Implemented by the module pipeline; kept as a trait here so the handler
/// can be unit-tested without constructing a real module set.
pub trait PipelineRunner {
    fn run(&mut self, path: &Path, event: &Event) -> Option<ChangeMap>;
}

const DEFAULT_THROTTLE_HIGH_WATER: usize = 200;
const DEFAULT_THROTTLE_EVICT_COUNT: usize = 100;

pub struct FileEventHandler {
    ignore_ledger: HashMap<PathBuf, u32>,
    open_throttle: HashMap<PathBuf, Instant>,
    open_cooldown_secs: i64,
    throttle_high_water: usize,
    throttle_evict_count: usize,
    accepted_opens_since_evict: usize,
}

impl FileEventHandler {
    pub fn new(open_cooldown_secs: i64) -> Self {
        FileEventHandler {
            ignore_ledger: HashMap::new(),
            open_throttle: HashMap::new(),
            open_cooldown_secs,
            throttle_high_water: DEFAULT_THROTTLE_HIGH_WATER,
            throttle_evict_count: DEFAULT_THROTTLE_EVICT_COUNT,
            accepted_opens_since_evict: 0,
        }
    }

    #[cfg(test)]
    fn ledger_count(&self, path: &Path) -> u32 {
        self.ignore_ledger.get(path).copied().unwrap_or(0)
    }

    fn decrement_ledger(&mut self, path: &Path) -> bool {
        let mut drop_event = false;
        if let Some(count) = self.ignore_ledger.get_mut(path) {
            drop_event = true;
            if *count <= 1 {
                self.ignore_ledger.remove(path);
            } else {
                *count -= 1;
            }
        }
        drop_event
    }

    fn increment_ledger(&mut self, path: PathBuf, count: u32) {
        if count == 0 {
            return;
        }
        *self.ignore_ledger.entry(path).or_insert(0) += count;
    }

    /// True if the opened event for `path` should be dropped by the throttle.
    fn throttle_opened(&mut self, path: &Path) -> bool {
        if self.open_cooldown_secs <= 0 {
            self.record_open(path.to_path_buf());
            return false;
        }
        let now = Instant::now();
        if let Some(last) = self.open_throttle.get(path) {
            if now.duration_since(*last).as_secs() < self.open_cooldown_secs as u64 {
                return true;
            }
        }
        self.record_open(path.to_path_buf());
        false
    }

    fn record_open(&mut self, path: PathBuf) {
        self.open_throttle.insert(path, Instant::now());
        self.accepted_opens_since_evict += 1;
        if self.accepted_opens_since_evict >= self.throttle_high_water {
            self.evict_oldest();
            self.accepted_opens_since_evict = 0;
        }
    }

    fn evict_oldest(&mut self) {
        let mut entries: Vec<(PathBuf, Instant)> =
            self.open_throttle.iter().map(|(p, t)| (p.clone(), *t)).collect();
        entries.sort_by_key(|(_, t)| *t);
        for (path, _) in entries.into_iter().take(self.throttle_evict_count) {
            self.open_throttle.remove(&path);
        }
    }

    /// Filters, consults the ledger/throttle, forwards survivors to the
    /// pipeline, and turns the returned change map back into ledger credits.
    pub fn on_event(&mut self, event: Event, pipeline: &mut dyn PipelineRunner) {
        if event.is_dir() {
            return;
        }

        let effective = resolve_path(event.effective_path());
        if is_dotfile(&effective) || is_ignored_component(&effective) {
            return;
        }

        if let Event::Moved { from, to, .. } = &event {
            let from = resolve_path(from);
            let to_resolved = resolve_path(to);
            let dropped_from = self.decrement_ledger(&from);
            let dropped_to = self.decrement_ledger(&to_resolved);
            if dropped_from || dropped_to {
                return;
            }
        } else if self.decrement_ledger(&effective) {
            return;
        }

        if matches!(event, Event::Opened { .. }) && self.throttle_opened(&effective) {
            return;
        }

        if let Some(changes) = pipeline.run(&effective, &event) {
            for (path, count) in changes {
                self.increment_ledger(path, count);
            }
        }
    }
}
