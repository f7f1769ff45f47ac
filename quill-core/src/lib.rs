//! Event dispatch fabric, module pipeline, and note-sync core for the quill
//! notes daemon. See `spec.md`/`SPEC_FULL.md` in the workspace root for the
//! governing specification; this crate is component design §4.A–§4.G.

pub mod args;
pub mod config;
pub mod error;
pub mod event;
pub mod git;
pub mod handler;
pub mod manager;
pub mod module;
pub mod modules;
pub mod notify;
pub mod sync;

pub use error::{GitError, StartupError, SyncError};
pub use event::Event;
pub use git::GitCommitter;
pub use handler::FileEventHandler;
pub use manager::ModuleManager;
pub use module::{ChangeMap, Context, Module, System};
pub use notify::Notifier;
pub use sync::PlasmaSync;
