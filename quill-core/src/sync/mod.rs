//! Bidirectional Markdown/HTML note synchronizer: document model (`doc`),
//! HTML dialect codec (`html`), module-local configuration (`config`), and
//! the `Module` implementation itself (`state`).

pub mod config;
pub mod doc;
pub mod html;
pub mod state;

pub use doc::{Doc, DocLine, LineKind, LineState, Segment};
pub use state::PlasmaSync;
