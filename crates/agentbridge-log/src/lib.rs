//! Append-only, per-project, segmented message log.
//!
//! A project's log lives under `<data_dir>/<project_id>/log/NNNNNN.jsonl`.
//! [`writer::LogWriterHandle`] serializes every append for a project through
//! one task so entries are totally ordered without a shared lock; [`reader`]
//! streams them back out for `get_messages`; [`retention`] deletes segments
//! past their configured age. [`metadata`] is the generic
//! temp-then-rename atomic JSON primitive shared by anything that needs a
//! small durable document (project metadata lives in `agentbridge-engine`,
//! built on top of it).

pub mod entry;
pub mod error;
pub mod metadata;
pub mod reader;
pub mod retention;
pub mod segment;
pub mod writer;

pub use entry::{Direction, LogEntry};
pub use error::{LogError, Result};
pub use writer::LogWriterHandle;
