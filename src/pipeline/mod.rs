//! Stages that turn a finished conversion job into published galleys.
//!
//! Each submodule implements one step and is usable on its own; the
//! orchestrator strings them together.
//!
//! ## Data Flow
//!
//! ```text
//! metadata ──▶ (server) ──▶ extract ──▶ publish
//! (payload)                 (zip)       (galleys / cleanup)
//! ```
//!
//! 1. [`metadata`]: assemble the submission payload from host records
//! 2. [`extract`]: unpack the allow-listed entries of the result archive;
//!    runs in `spawn_blocking` because the zip reader is synchronous
//! 3. [`publish`]: register extracted files as galleys, or delete markup
//!    files no galley links to any more

pub mod extract;
pub mod metadata;
pub mod publish;
