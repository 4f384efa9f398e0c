//! # vista
//!
//! `vista` is the **public facade crate** for the Vista projection engine.
//! It is the recommended dependency for downstream projects.
//!
//! A [`view::View`] is a live, read-only projection over an observable
//! source collection: callers attach sort, filter, and group rules, then
//! traverse the derived sequence and receive incremental change events as
//! the source mutates. The source stays the single source of truth; the
//! view never writes to it.
//!
//! ## Crate layout
//!
//! - `value` / `record`
//!   The dynamic scalar model and the record surface the engine reads
//!   source items through.
//!
//! - `source`
//!   The consumed collection contract and the in-memory `ObservableVec`.
//!
//! - `view`
//!   The projection engine: items, handler chains, cursors, and the
//!   `View` façade with its event surface.
//!
//! - `obs`
//!   Injected diagnostics sink (no ambient logger).
//!
//! - `error`
//!   Public error type for runtime boundaries.
//!
//! ## Prelude
//!
//! `prelude` is an opinionated import set for application code. Intended
//! to be glob-imported to keep call sites concise.

// core modules
pub use vista_core::{obs, record, serialize, source, value, view};

pub mod error;
pub use error::Error;

/// Internal
#[doc(hidden)]
pub mod __internal {
    pub use vista_core as core;
}

pub mod prelude {
    pub use crate::error::Error;
    pub use vista_core::prelude::*;
    pub use vista_core::view::{ChangePacket, ItemContents, ViewCursor, ViewItem};
}
