//! Observability: diagnostics events for projection maintenance.

pub(crate) mod sink;

// re-exports
pub use sink::{CountingObsSink, NoopObsSink, ObsEvent, ObsSink, with_obs_sink};
