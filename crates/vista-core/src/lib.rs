//! Core runtime for Vista: values, records, the source contract, and the
//! projection engine exported via the `prelude`.
#![warn(unreachable_pub)] // too complex to adhere to right now

// public exports are one module level down
pub mod error;
pub mod obs;
pub mod record;
pub mod serialize;
pub mod source;
pub mod value;
pub mod view;

///
/// Prelude
///
/// Prelude contains only domain vocabulary.
/// No errors, sinks, serializers, or helpers are re-exported here.
///

pub mod prelude {
    pub use crate::{
        record::{FieldPresence, ObjectRecord, Record},
        source::{ChangeAction, ObservableVec, Source},
        value::Value,
        view::{Direction, FilterFn, GroupFn, SortFn, View, ViewListener, ViewOptions},
    };
}
