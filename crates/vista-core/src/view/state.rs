use crate::{
    error::InternalError,
    record::Record,
    serialize,
    source::Source,
    value::Value,
    view::collection::{View, ViewOptions},
};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

///
/// ViewState
///
/// The serialised form of a projection: construction options, the cursor
/// position, and each materialised item's observable state. Handler
/// closures are not part of the snapshot; callers re-attach them after
/// rehydration and the engine re-derives order and visibility.
///

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ViewState {
    pub id_property: Option<String>,
    pub unique: bool,
    pub cursor_position: i64,
    pub items: Vec<ItemState>,
}

///
/// ItemState
///

#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum ItemState {
    Data {
        source_index: u64,
        selected: bool,
        version: u64,
    },
    Group {
        id: Value,
        selected: bool,
        version: u64,
    },
}

impl<R: Record + 'static> View<R> {
    /// Serialise the projection's observable state.
    pub fn snapshot(&self) -> Result<Vec<u8>, InternalError> {
        let state = self.inner().export_state()?;
        serialize::serialize(&state).map_err(Into::into)
    }

    /// Rehydrate a projection over `source` from a snapshot.
    ///
    /// Data items are re-resolved through the source by stored index;
    /// group-header state is applied when a header with the same id is
    /// next materialised.
    pub fn restore(source: Rc<dyn Source<R>>, bytes: &[u8]) -> Result<Self, InternalError> {
        let state: ViewState = serialize::deserialize(bytes)?;

        let options = ViewOptions {
            id_property: state.id_property.clone(),
            unique: state.unique,
            important_properties: Vec::new(),
        };
        let view = Self::with_options(source, &options)?;
        view.inner().import_state(&state)?;
        Ok(view)
    }
}
