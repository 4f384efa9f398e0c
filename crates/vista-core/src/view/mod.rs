// 1️⃣ Module declarations
pub(crate) mod collection;
pub(crate) mod enumerator;
pub(crate) mod events;
pub(crate) mod filter;
pub(crate) mod handlers;
pub(crate) mod item;
pub(crate) mod session;
pub(crate) mod state;
pub(crate) mod strategy;
pub(crate) mod uid;

// 2️⃣ Public re-exports
pub use collection::{View, ViewOptions};
pub use enumerator::ViewCursor;
pub use events::{ChangePacket, ViewListener};
pub use handlers::{Direction, FilterArgs, FilterFn, GroupFn, SortFn, SortOperand};
pub use item::{ItemContents, ViewItem};
pub use state::{ItemState, ViewState};
