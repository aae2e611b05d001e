//! Domain types for tilt-series alignment.

mod item;
mod state;

pub use item::{Acquisition, CollectionMetadata, Item, SubRecord};
pub use state::ItemState;
