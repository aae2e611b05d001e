//! Input and output collection contracts.
//!
//! The record store behind a collection is external to the scheduler. These
//! traits capture the operations the scheduler and the output router need;
//! in-memory and JSON-file implementations are provided.

mod json;
mod memory;

pub use json::{JsonInputCollection, JsonOutputCollection, JsonOutputStore, SetDocument};
pub use memory::{
    MemoryInputCollection, MemoryInputFeeder, MemoryOutputCollection, MemoryOutputStore,
    OutputSnapshot,
};

use crate::{Error, Result};
use crate::domain::{CollectionMetadata, Item};
use crate::output::OutputKind;

/// A growing collection of tilt series.
///
/// Reads reflect the view loaded by the last `refresh()`; the underlying store
/// may have moved on since.
pub trait InputCollection: Send {
    /// Whether more items (or images of existing items) may still arrive.
    fn is_open(&self) -> bool;

    /// Ids of every visible item, duplicates included, in enumeration order.
    fn all_ids(&self) -> Vec<String>;

    /// Every visible item, in enumeration order.
    fn iterate(&self) -> Vec<Item>;

    fn metadata(&self) -> CollectionMetadata;

    /// Reload the view from the underlying store.
    fn refresh(&mut self) -> Result<()>;
}

/// A point-in-time copy of an input collection.
#[derive(Debug, Clone, Default)]
pub struct InputSnapshot {
    pub stream_open: bool,
    pub ids: Vec<String>,
    pub items: Vec<Item>,
}

impl InputSnapshot {
    pub fn capture(input: &dyn InputCollection) -> Self {
        Self {
            stream_open: input.is_open(),
            ids: input.all_ids(),
            items: input.iterate(),
        }
    }
}

/// An append/update-only output collection.
pub trait OutputCollection: Send {
    fn copy_metadata_from(&mut self, metadata: &CollectionMetadata);

    /// Mark the collection as still receiving items (or not).
    fn set_stream_open(&mut self, open: bool);

    fn contains(&self, item_id: &str) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a new item. Fails if the id is already present or the collection is closed.
    fn append(&mut self, item: Item) -> Result<()>;

    /// Replace an item already present.
    fn update(&mut self, item: Item) -> Result<()>;

    /// Drop an item that has not been persisted yet. Returns whether it was present.
    fn remove(&mut self, item_id: &str) -> bool;

    /// Persist pending changes.
    fn write(&mut self) -> Result<()>;

    /// Mark the stream closed and persist. No appends are accepted afterwards.
    fn close(&mut self) -> Result<()>;
}

/// Creates (or reopens) output collections by kind.
pub trait OutputStore: Send + Sync {
    fn open(&self, kind: OutputKind) -> Result<Box<dyn OutputCollection>>;

    /// Ids already stored for `kind` by an earlier run. Empty when none exists.
    fn existing_ids(&self, kind: OutputKind) -> Result<Vec<String>>;
}

/// Run collection I/O on the blocking thread pool.
///
/// Collection methods are synchronous and may touch the filesystem.
pub async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Other(format!("collection task failed: {e}")))?
}
