//! Routes finished tilt series to the aligned or failed output collection.

use parking_lot::Mutex;
use std::sync::Arc;
use strum::{Display, IntoEnumIterator};
use tracing::{debug, error, info};

use super::OutputKind;
use crate::collection::{OutputCollection, OutputStore};
use crate::domain::{CollectionMetadata, Item};
use crate::{Error, Result};

/// Lifecycle of one output collection within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum CollectionState {
    #[default]
    Uninitialized,
    Open,
    Closed,
}

#[derive(Default)]
struct Slot {
    collection: Option<Box<dyn OutputCollection>>,
    state: CollectionState,
}

#[derive(Default)]
struct Slots {
    aligned: Slot,
    failed: Slot,
    finalized: bool,
}

impl Slots {
    fn get_mut(&mut self, kind: OutputKind) -> &mut Slot {
        match kind {
            OutputKind::Aligned => &mut self.aligned,
            OutputKind::Failed => &mut self.failed,
        }
    }

    fn get(&self, kind: OutputKind) -> &Slot {
        match kind {
            OutputKind::Aligned => &self.aligned,
            OutputKind::Failed => &self.failed,
        }
    }
}

/// Owns the output collections of a run.
///
/// Collections are created on first use, flushed after every item and closed
/// once by [`OutputRouter::close_all`].
pub struct OutputRouter {
    store: Arc<dyn OutputStore>,
    metadata: CollectionMetadata,
    slots: Mutex<Slots>,
}

impl OutputRouter {
    /// `metadata` is copied onto each collection when it is created.
    pub fn new(store: Arc<dyn OutputStore>, metadata: CollectionMetadata) -> Self {
        Self {
            store,
            metadata,
            slots: Mutex::new(Slots::default()),
        }
    }

    /// Register an aligned tilt series.
    pub fn emit_success(&self, item: Item) -> Result<()> {
        self.emit(OutputKind::Aligned, item)
    }

    /// Register the original, unaligned tilt series of a failed item.
    pub fn emit_failure(&self, original: &Item) -> Result<()> {
        info!(item_id = %original.item_id, "Registering failed tilt series");
        self.emit(OutputKind::Failed, original.clone())
    }

    fn emit(&self, kind: OutputKind, item: Item) -> Result<()> {
        let mut slots = self.slots.lock();
        if slots.finalized {
            return Err(Error::CollectionClosed(kind.to_string()));
        }
        let slot = slots.get_mut(kind);

        match slot.state {
            CollectionState::Closed => return Err(Error::CollectionClosed(kind.to_string())),
            CollectionState::Uninitialized => {
                slot.collection = Some(self.create(kind)?);
                slot.state = CollectionState::Open;
            }
            CollectionState::Open => {}
        }

        let Some(collection) = slot.collection.as_mut() else {
            return Err(Error::Other(format!("{kind} is open without a collection")));
        };

        let item_id = item.item_id.clone();
        let appended = if collection.contains(&item_id) {
            debug!(item_id = %item_id, collection = %kind, "Item already registered, updating");
            collection.update(item)?;
            false
        } else {
            collection.append(item)?;
            true
        };
        if let Err(e) = collection.write() {
            // An unpersisted append must not linger in the collection.
            if appended {
                collection.remove(&item_id);
            }
            error!(item_id = %item_id, collection = %kind, error = %e, "Failed to write output collection");
            return Err(e);
        }

        info!(
            item_id = %item_id,
            collection = %kind,
            size = collection.len(),
            "Registered output"
        );
        Ok(())
    }

    fn create(&self, kind: OutputKind) -> Result<Box<dyn OutputCollection>> {
        let mut collection = self.store.open(kind)?;
        collection.copy_metadata_from(&self.metadata);
        collection.set_stream_open(true);
        info!(collection = %kind, existing = collection.len(), "Opened output collection");
        Ok(collection)
    }

    /// Close every collection opened during the run. Later calls do nothing.
    ///
    /// All collections are attempted even if one fails; the first error is returned.
    pub fn close_all(&self) -> Result<Vec<OutputKind>> {
        let mut slots = self.slots.lock();
        slots.finalized = true;
        let mut closed = Vec::new();
        let mut first_error = None;

        for kind in OutputKind::iter() {
            let slot = slots.get_mut(kind);
            if slot.state != CollectionState::Open {
                continue;
            }
            let Some(collection) = slot.collection.as_mut() else {
                continue;
            };
            slot.state = CollectionState::Closed;
            match collection.close() {
                Ok(()) => {
                    info!(collection = %kind, size = collection.len(), "Closed output collection");
                    closed.push(kind);
                }
                Err(e) => {
                    error!(collection = %kind, error = %e, "Failed to close output collection");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(closed),
        }
    }

    pub fn state(&self, kind: OutputKind) -> CollectionState {
        self.slots.lock().get(kind).state
    }
}
