//! In-memory collections.
//!
//! Used by tests and by embedders that feed tilt series from their own
//! ingestion code.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::{InputCollection, OutputCollection, OutputStore};
use crate::domain::{CollectionMetadata, Item, SubRecord};
use crate::output::OutputKind;
use crate::{Error, Result};

#[derive(Debug, Clone)]
struct Feed {
    stream_open: bool,
    metadata: CollectionMetadata,
    items: Vec<Item>,
}

/// Input collection whose visible view only moves on `refresh()`.
pub struct MemoryInputCollection {
    feed: Arc<Mutex<Feed>>,
    view: Feed,
}

/// Producer side of a [`MemoryInputCollection`].
#[derive(Clone)]
pub struct MemoryInputFeeder {
    feed: Arc<Mutex<Feed>>,
}

impl MemoryInputCollection {
    /// Create an open, empty collection and its feeder.
    pub fn new(metadata: CollectionMetadata) -> (Self, MemoryInputFeeder) {
        let feed = Feed {
            stream_open: true,
            metadata,
            items: Vec::new(),
        };
        let view = feed.clone();
        let feed = Arc::new(Mutex::new(feed));
        (
            Self {
                feed: feed.clone(),
                view,
            },
            MemoryInputFeeder { feed },
        )
    }

    /// A closed collection holding `items`.
    pub fn closed(metadata: CollectionMetadata, items: Vec<Item>) -> Self {
        let (mut input, feeder) = Self::new(metadata);
        for item in items {
            feeder.push_item(item);
        }
        feeder.close();
        input.view = input.feed.lock().clone();
        input
    }
}

impl InputCollection for MemoryInputCollection {
    fn is_open(&self) -> bool {
        self.view.stream_open
    }

    fn all_ids(&self) -> Vec<String> {
        self.view.items.iter().map(|i| i.item_id.clone()).collect()
    }

    fn iterate(&self) -> Vec<Item> {
        self.view.items.clone()
    }

    fn metadata(&self) -> CollectionMetadata {
        self.view.metadata.clone()
    }

    fn refresh(&mut self) -> Result<()> {
        self.view = self.feed.lock().clone();
        Ok(())
    }
}

impl MemoryInputFeeder {
    pub fn push_item(&self, item: Item) {
        self.feed.lock().items.push(item);
    }

    /// Add an image to an item that is already visible.
    pub fn push_sub_record(&self, item_id: &str, sub_record: SubRecord) -> Result<()> {
        let mut feed = self.feed.lock();
        let item = feed
            .items
            .iter_mut()
            .find(|i| i.item_id == item_id)
            .ok_or_else(|| Error::not_found("item", item_id))?;
        item.sub_records.push(sub_record);
        Ok(())
    }

    /// Declare that nothing more will arrive.
    pub fn close(&self) {
        self.feed.lock().stream_open = false;
    }
}

/// Observable state of an in-memory output collection.
#[derive(Debug, Clone, Default)]
pub struct OutputSnapshot {
    pub metadata: CollectionMetadata,
    pub items: Vec<Item>,
    pub stream_open: bool,
    pub closed: bool,
    /// How many times `write()` was called.
    pub writes: usize,
    /// How many times the store handed this collection out.
    pub opens: usize,
}

impl OutputSnapshot {
    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.item_id.as_str()).collect()
    }

    pub fn get(&self, item_id: &str) -> Option<&Item> {
        self.items.iter().find(|i| i.item_id == item_id)
    }
}

type SharedSnapshot = Arc<Mutex<OutputSnapshot>>;

/// Output store keeping every collection in memory.
#[derive(Clone, Default)]
pub struct MemoryOutputStore {
    collections: Arc<Mutex<HashMap<OutputKind, SharedSnapshot>>>,
    failing_writes: Arc<Mutex<HashSet<OutputKind>>>,
}

impl MemoryOutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a collection as if an earlier run had produced it.
    pub fn with_existing(self, kind: OutputKind, items: Vec<Item>) -> Self {
        let snapshot = OutputSnapshot {
            items,
            closed: true,
            ..Default::default()
        };
        self.collections
            .lock()
            .insert(kind, Arc::new(Mutex::new(snapshot)));
        self
    }

    /// Make `write()` and `close()` fail for collections of `kind`.
    pub fn with_failing_writes(self, kind: OutputKind) -> Self {
        self.failing_writes.lock().insert(kind);
        self
    }

    pub fn snapshot(&self, kind: OutputKind) -> Option<OutputSnapshot> {
        self.collections
            .lock()
            .get(&kind)
            .map(|shared| shared.lock().clone())
    }
}

impl OutputStore for MemoryOutputStore {
    fn open(&self, kind: OutputKind) -> Result<Box<dyn OutputCollection>> {
        let shared = self
            .collections
            .lock()
            .entry(kind)
            .or_default()
            .clone();
        {
            let mut state = shared.lock();
            state.opens += 1;
            state.closed = false;
        }
        Ok(Box::new(MemoryOutputCollection {
            kind,
            state: shared,
            fail_writes: self.failing_writes.lock().contains(&kind),
        }))
    }

    fn existing_ids(&self, kind: OutputKind) -> Result<Vec<String>> {
        Ok(self
            .snapshot(kind)
            .map(|s| s.items.iter().map(|i| i.item_id.clone()).collect())
            .unwrap_or_default())
    }
}

/// Handle to one in-memory output collection.
pub struct MemoryOutputCollection {
    kind: OutputKind,
    state: SharedSnapshot,
    fail_writes: bool,
}

impl MemoryOutputCollection {
    fn check_writable(&self) -> Result<()> {
        if self.fail_writes {
            return Err(Error::Io(std::io::Error::other(format!(
                "{}: disk full",
                self.kind
            ))));
        }
        Ok(())
    }
}

impl OutputCollection for MemoryOutputCollection {
    fn copy_metadata_from(&mut self, metadata: &CollectionMetadata) {
        self.state.lock().metadata = metadata.clone();
    }

    fn set_stream_open(&mut self, open: bool) {
        self.state.lock().stream_open = open;
    }

    fn contains(&self, item_id: &str) -> bool {
        self.state.lock().get(item_id).is_some()
    }

    fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    fn append(&mut self, item: Item) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::CollectionClosed(self.kind.to_string()));
        }
        if state.get(&item.item_id).is_some() {
            return Err(Error::validation(format!(
                "{} already contains {}",
                self.kind, item.item_id
            )));
        }
        state.items.push(item);
        Ok(())
    }

    fn update(&mut self, item: Item) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::CollectionClosed(self.kind.to_string()));
        }
        let slot = state
            .items
            .iter_mut()
            .find(|i| i.item_id == item.item_id)
            .ok_or_else(|| Error::not_found("item", item.item_id.clone()))?;
        *slot = item;
        Ok(())
    }

    fn remove(&mut self, item_id: &str) -> bool {
        let mut state = self.state.lock();
        let before = state.items.len();
        state.items.retain(|i| i.item_id != item_id);
        state.items.len() != before
    }

    fn write(&mut self) -> Result<()> {
        self.check_writable()?;
        self.state.lock().writes += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.lock();
        state.stream_open = false;
        state.closed = true;
        Ok(())
    }
}
