//! JSON-file collections.
//!
//! One document per collection:
//!
//! ```json
//! { "stream_open": true, "metadata": { ... }, "items": [ ... ] }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{InputCollection, OutputCollection, OutputStore};
use crate::domain::{CollectionMetadata, Item};
use crate::output::OutputKind;
use crate::{Error, Result};

/// On-disk shape of a collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetDocument {
    #[serde(default)]
    pub stream_open: bool,
    #[serde(default)]
    pub metadata: CollectionMetadata,
    #[serde(default)]
    pub items: Vec<Item>,
}

impl SetDocument {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write to a sibling temporary file, then rename over `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Input collection backed by a JSON document that another process keeps appending to.
pub struct JsonInputCollection {
    path: PathBuf,
    view: SetDocument,
}

impl JsonInputCollection {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let view = SetDocument::load(&path)?;
        Ok(Self { path, view })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl InputCollection for JsonInputCollection {
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
        self.view = SetDocument::load(&self.path)?;
        debug!(
            path = %self.path.display(),
            items = self.view.items.len(),
            stream_open = self.view.stream_open,
            "Reloaded input collection"
        );
        Ok(())
    }
}

/// Output store writing `<dir>/<Kind>.json`.
pub struct JsonOutputStore {
    dir: PathBuf,
}

impl JsonOutputStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, kind: OutputKind) -> PathBuf {
        self.dir.join(format!("{kind}.json"))
    }
}

impl OutputStore for JsonOutputStore {
    fn open(&self, kind: OutputKind) -> Result<Box<dyn OutputCollection>> {
        let path = self.path_for(kind);
        let doc = if path.exists() {
            SetDocument::load(&path)?
        } else {
            SetDocument::default()
        };
        debug!(path = %path.display(), items = doc.items.len(), "Opened output collection");
        Ok(Box::new(JsonOutputCollection {
            kind,
            path,
            doc,
            closed: false,
        }))
    }

    fn existing_ids(&self, kind: OutputKind) -> Result<Vec<String>> {
        let path = self.path_for(kind);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let doc = SetDocument::load(&path)?;
        Ok(doc.items.into_iter().map(|i| i.item_id).collect())
    }
}

/// One JSON-file output collection. Changes are kept in memory until `write()`.
pub struct JsonOutputCollection {
    kind: OutputKind,
    path: PathBuf,
    doc: SetDocument,
    closed: bool,
}

impl JsonOutputCollection {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::CollectionClosed(self.kind.to_string()));
        }
        Ok(())
    }
}

impl OutputCollection for JsonOutputCollection {
    fn copy_metadata_from(&mut self, metadata: &CollectionMetadata) {
        self.doc.metadata = metadata.clone();
    }

    fn set_stream_open(&mut self, open: bool) {
        self.doc.stream_open = open;
    }

    fn contains(&self, item_id: &str) -> bool {
        self.doc.items.iter().any(|i| i.item_id == item_id)
    }

    fn len(&self) -> usize {
        self.doc.items.len()
    }

    fn append(&mut self, item: Item) -> Result<()> {
        self.ensure_open()?;
        if self.contains(&item.item_id) {
            return Err(Error::validation(format!(
                "{} already contains {}",
                self.kind, item.item_id
            )));
        }
        self.doc.items.push(item);
        Ok(())
    }

    fn update(&mut self, item: Item) -> Result<()> {
        self.ensure_open()?;
        let slot = self
            .doc
            .items
            .iter_mut()
            .find(|i| i.item_id == item.item_id)
            .ok_or_else(|| Error::not_found("item", item.item_id.clone()))?;
        *slot = item;
        Ok(())
    }

    fn remove(&mut self, item_id: &str) -> bool {
        let before = self.doc.items.len();
        self.doc.items.retain(|i| i.item_id != item_id);
        self.doc.items.len() != before
    }

    fn write(&mut self) -> Result<()> {
        self.doc.save(&self.path)
    }

    fn close(&mut self) -> Result<()> {
        self.doc.stream_open = false;
        self.closed = true;
        self.doc.save(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SubRecord;
    use tempfile::TempDir;

    fn write_doc(path: &Path, doc: &SetDocument) {
        std::fs::write(path, serde_json::to_string(doc).unwrap()).unwrap();
    }

    #[test]
    fn test_input_refresh_rereads_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("input.json");
        let mut doc = SetDocument {
            stream_open: true,
            ..Default::default()
        };
        write_doc(&path, &doc);

        let mut input = JsonInputCollection::open(&path).unwrap();
        assert!(input.is_open());
        assert!(input.all_ids().is_empty());

        doc.items.push(Item::new("ts1").with_sub_record(SubRecord::new(0, "ts1.mrcs", 0.0)));
        doc.stream_open = false;
        write_doc(&path, &doc);

        assert!(input.all_ids().is_empty());
        input.refresh().unwrap();
        assert_eq!(input.all_ids(), vec!["ts1".to_string()]);
        assert!(!input.is_open());
    }

    #[test]
    fn test_output_persists_on_write_and_close() {
        let dir = TempDir::new().unwrap();
        let store = JsonOutputStore::new(dir.path());
        let mut out = store.open(OutputKind::Failed).unwrap();
        out.set_stream_open(true);
        out.append(Item::new("ts2")).unwrap();
        assert!(store.existing_ids(OutputKind::Failed).unwrap().is_empty());

        out.write().unwrap();
        let on_disk = SetDocument::load(&store.path_for(OutputKind::Failed)).unwrap();
        assert!(on_disk.stream_open);
        assert_eq!(store.existing_ids(OutputKind::Failed).unwrap(), vec!["ts2"]);

        out.close().unwrap();
        let on_disk = SetDocument::load(&store.path_for(OutputKind::Failed)).unwrap();
        assert!(!on_disk.stream_open);
        assert!(out.append(Item::new("ts3")).is_err());
    }

    #[test]
    fn test_reopen_keeps_existing_items() {
        let dir = TempDir::new().unwrap();
        let store = JsonOutputStore::new(dir.path());
        {
            let mut out = store.open(OutputKind::Aligned).unwrap();
            out.append(Item::new("ts1")).unwrap();
            out.close().unwrap();
        }
        let mut out = store.open(OutputKind::Aligned).unwrap();
        assert!(out.contains("ts1"));
        out.append(Item::new("ts2")).unwrap();
        out.write().unwrap();
        assert_eq!(
            store.existing_ids(OutputKind::Aligned).unwrap(),
            vec!["ts1", "ts2"]
        );
    }
}
