//! Tilt series (items) and tilt images (sub-records).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tilt_codec::Matrix3;

/// Acquisition metadata shared by the images of a tilt series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Acquisition {
    /// Tilt axis angle in degrees.
    #[serde(default)]
    pub tilt_axis_angle: f64,
    /// Anything else the ingestion source recorded, carried through untouched.
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Acquisition {
    pub fn with_tilt_axis(tilt_axis_angle: f64) -> Self {
        Self {
            tilt_axis_angle,
            extra: BTreeMap::new(),
        }
    }
}

/// Collection-level metadata copied onto every output collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<[u32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquisition: Option<Acquisition>,
}

/// One tilt image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubRecord {
    /// Position in the stack.
    pub index: u32,
    /// Image stack file holding this tilt image.
    pub file_name: PathBuf,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub tilt_angle: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Matrix3>,
}

fn default_enabled() -> bool {
    true
}

impl SubRecord {
    pub fn new(index: u32, file_name: impl Into<PathBuf>, tilt_angle: f64) -> Self {
        Self {
            index,
            file_name: file_name.into(),
            enabled: true,
            tilt_angle,
            transform: None,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_transform(mut self, transform: Matrix3) -> Self {
        self.transform = Some(transform);
        self
    }
}

/// A tilt series: an ordered sequence of tilt images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub item_id: String,
    #[serde(default)]
    pub acquisition: Acquisition,
    #[serde(default)]
    pub sub_records: Vec<SubRecord>,
}

impl Item {
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            acquisition: Acquisition::default(),
            sub_records: Vec::new(),
        }
    }

    pub fn with_acquisition(mut self, acquisition: Acquisition) -> Self {
        self.acquisition = acquisition;
        self
    }

    pub fn with_sub_record(mut self, sub_record: SubRecord) -> Self {
        self.sub_records.push(sub_record);
        self
    }

    /// Number of sub-records materialized so far.
    pub fn size(&self) -> usize {
        self.sub_records.len()
    }

    /// Sub-records in stack order.
    pub fn ordered(&self) -> Vec<&SubRecord> {
        let mut records: Vec<&SubRecord> = self.sub_records.iter().collect();
        records.sort_by_key(|r| r.index);
        records
    }

    pub fn enabled_count(&self) -> usize {
        self.sub_records.iter().filter(|r| r.enabled).count()
    }

    pub fn first_enabled(&self) -> Option<&SubRecord> {
        self.ordered().into_iter().find(|r| r.enabled)
    }

    /// Image file handed to the aligner.
    pub fn input_file(&self) -> Option<&Path> {
        self.first_enabled().map(|r| r.file_name.as_path())
    }

    /// Tilt angles of the enabled sub-records, in stack order.
    pub fn enabled_angles(&self) -> Vec<f64> {
        self.ordered()
            .into_iter()
            .filter(|r| r.enabled)
            .map(|r| r.tilt_angle)
            .collect()
    }
}
