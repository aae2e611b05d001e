//! The external alignment computation.
//!
//! The aligner is a black box: it reads an image stack and an angle manifest
//! and leaves file artifacts behind. [`Aligner`] is the seam the item pipeline
//! calls through; [`MarkerfreeAligner`] runs the real executable.

mod artifact;
mod markerfree;
mod process;

pub use artifact::{AlignmentArtifact, ArtifactPaths};
pub use markerfree::{AlignerConfig, MarkerfreeAligner};
pub use process::{CommandOutput, run_command_with_logs};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::Result;

/// Geometry passed to the aligner as `-g`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(default)]
    pub offset: i32,
    #[serde(default)]
    pub z_offset: i32,
    #[serde(default)]
    pub thickness: u32,
    /// Reconstruction thickness used during projection matching.
    #[serde(default)]
    pub recon_thickness: u32,
    /// Output image downsampling ratio.
    #[serde(default)]
    pub downsample: u32,
    /// GPU the aligner runs on.
    #[serde(default)]
    pub device_id: u32,
}

/// One invocation of the aligner for one tilt series.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignRequest {
    pub item_id: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub angle_manifest: PathBuf,
    /// Tilt axis angle from the series' acquisition, in degrees.
    pub tilt_axis_angle: f64,
    pub geometry: Geometry,
    /// Number of projections used in the projection matching phase.
    pub projections: u32,
}

impl AlignRequest {
    /// Command-line arguments, in the order the aligner expects them.
    ///
    /// The `-g` vector is integral; the tilt axis angle is truncated toward zero.
    /// `-s 1` asks for the `.xf` transform file.
    pub fn to_args(&self) -> Vec<String> {
        let g = &self.geometry;
        let geometry = [
            g.offset.to_string(),
            (self.tilt_axis_angle.trunc() as i64).to_string(),
            g.z_offset.to_string(),
            g.thickness.to_string(),
            g.recon_thickness.to_string(),
            g.downsample.to_string(),
            g.device_id.to_string(),
        ]
        .join(",");

        vec![
            "-i".to_string(),
            self.input_path.display().to_string(),
            "-o".to_string(),
            self.output_path.display().to_string(),
            "-a".to_string(),
            self.angle_manifest.display().to_string(),
            "-g".to_string(),
            geometry,
            "-p".to_string(),
            self.projections.to_string(),
            "-s".to_string(),
            "1".to_string(),
        ]
    }
}

/// Runs the alignment for one tilt series.
///
/// Implementations block (asynchronously) for as long as the computation takes
/// and return an error when it fails.
#[async_trait]
pub trait Aligner: Send + Sync {
    fn name(&self) -> &'static str;

    async fn align(&self, request: &AlignRequest) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_layout() {
        let request = AlignRequest {
            item_id: "ts1".to_string(),
            input_path: PathBuf::from("/data/ts1.mrcs"),
            output_path: PathBuf::from("/work/ts1/ts1_aligned.mrc"),
            angle_manifest: PathBuf::from("/work/ts1/ts1.rawtlt"),
            tilt_axis_angle: -84.7,
            geometry: Geometry {
                offset: 0,
                z_offset: 0,
                thickness: 300,
                recon_thickness: 200,
                downsample: 2,
                device_id: 1,
            },
            projections: 10,
        };

        assert_eq!(
            request.to_args(),
            vec![
                "-i",
                "/data/ts1.mrcs",
                "-o",
                "/work/ts1/ts1_aligned.mrc",
                "-a",
                "/work/ts1/ts1.rawtlt",
                "-g",
                "0,-84,0,300,200,2,1",
                "-p",
                "10",
                "-s",
                "1",
            ]
        );
    }
}
