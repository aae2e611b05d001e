//! Files the aligner reads and writes for one tilt series.

use std::path::{Path, PathBuf};
use tilt_codec::{TransformStack, parse_angles};
use tracing::debug;

use crate::Result;

/// Per-item file layout under the work directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// `<work>/<item_id>`
    pub work_dir: PathBuf,
    /// Angle manifest handed to the aligner, `<item_id>.rawtlt`.
    pub angle_manifest: PathBuf,
    /// Aligned stack written by the aligner, `<item_id>_aligned.mrc`.
    pub aligned_stack: PathBuf,
    /// Transform stack written next to the aligned stack, `.xf`.
    pub transforms: PathBuf,
    /// Refined angles written next to the aligned stack, `.tlt`.
    pub angles: PathBuf,
}

impl ArtifactPaths {
    pub fn for_item(work_root: &Path, item_id: &str) -> Self {
        let work_dir = work_root.join(item_id);
        let aligned_stack = work_dir.join(format!("{item_id}_aligned.mrc"));
        Self {
            angle_manifest: work_dir.join(format!("{item_id}.rawtlt")),
            transforms: aligned_stack.with_extension("xf"),
            angles: aligned_stack.with_extension("tlt"),
            aligned_stack,
            work_dir,
        }
    }
}

/// Decoded aligner output.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentArtifact {
    pub transforms: TransformStack,
    pub angles: Vec<f64>,
}

impl AlignmentArtifact {
    /// Read the artifact back.
    ///
    /// Returns `None` when the transform stack is missing or empty. Angles come
    /// from the aligner's `.tlt` when it wrote one, otherwise from the manifest.
    pub async fn load(paths: &ArtifactPaths) -> Result<Option<Self>> {
        if !non_empty(&paths.transforms).await {
            return Ok(None);
        }

        let text = tokio::fs::read_to_string(&paths.transforms).await?;
        let transforms = TransformStack::parse(&text)?;

        let angle_source = if non_empty(&paths.angles).await {
            &paths.angles
        } else {
            &paths.angle_manifest
        };
        let text = tokio::fs::read_to_string(angle_source).await?;
        let angles = parse_angles(&text)?;

        debug!(
            transforms = transforms.len(),
            angles = angles.len(),
            angle_source = %angle_source.display(),
            "Loaded alignment artifact"
        );

        Ok(Some(Self { transforms, angles }))
    }
}

async fn non_empty(path: &Path) -> bool {
    matches!(tokio::fs::metadata(path).await, Ok(meta) if meta.is_file() && meta.len() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilt_codec::{Matrix3, write_angle_file};

    #[test]
    fn test_layout() {
        let paths = ArtifactPaths::for_item(Path::new("/work"), "ts1");
        assert_eq!(paths.work_dir, PathBuf::from("/work/ts1"));
        assert_eq!(paths.angle_manifest, PathBuf::from("/work/ts1/ts1.rawtlt"));
        assert_eq!(paths.aligned_stack, PathBuf::from("/work/ts1/ts1_aligned.mrc"));
        assert_eq!(paths.transforms, PathBuf::from("/work/ts1/ts1_aligned.xf"));
        assert_eq!(paths.angles, PathBuf::from("/work/ts1/ts1_aligned.tlt"));
    }

    #[tokio::test]
    async fn test_missing_or_empty_transforms() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ArtifactPaths::for_item(dir.path(), "ts1");
        std::fs::create_dir_all(&paths.work_dir).unwrap();
        assert!(AlignmentArtifact::load(&paths).await.unwrap().is_none());

        std::fs::write(&paths.transforms, "").unwrap();
        assert!(AlignmentArtifact::load(&paths).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prefers_refined_angles() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ArtifactPaths::for_item(dir.path(), "ts1");
        std::fs::create_dir_all(&paths.work_dir).unwrap();
        TransformStack::new(vec![Matrix3::IDENTITY; 2])
            .write(&paths.transforms)
            .unwrap();
        write_angle_file(&paths.angle_manifest, &[-3.0, 3.0]).unwrap();

        let artifact = AlignmentArtifact::load(&paths).await.unwrap().unwrap();
        assert_eq!(artifact.angles, vec![-3.0, 3.0]);

        write_angle_file(&paths.angles, &[-2.9, 3.1]).unwrap();
        let artifact = AlignmentArtifact::load(&paths).await.unwrap().unwrap();
        assert_eq!(artifact.transforms.len(), 2);
        assert_eq!(artifact.angles, vec![-2.9, 3.1]);
    }
}
