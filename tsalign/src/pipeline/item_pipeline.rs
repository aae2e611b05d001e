//! The prepare → align → materialize chain for one tilt series.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tilt_codec::format_angles;
use tracing::{debug, error, info, warn};

use crate::align::{AlignRequest, Aligner, AlignmentArtifact, ArtifactPaths, Geometry};
use crate::collection::run_blocking;
use crate::compose::compose_item;
use crate::domain::{Item, ItemState};
use crate::output::OutputRouter;
use crate::scheduler::SharedState;
use crate::{Error, Result};

/// Settings shared by every item's pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root of the per-item work directories.
    pub work_dir: PathBuf,
    pub geometry: Geometry,
    /// Projections used in the projection matching phase.
    pub projections: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("work"),
            geometry: Geometry::default(),
            projections: 10,
        }
    }
}

/// Runs the stages of an item's pipeline.
///
/// Failures of the item itself (aligner errors, unusable artifacts) are
/// recorded in the shared state and are not returned as errors. Errors that
/// are returned come from the output collections.
pub struct ItemPipeline {
    shared: Arc<SharedState>,
    aligner: Arc<dyn Aligner>,
    router: Arc<OutputRouter>,
    config: PipelineConfig,
}

impl ItemPipeline {
    pub fn new(
        shared: Arc<SharedState>,
        aligner: Arc<dyn Aligner>,
        router: Arc<OutputRouter>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            shared,
            aligner,
            router,
            config,
        }
    }

    pub fn paths(&self, item_id: &str) -> ArtifactPaths {
        ArtifactPaths::for_item(&self.config.work_dir, item_id)
    }

    fn scheduled_item(&self, item_id: &str) -> Result<Item> {
        self.shared
            .item(item_id)
            .ok_or_else(|| Error::not_found("scheduled item", item_id))
    }

    fn fail(&self, item_id: &str, error: &Error) {
        error!(item_id = %item_id, error = %error, "Item failed");
        self.shared.mark_failed(item_id);
        self.shared.set_state(item_id, ItemState::Failed);
    }

    /// Create the work directory and write the angle manifest.
    pub async fn prepare(&self, item_id: &str) -> Result<()> {
        let item = self.scheduled_item(item_id)?;
        let paths = self.paths(item_id);

        let result = async {
            tokio::fs::create_dir_all(&paths.work_dir).await?;
            tokio::fs::write(&paths.angle_manifest, format_angles(&item.enabled_angles())).await?;
            Ok::<_, Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                debug!(
                    item_id = %item_id,
                    manifest = %paths.angle_manifest.display(),
                    "Prepared work directory"
                );
            }
            Err(e) => self.fail(item_id, &e),
        }
        Ok(())
    }

    /// Run the aligner, unless the item already failed.
    pub async fn align(&self, item_id: &str) -> Result<()> {
        if self.shared.is_failed(item_id) {
            debug!(item_id = %item_id, "Skipping alignment of failed item");
            return Ok(());
        }
        let item = self.scheduled_item(item_id)?;
        self.shared.set_state(item_id, ItemState::Aligning);

        let request = match self.request_for(&item) {
            Ok(request) => request,
            Err(e) => {
                self.fail(item_id, &e);
                return Ok(());
            }
        };

        info!(item_id = %item_id, aligner = self.aligner.name(), "Aligning");
        match self.aligner.align(&request).await {
            Ok(()) => {
                self.shared.set_state(item_id, ItemState::Materializing);
            }
            Err(e) => self.fail(item_id, &e),
        }
        Ok(())
    }

    fn request_for(&self, item: &Item) -> Result<AlignRequest> {
        let paths = self.paths(&item.item_id);
        let input_path = item.input_file().ok_or_else(|| {
            Error::external(&item.item_id, "tilt series has no enabled images")
        })?;

        Ok(AlignRequest {
            item_id: item.item_id.clone(),
            input_path: input_path.to_path_buf(),
            output_path: paths.aligned_stack,
            angle_manifest: paths.angle_manifest,
            tilt_axis_angle: item.acquisition.tilt_axis_angle,
            geometry: self.config.geometry.clone(),
            projections: self.config.projections,
        })
    }

    /// Route the item to the failure collection, or compose its alignment and
    /// route it to the success collection.
    ///
    /// An item that cannot be emitted as aligned is failed and diverted to the
    /// failure collection. Only an error from that collection is returned.
    pub async fn materialize(&self, item_id: &str) -> Result<()> {
        let item = self.scheduled_item(item_id)?;

        if self.shared.is_failed(item_id) {
            return self.emit_failure(item).await;
        }

        let paths = self.paths(item_id);
        let artifact = match AlignmentArtifact::load(&paths).await {
            Ok(Some(artifact)) => artifact,
            Ok(None) => {
                let missing = Error::ArtifactMissing {
                    item_id: item_id.to_string(),
                    path: paths.transforms.display().to_string(),
                };
                // Reported as a success by the aligner, so it is not routed
                // to the failure collection.
                warn!(item_id = %item_id, error = %missing, "No alignment output, nothing emitted");
                self.shared.set_state(item_id, ItemState::ArtifactMissing);
                return Ok(());
            }
            Err(e) => {
                self.fail(item_id, &e);
                return self.emit_failure(item).await;
            }
        };

        let emitted = match compose_item(&item, &artifact.transforms, &artifact.angles) {
            Ok(aligned) => self.emit_success(aligned).await,
            Err(e) => Err(e),
        };
        match emitted {
            Ok(()) => {
                self.shared.set_state(item_id, ItemState::Emitted);
                Ok(())
            }
            Err(e) => {
                self.fail(item_id, &e);
                self.emit_failure(item).await
            }
        }
    }

    async fn emit_success(&self, item: Item) -> Result<()> {
        let router = self.router.clone();
        run_blocking(move || router.emit_success(item)).await
    }

    async fn emit_failure(&self, item: Item) -> Result<()> {
        let router = self.router.clone();
        run_blocking(move || router.emit_failure(&item)).await
    }
}
