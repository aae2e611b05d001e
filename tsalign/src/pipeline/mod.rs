//! Step graph, executor and the per-item pipeline.

mod dag;
mod executor;
mod item_pipeline;

pub use dag::{Stage, StepGraph, StepId, StepKey, StepStatus};
pub use executor::{ExecutionStats, StepExecutor, StepRunner};
pub use item_pipeline::{ItemPipeline, PipelineConfig};

/// The steps of one item, each depending on the one before.
pub fn item_steps(item_id: &str) -> [(StepKey, Option<StepKey>); 3] {
    let prepare = StepKey::item(item_id, Stage::Prepare);
    let align = StepKey::item(item_id, Stage::Align);
    let materialize = StepKey::item(item_id, Stage::Materialize);
    [
        (prepare.clone(), None),
        (align.clone(), Some(prepare)),
        (materialize, Some(align)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_steps_chain() {
        let steps = item_steps("ts1");
        assert_eq!(steps[0].0.to_string(), "ts1/prepare");
        assert!(steps[0].1.is_none());
        assert_eq!(steps[1].1.as_ref(), Some(&steps[0].0));
        assert_eq!(steps[2].1.as_ref(), Some(&steps[1].0));
        assert_eq!(steps[2].0.stage, Stage::Materialize);
    }
}
