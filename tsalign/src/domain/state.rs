//! Per-item processing state.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Where an item is in its pipeline.
///
/// `Pending → Scheduled → Aligning → Materializing → Emitted`, with `Failed`
/// and `ArtifactMissing` as the other terminal states.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ItemState {
    #[default]
    Pending,
    Scheduled,
    Aligning,
    Materializing,
    Emitted,
    Failed,
    /// The aligner reported success but left no usable transform stack.
    /// Nothing is emitted for the item.
    ArtifactMissing,
}

impl ItemState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemState::Emitted | ItemState::Failed | ItemState::ArtifactMissing
        )
    }

    /// Whether moving to `next` follows the pipeline's state machine.
    pub fn can_transition_to(&self, next: ItemState) -> bool {
        use ItemState::*;
        matches!(
            (self, next),
            (Pending, Scheduled)
                | (Scheduled, Aligning)
                | (Scheduled, Failed)
                | (Aligning, Materializing)
                | (Aligning, Failed)
                | (Aligning, ArtifactMissing)
                | (Materializing, Emitted)
                | (Materializing, Failed)
                | (Materializing, ArtifactMissing)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_terminal_states() {
        assert!(ItemState::Emitted.is_terminal());
        assert!(ItemState::Failed.is_terminal());
        assert!(ItemState::ArtifactMissing.is_terminal());
        assert!(!ItemState::Aligning.is_terminal());
    }

    #[test]
    fn test_transitions() {
        assert!(ItemState::Pending.can_transition_to(ItemState::Scheduled));
        assert!(ItemState::Aligning.can_transition_to(ItemState::Failed));
        assert!(!ItemState::Emitted.can_transition_to(ItemState::Failed));
        assert!(!ItemState::Pending.can_transition_to(ItemState::Emitted));
    }

    #[test]
    fn test_display_round_trip() {
        assert_eq!(ItemState::ArtifactMissing.to_string(), "artifact_missing");
        assert_eq!(
            ItemState::from_str("materializing").unwrap(),
            ItemState::Materializing
        );
    }
}
