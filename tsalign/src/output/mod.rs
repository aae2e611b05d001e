//! Output routing.

mod router;

pub use router::{CollectionState, OutputRouter};

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter};

/// The output collections a run can produce.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumIter,
)]
pub enum OutputKind {
    /// Successfully aligned tilt series.
    #[strum(serialize = "TiltSeries")]
    Aligned,
    /// Original tilt series whose alignment failed.
    #[strum(serialize = "FailedTiltSeries")]
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_collection_names() {
        assert_eq!(OutputKind::Aligned.to_string(), "TiltSeries");
        assert_eq!(OutputKind::Failed.as_ref(), "FailedTiltSeries");
        assert_eq!(OutputKind::iter().count(), 2);
    }
}
