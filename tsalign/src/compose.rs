//! Merges freshly computed alignments into a tilt series.
//!
//! The aligner only sees enabled images, so its transform stack and angle list
//! are dense over enabled images while the tilt series is sparse (enabled and
//! disabled images interleaved). A position counter over enabled images maps
//! one onto the other.

use tilt_codec::{Matrix3, TransformStack};

use crate::domain::Item;
use crate::{Error, Result};

/// Build the aligned copy of `item` from the aligner's transforms and angles.
///
/// For the k-th enabled image the emitted transform is `new × previous` (the new
/// correction applied after any existing one) and the emitted angle is
/// `angles[k]`. Disabled images keep their angle and carry their previous
/// transform, or the identity when they had none.
pub fn compose_item(item: &Item, transforms: &TransformStack, angles: &[f64]) -> Result<Item> {
    let enabled = item.enabled_count();
    if transforms.len() != enabled || angles.len() != enabled {
        return Err(Error::ArtifactMismatch {
            item_id: item.item_id.clone(),
            enabled,
            transforms: transforms.len(),
            angles: angles.len(),
        });
    }

    let mut aligned = item.clone();
    aligned.sub_records.sort_by_key(|r| r.index);

    let mut position = 0usize;
    for record in aligned.sub_records.iter_mut() {
        if record.enabled {
            let new_transform = transforms[position];
            record.transform = Some(compose(new_transform, record.transform));
            record.tilt_angle = angles[position];
            position += 1;
        } else {
            record.transform = Some(record.transform.unwrap_or(Matrix3::IDENTITY));
        }
    }

    Ok(aligned)
}

/// `new × previous`, or `new` alone when there is no previous transform.
pub fn compose(new_transform: Matrix3, previous: Option<Matrix3>) -> Matrix3 {
    match previous {
        Some(previous) => new_transform * previous,
        None => new_transform,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SubRecord;

    fn series(records: Vec<SubRecord>) -> Item {
        records
            .into_iter()
            .fold(Item::new("ts1"), |item, r| item.with_sub_record(r))
    }

    #[test]
    fn test_identity_previous_yields_new() {
        let r = Matrix3::rotation(25.0);
        let item = series(vec![
            SubRecord::new(0, "ts1.mrcs", 0.0).with_transform(Matrix3::IDENTITY),
        ]);
        let out = compose_item(&item, &TransformStack::new(vec![r]), &[1.5]).unwrap();
        assert!(out.sub_records[0].transform.unwrap().approx_eq(&r, 1e-12));
        assert_eq!(out.sub_records[0].tilt_angle, 1.5);
    }

    #[test]
    fn test_new_is_applied_after_previous() {
        let r1 = Matrix3::rotation(90.0);
        let r2 = Matrix3::translation(5.0, -2.0);
        let item = series(vec![SubRecord::new(0, "ts1.mrcs", 0.0).with_transform(r1)]);

        let out = compose_item(&item, &TransformStack::new(vec![r2]), &[0.0]).unwrap();
        let emitted = out.sub_records[0].transform.unwrap();

        assert!(emitted.approx_eq(&(r2 * r1), 1e-12));
        assert!(!emitted.approx_eq(&(r1 * r2), 1e-9));
    }

    #[test]
    fn test_missing_previous_yields_new() {
        let t = Matrix3::translation(3.0, 4.0);
        let item = series(vec![SubRecord::new(0, "ts1.mrcs", 0.0)]);
        let out = compose_item(&item, &TransformStack::new(vec![t]), &[0.0]).unwrap();
        assert_eq!(out.sub_records[0].transform, Some(t));
    }

    #[test]
    fn test_disabled_records_do_not_consume_positions() {
        let prev = Matrix3::translation(1.0, 1.0);
        let a = Matrix3::rotation(1.0);
        let b = Matrix3::rotation(2.0);
        let item = series(vec![
            SubRecord::new(0, "ts1.mrcs", -20.0).disabled(),
            SubRecord::new(1, "ts1.mrcs", -10.0),
            SubRecord::new(2, "ts1.mrcs", 0.0).disabled().with_transform(prev),
            SubRecord::new(3, "ts1.mrcs", 10.0),
        ]);

        let out = compose_item(&item, &TransformStack::new(vec![a, b]), &[-9.5, 10.5]).unwrap();
        let r = &out.sub_records;

        assert_eq!(r[0].tilt_angle, -20.0);
        assert_eq!(r[0].transform, Some(Matrix3::IDENTITY));
        assert_eq!(r[1].tilt_angle, -9.5);
        assert_eq!(r[1].transform, Some(a));
        assert_eq!(r[2].tilt_angle, 0.0);
        assert_eq!(r[2].transform, Some(prev));
        assert_eq!(r[3].tilt_angle, 10.5);
        assert_eq!(r[3].transform, Some(b));
    }

    #[test]
    fn test_emits_in_index_order() {
        let item = series(vec![
            SubRecord::new(2, "ts1.mrcs", 0.0),
            SubRecord::new(0, "ts1.mrcs", 0.0),
            SubRecord::new(1, "ts1.mrcs", 0.0),
        ]);
        let stack = TransformStack::new(vec![
            Matrix3::translation(0.0, 0.0),
            Matrix3::translation(1.0, 0.0),
            Matrix3::translation(2.0, 0.0),
        ]);
        let out = compose_item(&item, &stack, &[10.0, 0.0, -10.0]).unwrap();
        let indices: Vec<u32> = out.sub_records.iter().map(|r| r.index).collect();
        let angles: Vec<f64> = out.sub_records.iter().map(|r| r.tilt_angle).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(angles, vec![10.0, 0.0, -10.0]);
        assert_eq!(out.sub_records[2].transform, Some(Matrix3::translation(2.0, 0.0)));
    }

    #[test]
    fn test_count_mismatch_is_rejected() {
        let item = series(vec![
            SubRecord::new(0, "ts1.mrcs", 0.0),
            SubRecord::new(1, "ts1.mrcs", 0.0),
        ]);
        let err = compose_item(&item, &TransformStack::new(vec![Matrix3::IDENTITY]), &[0.0, 1.0])
            .unwrap_err();
        match err {
            Error::ArtifactMismatch {
                enabled,
                transforms,
                angles,
                ..
            } => {
                assert_eq!((enabled, transforms, angles), (2, 1, 2));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
