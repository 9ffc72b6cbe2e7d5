use proptest::prelude::*;
use s3_image_derivatives::plan::{plan, FRACTIONS};
use s3_image_derivatives::Error;

proptest! {
    #[test]
    fn sizes_follow_the_fraction_table(width in 1u32..20_000, height in 1u32..20_000) {
        let sizes = plan(width, height).unwrap();
        prop_assert_eq!(sizes.len(), FRACTIONS.len());

        let aspect_ratio = f64::from(width) / f64::from(height);
        for (size, (label, numerator, denominator)) in sizes.iter().zip(FRACTIONS.iter()) {
            let expected_width = (f64::from(width) * f64::from(*numerator) / f64::from(*denominator))
                .round()
                .max(1.0) as u32;
            let expected_height = (f64::from(expected_width) / aspect_ratio).round().max(1.0) as u32;
            prop_assert_eq!(size.label, *label);
            prop_assert_eq!(size.width, expected_width);
            prop_assert_eq!(size.height, expected_height);
            prop_assert!(size.width >= 1 && size.height >= 1);
        }
    }

    #[test]
    fn full_size_is_the_source(width in 1u32..20_000, height in 1u32..20_000) {
        let sizes = plan(width, height).unwrap();
        let full = sizes.last().unwrap();
        prop_assert_eq!((full.width, full.height), (width, height));
    }

    #[test]
    fn zero_height_is_always_rejected(width in 0u32..20_000) {
        let is_invalid = matches!(plan(width, 0), Err(Error::InvalidSourceDimensions { .. }));
        prop_assert!(is_invalid);
    }
}
