//! Computes the fixed family of derivative sizes for a source image.

use crate::error::{Error, Result};

/// The fractions of the source width each derivative is scaled to,
/// paired with their labels. Order matters: rendered derivatives and
/// upload results are correlated to sizes by index.
pub const FRACTIONS: [(&str, u32, u32); 6] = [
    ("1_6", 1, 6),
    ("1_4", 1, 4),
    ("1_3", 1, 3),
    ("1_2", 1, 2),
    ("2_3", 2, 3),
    ("1", 1, 1),
];

/// A target size for one derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeSpec {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Round half away from zero, never below 1.
fn positive_round(value: f64) -> u32 {
    (value.round() as u32).max(1)
}

/// Compute the size plan for a `width`×`height` source, one entry
/// per fraction in [`FRACTIONS`] and in the same order.
pub fn plan(width: u32, height: u32) -> Result<Vec<SizeSpec>> {
    if width == 0 || height == 0 {
        return Err(Error::InvalidSourceDimensions { width, height });
    }
    let aspect_ratio = f64::from(width) / f64::from(height);
    Ok(FRACTIONS
        .iter()
        .map(|&(label, numerator, denominator)| {
            let target_width =
                positive_round(f64::from(width) * f64::from(numerator) / f64::from(denominator));
            SizeSpec {
                label,
                width: target_width,
                height: positive_round(f64::from(target_width) / aspect_ratio),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plans_two_to_one_source() {
        let sizes = plan(1200, 600).unwrap();
        let widths: Vec<u32> = sizes.iter().map(|s| s.width).collect();
        let heights: Vec<u32> = sizes.iter().map(|s| s.height).collect();
        assert_eq!(widths, [200, 300, 400, 600, 800, 1200]);
        assert_eq!(heights, [100, 150, 200, 300, 400, 600]);
    }

    #[test]
    fn labels_follow_fraction_order() {
        let labels: Vec<&str> = plan(640, 480).unwrap().iter().map(|s| s.label).collect();
        assert_eq!(labels, ["1_6", "1_4", "1_3", "1_2", "2_3", "1"]);
    }

    #[test]
    fn rounds_half_away_from_zero() {
        // 1000 / 6 = 166.67, 1000 / 3 = 333.33, 2000 / 3 = 666.67
        let sizes = plan(1000, 1000).unwrap();
        assert_eq!(sizes[0].width, 167);
        assert_eq!(sizes[2].width, 333);
        assert_eq!(sizes[4].width, 667);
        // 9 / 2 = 4.5
        assert_eq!(plan(9, 9).unwrap()[3].width, 5);
    }

    #[test]
    fn height_follows_rounded_width() {
        // aspect 4:3, width 1000 / 6 rounds to 167, 167 * 0.75 = 125.25
        let sizes = plan(1000, 750).unwrap();
        assert_eq!((sizes[0].width, sizes[0].height), (167, 125));
    }

    #[test]
    fn tiny_sources_stay_positive() {
        for size in plan(1, 1).unwrap() {
            assert!(size.width >= 1 && size.height >= 1);
        }
        for size in plan(2, 1000).unwrap() {
            assert!(size.width >= 1 && size.height >= 1);
        }
    }

    #[test]
    fn zero_height_is_rejected() {
        assert!(matches!(
            plan(800, 0),
            Err(Error::InvalidSourceDimensions { width: 800, height: 0 })
        ));
    }

    #[test]
    fn zero_width_is_rejected() {
        assert!(matches!(plan(0, 600), Err(Error::InvalidSourceDimensions { .. })));
    }
}
