// This file is part of facemark, a library implementing the cascaded
// regression-tree face alignment method described in the following paper:
//
//      One Millisecond Face Alignment with an Ensemble of Regression Trees,
//      Vahid Kazemi and Josephine Sullivan.
//      In CVPR 2014.
//
// facemark may be redistributed and/or modified under the terms of the
// BSD 2-Clause License.

use std::f32::consts::PI;

use rand::rngs::StdRng;
use rand::Rng;

use crate::common::{Point, PixelSource, Shape};
use crate::math::SimilarityTransform;

/// One sampled pixel location of a stage's shared feature pool: a landmark
/// index plus an offset in box-normalized units.
///
/// At extraction time the offset is anchored to the *current* position of
/// the landmark, so the sampled pixel tracks the running shape estimate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FeatureLocation {
    pub anchor: u32,
    pub dx: f32,
    pub dy: f32,
}

impl FeatureLocation {
    /// Nominal position of this location for a given shape.
    #[inline]
    pub fn position(&self, shape: &Shape) -> Point {
        shape[self.anchor as usize] + Point::new(self.dx, self.dy)
    }
}

/// Sample the shared feature pool for one cascade stage.
///
/// Each location picks a uniformly random anchor landmark and an offset
/// drawn uniformly from a disk of radius `0.5 + padding` in box-normalized
/// units, so a padding of 0.5 covers a region twice the box extent.
pub fn sample_feature_pool(
    rng: &mut StdRng,
    num_parts: usize,
    pool_size: usize,
    padding: f32,
) -> Vec<FeatureLocation> {
    let radius = 0.5 + padding;
    let mut pool = Vec::with_capacity(pool_size);
    for _ in 0..pool_size {
        let anchor = rng.gen_range(0..num_parts) as u32;
        // uniform over the disk area, not its radius
        let r = radius * rng.gen::<f32>().sqrt();
        let theta = 2.0 * PI * rng.gen::<f32>();
        pool.push(FeatureLocation {
            anchor,
            dx: r * theta.cos(),
            dy: r * theta.sin(),
        });
    }
    pool
}

/// Look up the intensities of every pool location for one shape estimate.
///
/// Offsets are anchored to the current landmark positions, mapped to
/// absolute coordinates through the box transform, and rounded to the
/// nearest pixel. Lookups that land outside the image come back as the
/// zero-intensity sentinel from the pixel source.
pub fn extract_pool_intensities<S: PixelSource>(
    pool: &[FeatureLocation],
    current: &Shape,
    tform: &SimilarityTransform,
    image: &S,
) -> Vec<u8> {
    pool.iter()
        .map(|loc| {
            let abs = tform.apply(loc.position(current));
            // clamp before the cast so huge coordinates cannot wrap
            let x = num::clamp(abs.x.round(), -1.0, i32::MAX as f32) as i32;
            let y = num::clamp(abs.y.round(), -1.0, i32::MAX as f32) as i32;
            image.intensity(x, y)
        })
        .collect()
}

/// The intensity difference driving one split decision.
#[inline]
pub fn intensity_difference(pixel_values: &[u8], idx1: u32, idx2: u32) -> f32 {
    f32::from(pixel_values[idx1 as usize]) - f32::from(pixel_values[idx2 as usize])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ImageData, Rectangle};
    use rand::SeedableRng;

    #[test]
    fn pool_respects_anchor_and_radius_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let pool = sample_feature_pool(&mut rng, 5, 200, 0.25);
        assert_eq!(pool.len(), 200);
        for loc in &pool {
            assert!(loc.anchor < 5);
            let r = (loc.dx * loc.dx + loc.dy * loc.dy).sqrt();
            assert!(r <= 0.75 + 1e-5);
        }
    }

    #[test]
    fn pool_sampling_is_seed_deterministic() {
        let a = sample_feature_pool(&mut StdRng::seed_from_u64(3), 8, 50, 0.0);
        let b = sample_feature_pool(&mut StdRng::seed_from_u64(3), 8, 50, 0.0);
        assert_eq!(a, b);
    }

    #[test]
    fn extraction_follows_the_current_estimate() {
        // horizontal ramp, intensity == 10 * x
        let image = ImageData::from_fn(20, 20, |x, _| (x * 10) as u8);
        let rect = Rectangle::new(0.0, 0.0, 10.0, 10.0);
        let tform = SimilarityTransform::from_rect(&rect).unwrap();

        let pool = vec![
            FeatureLocation {
                anchor: 0,
                dx: 0.0,
                dy: 0.0,
            },
            FeatureLocation {
                anchor: 0,
                dx: 0.5,
                dy: 0.0,
            },
        ];

        let shape = Shape::new(vec![Point::new(0.2, 0.5)]);
        let values = extract_pool_intensities(&pool, &shape, &tform, &image);
        assert_eq!(values, vec![20, 70]);

        // move the anchor landmark and the sampled pixels move with it
        let shape = Shape::new(vec![Point::new(0.5, 0.5)]);
        let values = extract_pool_intensities(&pool, &shape, &tform, &image);
        assert_eq!(values, vec![50, 100]);
    }

    #[test]
    fn out_of_bounds_lookup_is_zero() {
        let image = ImageData::from_fn(10, 10, |_, _| 200);
        let rect = Rectangle::new(0.0, 0.0, 10.0, 10.0);
        let tform = SimilarityTransform::from_rect(&rect).unwrap();

        let pool = vec![FeatureLocation {
            anchor: 0,
            dx: 5.0,
            dy: 0.0,
        }];
        let shape = Shape::new(vec![Point::new(0.5, 0.5)]);
        assert_eq!(extract_pool_intensities(&pool, &shape, &tform, &image), vec![0]);
    }

    #[test]
    fn difference_is_signed() {
        let values = vec![10u8, 250u8];
        assert_eq!(intensity_difference(&values, 0, 1), -240.0);
        assert_eq!(intensity_difference(&values, 1, 0), 240.0);
    }
}
