// This file is part of facemark, a library implementing the cascaded
// regression-tree face alignment method described in the following paper:
//
//      One Millisecond Face Alignment with an Ensemble of Regression Trees,
//      Vahid Kazemi and Josephine Sullivan.
//      In CVPR 2014.
//
// facemark may be redistributed and/or modified under the terms of the
// BSD 2-Clause License.

use log::{log, Level};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::cascade::CascadeStage;
use crate::common::{FullObjectDetection, PixelSource, Point, Shape};
use crate::error::{Error, Result};
use crate::feat::{extract_pool_intensities, intensity_difference, sample_feature_pool, FeatureLocation};
use crate::math::SimilarityTransform;
use crate::model::ShapePredictor;
use crate::tree::{RegressionTree, SplitFeature};

/// How many fresh candidate batches a node may draw after one whose every
/// candidate sent all samples to the same side.
const SPLIT_RETRY_ROUNDS: usize = 5;

/// Attempts at drawing a pool pair before the spatial prior is waived.
const PAIR_SAMPLING_ATTEMPTS: usize = 100;

/// Hyperparameters of one training run. Validated before any work starts.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingOptions {
    /// Print per-stage progress at info level instead of debug.
    pub be_verbose: bool,
    /// Number of boosting rounds, each contributing one cascade stage.
    pub cascade_depth: u32,
    /// Depth of every regression tree; a tree has 2^depth leaves.
    pub tree_depth: u32,
    /// Trees built per cascade stage.
    pub num_trees_per_cascade: u32,
    /// Shrinkage applied to every leaf correction, in (0, 1].
    pub nu: f32,
    /// Training samples generated per labeled instance, each with its own
    /// starting guess.
    pub oversampling_amount: u32,
    /// Pixel locations in the shared per-stage feature pool.
    pub feature_pool_size: u32,
    /// Spatial prior strength: candidate pairs are accepted with
    /// probability `1 / (1 + lambda * distance)`, so larger values prefer
    /// features anchored to nearby landmarks.
    pub lambda: f32,
    /// Candidate splits scored at every tree node.
    pub num_test_splits: u32,
    /// Widens the disk feature offsets are drawn from, in box-normalized
    /// units.
    pub feature_pool_region_padding: f32,
    /// Seed for the single pseudo-random generator driving all sampling.
    pub random_seed: u64,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        TrainingOptions {
            be_verbose: false,
            cascade_depth: 10,
            tree_depth: 4,
            num_trees_per_cascade: 500,
            nu: 0.1,
            oversampling_amount: 20,
            feature_pool_size: 400,
            lambda: 0.1,
            num_test_splits: 20,
            feature_pool_region_padding: 0.0,
            random_seed: 0,
        }
    }
}

impl TrainingOptions {
    pub fn validate(&self) -> Result<()> {
        if !(self.nu > 0.0 && self.nu <= 1.0) {
            return Err(Error::InvalidOption(format!(
                "nu must be in (0, 1], got {}",
                self.nu
            )));
        }
        if !(self.lambda > 0.0) {
            return Err(Error::InvalidOption(format!(
                "lambda must be > 0, got {}",
                self.lambda
            )));
        }
        if !(self.feature_pool_region_padding >= 0.0) {
            return Err(Error::InvalidOption(format!(
                "feature_pool_region_padding must be >= 0, got {}",
                self.feature_pool_region_padding
            )));
        }
        if self.cascade_depth == 0 {
            return Err(Error::InvalidOption("cascade_depth must be > 0".to_string()));
        }
        if self.tree_depth == 0 {
            return Err(Error::InvalidOption("tree_depth must be > 0".to_string()));
        }
        if self.num_trees_per_cascade == 0 {
            return Err(Error::InvalidOption(
                "num_trees_per_cascade must be > 0".to_string(),
            ));
        }
        if self.oversampling_amount == 0 {
            return Err(Error::InvalidOption(
                "oversampling_amount must be > 0".to_string(),
            ));
        }
        if self.feature_pool_size < 2 {
            return Err(Error::InvalidOption(
                "feature_pool_size must be at least 2".to_string(),
            ));
        }
        if self.num_test_splits == 0 {
            return Err(Error::InvalidOption(
                "num_test_splits must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    fn progress_level(&self) -> Level {
        if self.be_verbose {
            Level::Info
        } else {
            Level::Debug
        }
    }
}

/// One (image, target, current-estimate) tuple, alive for the duration of
/// a training run. The target is fixed; the current estimate advances once
/// per tree, and the pixel cache is refreshed once per cascade stage.
struct TrainingSample {
    image_idx: usize,
    tform: SimilarityTransform,
    target: Shape,
    current: Shape,
    pixel_values: Vec<u8>,
}

/// Train a shape predictor with gradient boosting over regression trees.
///
/// `detections[i]` lists the labeled instances on `images[i]`. All
/// detections must carry the same number of parts and sit in
/// non-degenerate boxes. Identical inputs and options reproduce an
/// identical model.
pub fn train<S: PixelSource + Sync>(
    images: &[S],
    detections: &[Vec<FullObjectDetection>],
    options: &TrainingOptions,
) -> Result<ShapePredictor> {
    options.validate()?;
    if images.len() != detections.len() {
        return Err(Error::LengthMismatch(format!(
            "got {} images but {} detection lists",
            images.len(),
            detections.len()
        )));
    }

    // flatten to per-instance targets in box-normalized coordinates
    let mut targets: Vec<Shape> = vec![];
    let mut instances: Vec<(usize, SimilarityTransform)> = vec![];
    let mut num_parts = 0usize;
    for (image_idx, dets) in detections.iter().enumerate() {
        for det in dets {
            if targets.is_empty() {
                num_parts = det.num_parts();
                if num_parts == 0 {
                    return Err(Error::InvalidOption(
                        "detections must contain at least one part".to_string(),
                    ));
                }
            } else if det.num_parts() != num_parts {
                return Err(Error::LengthMismatch(format!(
                    "detection with {} parts in a training set of {}-part detections",
                    det.num_parts(),
                    num_parts
                )));
            }
            let tform = SimilarityTransform::from_rect(det.rect())?;
            targets.push(Shape::new(
                det.parts().iter().map(|p| tform.apply_inverse(*p)).collect(),
            ));
            instances.push((image_idx, tform));
        }
    }
    if targets.is_empty() {
        return Err(Error::EmptyTrainingSet);
    }

    let mut mean_shape = Shape::zeros(num_parts);
    for target in &targets {
        mean_shape.add(target);
    }
    mean_shape.scale(1.0 / targets.len() as f32);

    let mut rng = StdRng::seed_from_u64(options.random_seed);
    let mut samples = populate_samples(&targets, &instances, &mean_shape, options, &mut rng);

    log!(
        options.progress_level(),
        "training shape predictor: {} instances, {} samples after oversampling, {} parts",
        targets.len(),
        samples.len(),
        num_parts
    );

    let mut stages = Vec::with_capacity(options.cascade_depth as usize);
    for stage_idx in 0..options.cascade_depth {
        let pool = sample_feature_pool(
            &mut rng,
            num_parts,
            options.feature_pool_size as usize,
            options.feature_pool_region_padding,
        );
        // anchor landmark positions, used by the candidate distance prior
        let anchor_positions: Vec<Point> = pool
            .iter()
            .map(|loc| mean_shape[loc.anchor as usize])
            .collect();

        refresh_pixel_caches(&mut samples, &pool, images);

        let mut trees = Vec::with_capacity(options.num_trees_per_cascade as usize);
        for _ in 0..options.num_trees_per_cascade {
            trees.push(build_tree(&mut samples, &anchor_positions, options, &mut rng));
        }
        stages.push(CascadeStage::new(pool, trees));

        log!(
            options.progress_level(),
            "cascade stage {}/{}: mean residual {:.6}",
            stage_idx + 1,
            options.cascade_depth,
            mean_residual(&samples)
        );
    }

    Ok(ShapePredictor::new(mean_shape, stages))
}

/// Replicate every instance `oversampling_amount` times with diverse
/// starting guesses: the first replicate starts from the mean shape, the
/// rest from a random convex combination of two ground-truth shapes warped
/// into the instance's box.
fn populate_samples(
    targets: &[Shape],
    instances: &[(usize, SimilarityTransform)],
    mean_shape: &Shape,
    options: &TrainingOptions,
    rng: &mut StdRng,
) -> Vec<TrainingSample> {
    let mut samples = Vec::with_capacity(targets.len() * options.oversampling_amount as usize);
    for (k, (image_idx, tform)) in instances.iter().enumerate() {
        for replicate in 0..options.oversampling_amount {
            let current = if replicate == 0 || targets.len() == 1 {
                mean_shape.clone()
            } else {
                let a = rng.gen_range(0..targets.len());
                let b = rng.gen_range(0..targets.len());
                let alpha = rng.gen::<f32>();
                let mut blended = targets[a].clone();
                blended.scale(alpha);
                let mut other = targets[b].clone();
                other.scale(1.0 - alpha);
                blended.add(&other);
                blended
            };
            samples.push(TrainingSample {
                image_idx: *image_idx,
                tform: *tform,
                target: targets[k].clone(),
                current,
                pixel_values: vec![],
            });
        }
    }
    samples
}

/// Look up the stage's feature pool once per sample, against each sample's
/// current estimate. Samples are independent, so this fans out across the
/// worker pool.
fn refresh_pixel_caches<S: PixelSource + Sync>(
    samples: &mut [TrainingSample],
    pool: &[FeatureLocation],
    images: &[S],
) {
    #[cfg(feature = "rayon")]
    {
        samples.par_iter_mut().for_each(|sample| {
            sample.pixel_values =
                extract_pool_intensities(pool, &sample.current, &sample.tform, &images[sample.image_idx]);
        });
    }
    #[cfg(not(feature = "rayon"))]
    {
        for sample in samples.iter_mut() {
            sample.pixel_values =
                extract_pool_intensities(pool, &sample.current, &sample.tform, &images[sample.image_idx]);
        }
    }
}

/// Grow one fixed-depth tree against the current residuals, then fold the
/// leaf corrections into every sample's running estimate so the next tree
/// sees what is left over.
fn build_tree(
    samples: &mut [TrainingSample],
    anchor_positions: &[Point],
    options: &TrainingOptions,
    rng: &mut StdRng,
) -> RegressionTree {
    let num_parts = samples[0].target.num_parts();
    let residuals: Vec<Shape> = samples
        .iter()
        .map(|sample| sample.target.sub(&sample.current))
        .collect();

    let num_splits = (1usize << options.tree_depth) - 1;
    let num_leaves = 1usize << options.tree_depth;

    let mut order: Vec<usize> = (0..samples.len()).collect();
    // level-order node ranges over `order`; children of node i are 2i+1, 2i+2
    let mut ranges = vec![(0usize, 0usize); num_splits + num_leaves];
    ranges[0] = (0, samples.len());

    let mut splits = Vec::with_capacity(num_splits);
    for node in 0..num_splits {
        let (start, end) = ranges[node];
        let split = generate_split(
            samples,
            &order[start..end],
            &residuals,
            anchor_positions,
            options,
            rng,
        );

        // a difference above the threshold routes right, as at inference
        let mut left = Vec::with_capacity(end - start);
        let mut right = Vec::with_capacity(end - start);
        for &sample_idx in &order[start..end] {
            let diff = intensity_difference(&samples[sample_idx].pixel_values, split.idx1, split.idx2);
            if diff > split.threshold {
                right.push(sample_idx);
            } else {
                left.push(sample_idx);
            }
        }
        let mid = start + left.len();
        order[start..mid].copy_from_slice(&left);
        order[mid..end].copy_from_slice(&right);
        ranges[2 * node + 1] = (start, mid);
        ranges[2 * node + 2] = (mid, end);
        splits.push(split);
    }

    let mut leaves = Vec::with_capacity(num_leaves);
    for leaf_idx in 0..num_leaves {
        let (start, end) = ranges[num_splits + leaf_idx];
        // an empty leaf keeps the zero correction
        let mut value = Shape::zeros(num_parts);
        if end > start {
            for &sample_idx in &order[start..end] {
                value.add(&residuals[sample_idx]);
            }
            value.scale(options.nu / (end - start) as f32);
            for &sample_idx in &order[start..end] {
                samples[sample_idx].current.add(&value);
            }
        }
        leaves.push(value);
    }

    RegressionTree::new(splits, leaves)
}

/// A candidate drawn for one node: a pool pair plus the routed sample whose
/// intensity difference becomes the threshold.
struct SplitCandidate {
    idx1: u32,
    idx2: u32,
    probe: usize,
}

/// Pick the best of `num_test_splits` candidates by the sum-of-squared
/// residual criterion, re-sampling a bounded number of times if every
/// candidate degenerates into a one-sided partition.
fn generate_split(
    samples: &[TrainingSample],
    routed: &[usize],
    residuals: &[Shape],
    anchor_positions: &[Point],
    options: &TrainingOptions,
    rng: &mut StdRng,
) -> SplitFeature {
    // empty nodes can only appear below a degenerate ancestor; any valid
    // feature pair will do since both children stay empty
    if routed.is_empty() {
        return SplitFeature {
            idx1: 0,
            idx2: 1,
            threshold: 0.0,
        };
    }

    let num_parts = residuals[0].num_parts();
    let mut total = Shape::zeros(num_parts);
    for &sample_idx in routed {
        total.add(&residuals[sample_idx]);
    }

    let mut fallback = None;
    for _ in 0..SPLIT_RETRY_ROUNDS {
        // candidate sampling stays on the single seeded generator; only the
        // scoring below fans out
        let candidates: Vec<SplitCandidate> = (0..options.num_test_splits)
            .map(|_| sample_candidate(rng, anchor_positions, options.lambda, routed.len()))
            .collect();

        let scored: Vec<(f64, f32)>;
        #[cfg(feature = "rayon")]
        {
            scored = candidates
                .par_iter()
                .map(|candidate| score_candidate(candidate, samples, routed, residuals, &total))
                .collect();
        }
        #[cfg(not(feature = "rayon"))]
        {
            scored = candidates
                .iter()
                .map(|candidate| score_candidate(candidate, samples, routed, residuals, &total))
                .collect();
        }

        let mut best: Option<(f64, SplitFeature)> = None;
        for (candidate, (score, threshold)) in candidates.iter().zip(scored.iter()) {
            let feature = SplitFeature {
                idx1: candidate.idx1,
                idx2: candidate.idx2,
                threshold: *threshold,
            };
            if fallback.is_none() {
                fallback = Some(feature);
            }
            if score.is_finite() && best.as_ref().map_or(true, |(s, _)| score > s) {
                best = Some((*score, feature));
            }
        }
        if let Some((_, feature)) = best {
            return feature;
        }
    }

    // every round degenerated; the resulting one-sided children produce a
    // zero leaf on the empty side
    fallback.expect("at least one candidate per round")
}

fn sample_candidate(
    rng: &mut StdRng,
    anchor_positions: &[Point],
    lambda: f32,
    routed_len: usize,
) -> SplitCandidate {
    let pool_size = anchor_positions.len();
    let mut idx1 = 0usize;
    let mut idx2 = 1usize;
    for attempt in 0..PAIR_SAMPLING_ATTEMPTS {
        idx1 = rng.gen_range(0..pool_size);
        idx2 = rng.gen_range(0..pool_size);
        if idx1 == idx2 {
            continue;
        }
        let distance = anchor_positions[idx1].distance(&anchor_positions[idx2]);
        let accept = 1.0 / (1.0 + lambda * distance);
        if rng.gen::<f32>() < accept || attempt == PAIR_SAMPLING_ATTEMPTS - 1 {
            break;
        }
    }
    if idx1 == idx2 {
        idx2 = (idx1 + 1) % pool_size;
    }
    SplitCandidate {
        idx1: idx1 as u32,
        idx2: idx2 as u32,
        probe: rng.gen_range(0..routed_len),
    }
}

/// Score one candidate over the routed samples.
///
/// The threshold is the candidate's intensity difference at the probe
/// sample, which biases thresholds toward the empirical difference
/// distribution and pins the probe itself to the left branch, so the left
/// side is never empty. A split with an empty right side scores negative
/// infinity.
fn score_candidate(
    candidate: &SplitCandidate,
    samples: &[TrainingSample],
    routed: &[usize],
    residuals: &[Shape],
    total: &Shape,
) -> (f64, f32) {
    let probe_sample = routed[candidate.probe];
    let threshold =
        intensity_difference(&samples[probe_sample].pixel_values, candidate.idx1, candidate.idx2);

    let mut right_sum = Shape::zeros(total.num_parts());
    let mut right_count = 0usize;
    for &sample_idx in routed {
        let diff =
            intensity_difference(&samples[sample_idx].pixel_values, candidate.idx1, candidate.idx2);
        if diff > threshold {
            right_sum.add(&residuals[sample_idx]);
            right_count += 1;
        }
    }
    let left_count = routed.len() - right_count;
    if left_count == 0 || right_count == 0 {
        return (f64::NEG_INFINITY, threshold);
    }

    let left_sum = total.sub(&right_sum);
    let score = squared_norm(&left_sum) / left_count as f64
        + squared_norm(&right_sum) / right_count as f64;
    (score, threshold)
}

fn squared_norm(shape: &Shape) -> f64 {
    shape
        .iter()
        .map(|p| f64::from(p.x) * f64::from(p.x) + f64::from(p.y) * f64::from(p.y))
        .sum()
}

/// Mean per-landmark residual distance in normalized units, for progress
/// reporting.
fn mean_residual(samples: &[TrainingSample]) -> f64 {
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for sample in samples {
        for (t, c) in sample.target.iter().zip(sample.current.iter()) {
            sum += f64::from(t.distance(c));
            count += 1;
        }
    }
    sum / count as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ImageData, Rectangle};
    use crate::math::denormalize_shape;

    fn options_small() -> TrainingOptions {
        TrainingOptions {
            cascade_depth: 3,
            tree_depth: 3,
            num_trees_per_cascade: 8,
            nu: 0.3,
            oversampling_amount: 4,
            feature_pool_size: 60,
            num_test_splits: 30,
            random_seed: 42,
            ..TrainingOptions::default()
        }
    }

    /// Two synthetic instances whose landmark layout correlates with the
    /// ramp direction of the image under the box.
    fn ramp_training_set() -> (Vec<ImageData>, Vec<Vec<FullObjectDetection>>) {
        let width = 60;
        let rising = ImageData::from_fn(width, width, |x, _| (x * 4).min(255) as u8);
        let falling = ImageData::from_fn(width, width, |x, _| 255u8.saturating_sub((x * 4) as u8));
        let rect = Rectangle::new(10.0, 10.0, 50.0, 50.0);

        let shape_left = Shape::new(vec![
            Point::new(18.0, 25.0),
            Point::new(24.0, 40.0),
            Point::new(30.0, 20.0),
        ]);
        let shape_right = Shape::new(vec![
            Point::new(36.0, 32.0),
            Point::new(42.0, 18.0),
            Point::new(46.0, 42.0),
        ]);

        let detections = vec![
            vec![FullObjectDetection::new(rect, shape_left)],
            vec![FullObjectDetection::new(rect, shape_right)],
        ];
        (vec![rising, falling], detections)
    }

    #[test]
    fn default_options_validate() {
        assert!(TrainingOptions::default().validate().is_ok());
    }

    #[test]
    fn bad_options_are_rejected() {
        for mutate in [
            (&|o: &mut TrainingOptions| o.nu = 0.0) as &dyn Fn(&mut TrainingOptions),
            &|o| o.nu = -0.5,
            &|o| o.nu = 1.5,
            &|o| o.lambda = 0.0,
            &|o| o.feature_pool_region_padding = -0.1,
            &|o| o.cascade_depth = 0,
            &|o| o.tree_depth = 0,
            &|o| o.num_trees_per_cascade = 0,
            &|o| o.oversampling_amount = 0,
            &|o| o.feature_pool_size = 1,
            &|o| o.num_test_splits = 0,
        ] {
            let mut options = TrainingOptions::default();
            mutate(&mut options);
            assert!(matches!(options.validate(), Err(Error::InvalidOption(_))));
        }
    }

    #[test]
    fn length_mismatch_fails_before_training() {
        let images = vec![ImageData::from_fn(8, 8, |_, _| 0)];
        let rect = Rectangle::new(0.0, 0.0, 8.0, 8.0);
        let det = FullObjectDetection::new(rect, Shape::zeros(2));
        let detections = vec![vec![det.clone()], vec![det]];
        assert!(matches!(
            train(&images, &detections, &TrainingOptions::default()),
            Err(Error::LengthMismatch(_))
        ));
    }

    #[test]
    fn inconsistent_part_counts_are_rejected() {
        let images = vec![ImageData::from_fn(8, 8, |_, _| 0)];
        let rect = Rectangle::new(0.0, 0.0, 8.0, 8.0);
        let detections = vec![vec![
            FullObjectDetection::new(rect, Shape::zeros(2)),
            FullObjectDetection::new(rect, Shape::zeros(3)),
        ]];
        assert!(matches!(
            train(&images, &detections, &options_small()),
            Err(Error::LengthMismatch(_))
        ));
    }

    #[test]
    fn empty_training_set_is_rejected() {
        let images: Vec<ImageData> = vec![];
        let detections: Vec<Vec<FullObjectDetection>> = vec![];
        assert!(matches!(
            train(&images, &detections, &options_small()),
            Err(Error::EmptyTrainingSet)
        ));
    }

    #[test]
    fn training_reduces_error_on_its_own_examples() {
        let (images, detections) = ramp_training_set();
        let options = options_small();
        let model = train(&images, &detections, &options).unwrap();

        assert_eq!(model.num_stages(), 3);
        assert_eq!(model.num_parts(), 3);

        let mut initial_error = 0.0f32;
        let mut trained_error = 0.0f32;
        for (image, dets) in images.iter().zip(detections.iter()) {
            for det in dets {
                let initial = denormalize_shape(model.initial_shape(), det.rect()).unwrap();
                let predicted = model.predict(image, det.rect()).unwrap();
                for ((p0, p1), truth) in initial.iter().zip(predicted.iter()).zip(det.parts().iter())
                {
                    initial_error += p0.distance(truth);
                    trained_error += p1.distance(truth);
                }
            }
        }
        assert!(
            trained_error < initial_error,
            "training did not reduce error: {} vs {}",
            trained_error,
            initial_error
        );
    }

    #[test]
    fn identical_seeds_reproduce_identical_models() {
        let (images, detections) = ramp_training_set();
        let options = options_small();
        let a = train(&images, &detections, &options).unwrap();
        let b = train(&images, &detections, &options).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_seeds_differ() {
        let (images, detections) = ramp_training_set();
        let a = train(&images, &detections, &options_small()).unwrap();
        let b = train(
            &images,
            &detections,
            &TrainingOptions {
                random_seed: 99,
                ..options_small()
            },
        )
        .unwrap();
        assert_ne!(a, b);
    }
}
