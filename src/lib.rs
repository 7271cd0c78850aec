// This file is part of facemark, a library implementing the cascaded
// regression-tree face alignment method described in the following paper:
//
//      One Millisecond Face Alignment with an Ensemble of Regression Trees,
//      Vahid Kazemi and Josephine Sullivan.
//      In CVPR 2014.
//
// facemark may be redistributed and/or modified under the terms of the
// BSD 2-Clause License.

//! Facial landmark localization with an ensemble of regression trees.
//!
//! Given an image and a bounding box (from any face or object detector),
//! a trained [`ShapePredictor`] returns the positions of a fixed set of
//! landmark points in a single pass over a cascade of regression trees.
//! The crate also contains the trainer producing such models from labeled
//! examples, an evaluator reporting mean landmark error, and a versioned
//! binary model format.
//!
//! # Examples
//!
//! ```rust
//! use facemark::{
//!     FullObjectDetection, ImageData, Point, Rectangle, Shape, TrainingOptions,
//! };
//!
//! // a tiny synthetic training set: one image, one labeled instance
//! let image = ImageData::from_fn(64, 64, |x, _| (x * 4).min(255) as u8);
//! let rect = Rectangle::new(8.0, 8.0, 56.0, 56.0);
//! let parts = Shape::new(vec![Point::new(20.0, 30.0), Point::new(44.0, 30.0)]);
//! let detections = vec![vec![FullObjectDetection::new(rect, parts)]];
//!
//! let options = TrainingOptions {
//!     cascade_depth: 1,
//!     num_trees_per_cascade: 2,
//!     tree_depth: 2,
//!     oversampling_amount: 1,
//!     feature_pool_size: 32,
//!     ..TrainingOptions::default()
//! };
//! let model = facemark::train_shape_predictor(&[image.clone()], &detections, &options).unwrap();
//!
//! let landmarks = model.predict(&image, &rect).unwrap();
//! assert_eq!(landmarks.num_parts(), 2);
//! ```

mod cascade;
mod common;
pub mod dataset;
mod error;
mod eval;
mod feat;
mod math;
mod model;
mod trainer;
mod tree;

use std::path::Path;

pub use cascade::CascadeStage;
pub use common::{FullObjectDetection, ImageData, PixelSource, Point, Rectangle, Shape};
pub use error::{Error, Result};
pub use feat::FeatureLocation;
pub use math::{denormalize_shape, normalize_shape, SimilarityTransform};
pub use model::{load_model, ShapePredictor};
pub use trainer::TrainingOptions;
pub use tree::{RegressionTree, SplitFeature};

/// Train a shape predictor from in-memory images and their labeled
/// detections.
///
/// `detections[i]` lists the instances on `images[i]`; the two lists must
/// agree in length and every detection must carry the same number of parts.
/// Training is deterministic in the inputs and
/// [`TrainingOptions::random_seed`].
pub fn train_shape_predictor<S: PixelSource + Sync>(
    images: &[S],
    detections: &[Vec<FullObjectDetection>],
    options: &TrainingOptions,
) -> Result<ShapePredictor> {
    trainer::train(images, detections, options)
}

/// Train a shape predictor from a dataset manifest and serialize it to
/// `output_path`.
pub fn train_shape_predictor_from_dataset<P, Q>(
    dataset_path: P,
    output_path: Q,
    options: &TrainingOptions,
) -> Result<ShapePredictor>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let (images, detections) = dataset::load_dataset(dataset_path)?;
    let model = trainer::train(&images, &detections, options)?;
    model.save(output_path)?;
    Ok(model)
}

/// Mean average landmark error of `model` over a labeled set.
///
/// See [`TrainingOptions`] for how such models are produced. Passing
/// `None` (or an empty slice) for `scales` leaves the error unnormalized;
/// per-instance scales divide each landmark distance, e.g. for
/// inter-ocular normalization.
pub fn test_shape_predictor<S: PixelSource>(
    images: &[S],
    detections: &[Vec<FullObjectDetection>],
    scales: Option<&[Vec<f64>]>,
    model: &ShapePredictor,
) -> Result<f64> {
    eval::test_shape_predictor(images, detections, scales, model)
}

/// Mean average landmark error of a serialized model over a dataset
/// manifest.
pub fn test_shape_predictor_from_dataset<P, Q>(dataset_path: P, model_path: Q) -> Result<f64>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let model = load_model(model_path)?;
    let (images, detections) = dataset::load_dataset(dataset_path)?;
    eval::test_shape_predictor(&images, &detections, None, &model)
}
