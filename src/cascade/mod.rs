// This file is part of facemark, a library implementing the cascaded
// regression-tree face alignment method described in the following paper:
//
//      One Millisecond Face Alignment with an Ensemble of Regression Trees,
//      Vahid Kazemi and Josephine Sullivan.
//      In CVPR 2014.
//
// facemark may be redistributed and/or modified under the terms of the
// BSD 2-Clause License.

use crate::common::{PixelSource, Shape};
use crate::feat::{extract_pool_intensities, FeatureLocation};
use crate::math::SimilarityTransform;
use crate::tree::RegressionTree;

/// One boosting round of the predictor: an ordered tree ensemble together
/// with the shared feature-pool locations all of its trees index into.
#[derive(Clone, Debug, PartialEq)]
pub struct CascadeStage {
    feature_pool: Vec<FeatureLocation>,
    trees: Vec<RegressionTree>,
}

impl CascadeStage {
    pub fn new(feature_pool: Vec<FeatureLocation>, trees: Vec<RegressionTree>) -> Self {
        CascadeStage {
            feature_pool,
            trees,
        }
    }

    #[inline]
    pub fn feature_pool(&self) -> &[FeatureLocation] {
        &self.feature_pool
    }

    #[inline]
    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    /// Apply the stage to a box-normalized shape estimate.
    ///
    /// The pool is looked up once against the estimate as it stood at stage
    /// entry; every tree then routes the same intensities and its leaf
    /// correction is accumulated into the estimate.
    pub fn apply<S: PixelSource>(
        &self,
        current: &mut Shape,
        tform: &SimilarityTransform,
        image: &S,
    ) {
        let pixel_values = extract_pool_intensities(&self.feature_pool, current, tform, image);
        for tree in &self.trees {
            current.add(tree.predict(&pixel_values));
        }
    }
}
