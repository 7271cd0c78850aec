// This file is part of facemark, a library implementing the cascaded
// regression-tree face alignment method described in the following paper:
//
//      One Millisecond Face Alignment with an Ensemble of Regression Trees,
//      Vahid Kazemi and Josephine Sullivan.
//      In CVPR 2014.
//
// facemark may be redistributed and/or modified under the terms of the
// BSD 2-Clause License.

use crate::common::{FullObjectDetection, PixelSource};
use crate::error::{Error, Result};
use crate::model::ShapePredictor;

/// Mean average error of a predictor over a labeled set.
///
/// Runs inference on every detection box and averages the Euclidean
/// distance between predicted and ground-truth landmarks over all parts of
/// all instances. When `scales` is supplied, each instance's distances are
/// divided by its scale first (e.g. the inter-ocular distance); an empty
/// scale list means no normalization, which is the same as supplying all
/// ones.
pub fn test_shape_predictor<S: PixelSource>(
    images: &[S],
    detections: &[Vec<FullObjectDetection>],
    scales: Option<&[Vec<f64>]>,
    model: &ShapePredictor,
) -> Result<f64> {
    if images.len() != detections.len() {
        return Err(Error::LengthMismatch(format!(
            "got {} images but {} detection lists",
            images.len(),
            detections.len()
        )));
    }
    let scales = match scales {
        Some(s) if !s.is_empty() => {
            if s.len() != detections.len() {
                return Err(Error::LengthMismatch(format!(
                    "got {} detection lists but {} scale lists",
                    detections.len(),
                    s.len()
                )));
            }
            for (i, (dets, inst_scales)) in detections.iter().zip(s.iter()).enumerate() {
                if dets.len() != inst_scales.len() {
                    return Err(Error::LengthMismatch(format!(
                        "image {}: {} detections but {} scales",
                        i,
                        dets.len(),
                        inst_scales.len()
                    )));
                }
            }
            Some(s)
        }
        _ => None,
    };

    let mut sum = 0.0f64;
    let mut count = 0usize;
    for (image_idx, (image, dets)) in images.iter().zip(detections.iter()).enumerate() {
        for (det_idx, det) in dets.iter().enumerate() {
            let scale = scales.map_or(1.0, |s| s[image_idx][det_idx]);
            let predicted = model.predict(image, det.rect())?;
            if predicted.num_parts() != det.num_parts() {
                return Err(Error::LengthMismatch(format!(
                    "model predicts {} parts but detection has {}",
                    predicted.num_parts(),
                    det.num_parts()
                )));
            }
            for (p, truth) in predicted.iter().zip(det.parts().iter()) {
                sum += f64::from(p.distance(truth)) / scale;
                count += 1;
            }
        }
    }
    if count == 0 {
        return Err(Error::EmptyTrainingSet);
    }
    Ok(sum / count as f64)
}
