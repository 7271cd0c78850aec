// This file is part of facemark, a library implementing the cascaded
// regression-tree face alignment method described in the following paper:
//
//      One Millisecond Face Alignment with an Ensemble of Regression Trees,
//      Vahid Kazemi and Josephine Sullivan.
//      In CVPR 2014.
//
// facemark may be redistributed and/or modified under the terms of the
// BSD 2-Clause License.

use crate::common::{Point, Rectangle, Shape};
use crate::error::{Error, Result};

/// The axis-aligned similarity transform that maps the unit square onto a
/// bounding box: per-axis scale plus translation, no rotation.
///
/// `apply` goes from box-normalized coordinates to absolute image
/// coordinates; `apply_inverse` goes back. The two compose to the identity
/// for every non-degenerate box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimilarityTransform {
    scale_x: f32,
    scale_y: f32,
    tx: f32,
    ty: f32,
}

impl SimilarityTransform {
    /// Derive the transform sending the unit square onto `rect`.
    ///
    /// Boxes with zero width or height have no inverse and are rejected.
    pub fn from_rect(rect: &Rectangle) -> Result<Self> {
        if rect.is_degenerate() {
            return Err(Error::DegenerateBox(*rect));
        }
        Ok(SimilarityTransform {
            scale_x: rect.width(),
            scale_y: rect.height(),
            tx: rect.left(),
            ty: rect.top(),
        })
    }

    #[inline]
    pub fn apply(&self, p: Point) -> Point {
        Point::new(self.tx + p.x * self.scale_x, self.ty + p.y * self.scale_y)
    }

    #[inline]
    pub fn apply_inverse(&self, p: Point) -> Point {
        Point::new((p.x - self.tx) / self.scale_x, (p.y - self.ty) / self.scale_y)
    }
}

/// Map a shape from absolute image coordinates into the box-normalized
/// frame of `rect`.
pub fn normalize_shape(shape: &Shape, rect: &Rectangle) -> Result<Shape> {
    let tform = SimilarityTransform::from_rect(rect)?;
    Ok(Shape::new(
        shape.iter().map(|p| tform.apply_inverse(*p)).collect(),
    ))
}

/// Map a box-normalized shape back to absolute image coordinates.
pub fn denormalize_shape(shape: &Shape, rect: &Rectangle) -> Result<Shape> {
    let tform = SimilarityTransform::from_rect(rect)?;
    Ok(Shape::new(shape.iter().map(|p| tform.apply(*p)).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_round_trip() {
        let rect = Rectangle::new(40.0, 60.0, 140.0, 260.0);
        let tform = SimilarityTransform::from_rect(&rect).unwrap();

        let p = Point::new(73.5, 112.25);
        let back = tform.apply(tform.apply_inverse(p));
        assert!((back.x - p.x).abs() < 1e-4);
        assert!((back.y - p.y).abs() < 1e-4);

        // unit square corners land on the box corners
        assert_eq!(tform.apply(Point::new(0.0, 0.0)), Point::new(40.0, 60.0));
        assert_eq!(tform.apply(Point::new(1.0, 1.0)), Point::new(140.0, 260.0));
    }

    #[test]
    fn shape_round_trip() {
        let rect = Rectangle::new(-10.0, 5.0, 22.0, 21.0);
        let shape = Shape::new(vec![
            Point::new(0.0, 10.0),
            Point::new(11.0, 13.0),
            Point::new(-3.0, 20.5),
        ]);

        let norm = normalize_shape(&shape, &rect).unwrap();
        let restored = denormalize_shape(&norm, &rect).unwrap();
        for (a, b) in shape.iter().zip(restored.iter()) {
            assert!(a.distance(b) < 1e-4);
        }
    }

    #[test]
    fn degenerate_box_rejected() {
        let rect = Rectangle::new(5.0, 5.0, 5.0, 10.0);
        assert!(matches!(
            SimilarityTransform::from_rect(&rect),
            Err(Error::DegenerateBox(_))
        ));
        assert!(normalize_shape(&Shape::zeros(2), &rect).is_err());
    }
}
