// This file is part of facemark, a library implementing the cascaded
// regression-tree face alignment method described in the following paper:
//
//      One Millisecond Face Alignment with an Ensemble of Regression Trees,
//      Vahid Kazemi and Josephine Sullivan.
//      In CVPR 2014.
//
// facemark may be redistributed and/or modified under the terms of the
// BSD 2-Clause License.

use facemark::{
    denormalize_shape, load_model, Error, FullObjectDetection, ImageData, Point, Rectangle, Shape,
    TrainingOptions,
};

fn ramp_training_set() -> (Vec<ImageData>, Vec<Vec<FullObjectDetection>>) {
    let rising = ImageData::from_fn(60, 60, |x, _| (x * 4).min(255) as u8);
    let falling = ImageData::from_fn(60, 60, |x, _| 255u8.saturating_sub((x * 4) as u8));
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

    (
        vec![rising, falling],
        vec![
            vec![FullObjectDetection::new(rect, shape_left)],
            vec![FullObjectDetection::new(rect, shape_right)],
        ],
    )
}

fn ramp_options() -> TrainingOptions {
    TrainingOptions {
        cascade_depth: 4,
        tree_depth: 3,
        num_trees_per_cascade: 10,
        nu: 0.25,
        oversampling_amount: 5,
        feature_pool_size: 80,
        num_test_splits: 30,
        random_seed: 7,
        ..TrainingOptions::default()
    }
}

#[test]
fn minimal_configuration_produces_the_expected_structure() {
    // one image, one two-point detection, smallest possible cascade
    let image = ImageData::from_fn(48, 48, |x, y| ((x * 5 + y) % 256) as u8);
    let rect = Rectangle::new(8.0, 8.0, 40.0, 40.0);
    let truth = Shape::new(vec![Point::new(16.0, 24.0), Point::new(32.0, 24.0)]);
    let detections = vec![vec![FullObjectDetection::new(rect, truth.clone())]];

    let options = TrainingOptions {
        cascade_depth: 1,
        tree_depth: 2,
        num_trees_per_cascade: 1,
        oversampling_amount: 1,
        feature_pool_size: 40,
        random_seed: 3,
        ..TrainingOptions::default()
    };
    let model = facemark::train_shape_predictor(&[image.clone()], &detections, &options).unwrap();

    assert_eq!(model.num_stages(), 1);
    assert_eq!(model.stages()[0].trees().len(), 1);
    assert_eq!(model.stages()[0].trees()[0].num_leaves(), 4);
    assert_eq!(model.num_parts(), 2);

    // prediction must be at least as close to the ground truth as the
    // initial mean shape was
    let initial = denormalize_shape(model.initial_shape(), &rect).unwrap();
    let predicted = model.predict(&image, &rect).unwrap();
    let error = |shape: &Shape| -> f32 {
        shape
            .iter()
            .zip(truth.iter())
            .map(|(p, t)| p.distance(t))
            .sum()
    };
    assert!(error(&predicted) <= error(&initial) + 1e-4);
}

#[test]
fn training_error_drops_below_the_mean_shape_baseline() {
    let (images, detections) = ramp_training_set();
    let model = facemark::train_shape_predictor(&images, &detections, &ramp_options()).unwrap();

    let mut baseline = 0.0f32;
    let mut trained = 0.0f32;
    for (image, dets) in images.iter().zip(detections.iter()) {
        for det in dets {
            let initial = denormalize_shape(model.initial_shape(), det.rect()).unwrap();
            let predicted = model.predict(image, det.rect()).unwrap();
            for ((i, p), truth) in initial.iter().zip(predicted.iter()).zip(det.parts().iter()) {
                baseline += i.distance(truth);
                trained += p.distance(truth);
            }
        }
    }
    assert!(trained < baseline, "{} vs baseline {}", trained, baseline);
}

#[test]
fn serialized_model_round_trips_bit_exactly() {
    let (images, detections) = ramp_training_set();
    let model = facemark::train_shape_predictor(&images, &detections, &ramp_options()).unwrap();

    let path = std::env::temp_dir().join("facemark_roundtrip_test.bin");
    model.save(&path).unwrap();
    let restored = load_model(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(restored, model);

    // identical predictions on boxes the model was never trained with
    let probe_boxes = [
        Rectangle::new(10.0, 10.0, 50.0, 50.0),
        Rectangle::new(0.0, 0.0, 59.0, 59.0),
        Rectangle::new(14.5, 6.25, 41.5, 33.25),
    ];
    for rect in &probe_boxes {
        let a = model.predict(&images[0], rect).unwrap();
        let b = restored.predict(&images[0], rect).unwrap();
        for (pa, pb) in a.iter().zip(b.iter()) {
            assert_eq!(pa.x.to_bits(), pb.x.to_bits());
            assert_eq!(pa.y.to_bits(), pb.y.to_bits());
        }
    }
}

#[test]
fn training_is_deterministic_in_the_seed() {
    let (images, detections) = ramp_training_set();
    let options = ramp_options();

    let mut first = vec![];
    facemark::train_shape_predictor(&images, &detections, &options)
        .unwrap()
        .write_to(&mut first)
        .unwrap();
    let mut second = vec![];
    facemark::train_shape_predictor(&images, &detections, &options)
        .unwrap()
        .write_to(&mut second)
        .unwrap();

    assert_eq!(first, second);
}

#[test]
fn predictions_follow_a_translated_box() {
    let (images, detections) = ramp_training_set();
    let model = facemark::train_shape_predictor(&images, &detections, &ramp_options()).unwrap();

    let rect = *detections[0][0].rect();
    let original = model.predict(&images[0], &rect).unwrap();

    // same content shifted by a whole-pixel offset, box shifted with it
    let (dx, dy) = (7i32, 12i32);
    let shifted_image = ImageData::from_fn(80, 80, |x, y| {
        let sx = x as i32 - dx;
        let sy = y as i32 - dy;
        if sx < 0 || sy < 0 || sx >= 60 || sy >= 60 {
            0
        } else {
            (sx as u32 * 4).min(255) as u8
        }
    });
    let shifted_rect = Rectangle::new(
        rect.left() + dx as f32,
        rect.top() + dy as f32,
        rect.right() + dx as f32,
        rect.bottom() + dy as f32,
    );
    let shifted = model.predict(&shifted_image, &shifted_rect).unwrap();

    for (p, q) in original.iter().zip(shifted.iter()) {
        assert!((q.x - p.x - dx as f32).abs() < 1e-2);
        assert!((q.y - p.y - dy as f32).abs() < 1e-2);
    }
}

#[test]
fn mismatched_input_lists_fail_before_any_work() {
    let image = ImageData::from_fn(16, 16, |_, _| 0);
    let rect = Rectangle::new(0.0, 0.0, 16.0, 16.0);
    let det = FullObjectDetection::new(rect, Shape::zeros(2));

    let result = facemark::train_shape_predictor(
        &[image],
        &[vec![det.clone()], vec![det]],
        &TrainingOptions::default(),
    );
    assert!(matches!(result, Err(Error::LengthMismatch(_))));
}

#[test]
fn evaluation_without_scales_matches_unit_scales() {
    let (images, detections) = ramp_training_set();
    let model = facemark::train_shape_predictor(&images, &detections, &ramp_options()).unwrap();

    let unscaled = facemark::test_shape_predictor(&images, &detections, None, &model).unwrap();
    let empty = facemark::test_shape_predictor(&images, &detections, Some(&[]), &model).unwrap();
    let ones = facemark::test_shape_predictor(
        &images,
        &detections,
        Some(&[vec![1.0], vec![1.0]]),
        &model,
    )
    .unwrap();

    assert_eq!(unscaled, empty);
    assert_eq!(unscaled, ones);
    assert!(unscaled.is_finite());
}
