// This file is part of facemark, a library implementing the cascaded
// regression-tree face alignment method described in the following paper:
//
//      One Millisecond Face Alignment with an Ensemble of Regression Trees,
//      Vahid Kazemi and Josephine Sullivan.
//      In CVPR 2014.
//
// facemark may be redistributed and/or modified under the terms of the
// BSD 2-Clause License.

use thiserror::Error;

use crate::common::Rectangle;

#[derive(Error, Debug)]
pub enum Error {
    /// A training option failed validation before any work was started.
    #[error("invalid training option: {0}")]
    InvalidOption(String),

    /// Two parallel input lists disagree in length at some nesting level.
    #[error("length mismatch: {0}")]
    LengthMismatch(String),

    /// A bounding box with zero width or height cannot anchor a similarity
    /// transform.
    #[error("degenerate bounding box: {0:?}")]
    DegenerateBox(Rectangle),

    /// The input image is neither 8-bit grayscale nor RGB-convertible.
    #[error("unsupported image format: {0}")]
    UnsupportedImage(String),

    /// A landmark index outside `[0, num_parts)` was queried.
    #[error("part index {index} out of range for detection with {num_parts} parts")]
    PartIndexOutOfRange { index: usize, num_parts: usize },

    #[error("no labeled instances were supplied")]
    EmptyTrainingSet,

    #[error("corrupt model file: {0}")]
    CorruptModel(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("dataset parse error: {0}")]
    Dataset(#[from] serde_json::Error),

    #[error("image decode error: {0}")]
    ImageDecode(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, Error>;
