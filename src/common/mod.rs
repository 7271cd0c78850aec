// This file is part of facemark, a library implementing the cascaded
// regression-tree face alignment method described in the following paper:
//
//      One Millisecond Face Alignment with an Ensemble of Regression Trees,
//      Vahid Kazemi and Josephine Sullivan.
//      In CVPR 2014.
//
// facemark may be redistributed and/or modified under the terms of the
// BSD 2-Clause License.

use std::ops::{Add, AddAssign, Index, IndexMut, Mul, Sub};

use crate::error::{Error, Result};

/// A 2D coordinate with floating-point components.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    #[inline]
    pub const fn new(x: f32, y: f32) -> Self {
        Point { x, y }
    }

    #[inline]
    pub const fn zero() -> Self {
        Point { x: 0.0, y: 0.0 }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Point {
    fn add_assign(&mut self, rhs: Point) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Point {
    type Output = Point;

    fn mul(self, rhs: f32) -> Point {
        Point::new(self.x * rhs, self.y * rhs)
    }
}

/// An axis-aligned box in absolute image coordinates.
///
/// The invariants `right >= left` and `bottom >= top` are expected to hold;
/// boxes with zero width or height are rejected wherever a similarity
/// transform is derived from them.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rectangle {
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
}

impl Rectangle {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Rectangle {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_xywh(x: f32, y: f32, width: f32, height: f32) -> Self {
        Rectangle::new(x, y, x + width, y + height)
    }

    #[inline]
    pub fn left(&self) -> f32 {
        self.left
    }

    #[inline]
    pub fn top(&self) -> f32 {
        self.top
    }

    #[inline]
    pub fn right(&self) -> f32 {
        self.right
    }

    #[inline]
    pub fn bottom(&self) -> f32 {
        self.bottom
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
            || !self.width().is_finite()
            || !self.height().is_finite()
    }
}

/// An ordered set of landmark coordinates describing object pose.
///
/// Every shape handled by one model or trainer run has the same number of
/// points.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Shape {
    points: Vec<Point>,
}

impl Shape {
    pub fn new(points: Vec<Point>) -> Self {
        Shape { points }
    }

    pub fn zeros(num_parts: usize) -> Self {
        Shape {
            points: vec![Point::zero(); num_parts],
        }
    }

    #[inline]
    pub fn num_parts(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Component-wise sum with another shape of the same length.
    pub fn add(&mut self, delta: &Shape) {
        debug_assert_eq!(self.points.len(), delta.points.len());
        for (p, d) in self.points.iter_mut().zip(delta.points.iter()) {
            *p += *d;
        }
    }

    /// Component-wise difference `self - other`.
    pub fn sub(&self, other: &Shape) -> Shape {
        debug_assert_eq!(self.points.len(), other.points.len());
        Shape {
            points: self
                .points
                .iter()
                .zip(other.points.iter())
                .map(|(a, b)| *a - *b)
                .collect(),
        }
    }

    /// Component-wise scaling by a scalar.
    pub fn scale(&mut self, factor: f32) {
        for p in self.points.iter_mut() {
            *p = *p * factor;
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Point> {
        self.points.iter()
    }
}

impl Index<usize> for Shape {
    type Output = Point;

    fn index(&self, index: usize) -> &Point {
        &self.points[index]
    }
}

impl IndexMut<usize> for Shape {
    fn index_mut(&mut self, index: usize) -> &mut Point {
        &mut self.points[index]
    }
}

/// One labeled or predicted instance: a bounding box together with the
/// positions of the object's parts in absolute image coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct FullObjectDetection {
    rect: Rectangle,
    parts: Shape,
}

impl FullObjectDetection {
    pub fn new(rect: Rectangle, parts: Shape) -> Self {
        FullObjectDetection { rect, parts }
    }

    #[inline]
    pub fn rect(&self) -> &Rectangle {
        &self.rect
    }

    #[inline]
    pub fn num_parts(&self) -> usize {
        self.parts.num_parts()
    }

    /// A single part by index. Out-of-range indices are reported as an
    /// error, never clamped.
    pub fn part(&self, index: usize) -> Result<Point> {
        if index >= self.parts.num_parts() {
            return Err(Error::PartIndexOutOfRange {
                index,
                num_parts: self.parts.num_parts(),
            });
        }
        Ok(self.parts[index])
    }

    #[inline]
    pub fn parts(&self) -> &Shape {
        &self.parts
    }
}

/// Read-only pixel access for 8-bit grayscale images.
///
/// Lookups outside the image area return 0 rather than failing; the feature
/// extractor relies on this sentinel.
pub trait PixelSource {
    fn intensity(&self, x: i32, y: i32) -> u8;
    fn width(&self) -> u32;
    fn height(&self) -> u32;
}

/// An owned 8-bit grayscale image buffer.
#[derive(Clone, Debug)]
pub struct ImageData {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl ImageData {
    /// Wrap an existing luma buffer. The buffer length must be
    /// `width * height`.
    pub fn from_luma(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        if data.len() != (width as usize) * (height as usize) {
            return Err(Error::UnsupportedImage(format!(
                "luma buffer of {} bytes does not match {}x{} dimensions",
                data.len(),
                width,
                height
            )));
        }
        Ok(ImageData {
            data,
            width,
            height,
        })
    }

    /// Reduce an interleaved 8-bit RGB buffer to grayscale luminance.
    pub fn from_rgb(data: &[u8], width: u32, height: u32) -> Result<Self> {
        let num_pixels = (width as usize) * (height as usize);
        if data.len() != num_pixels * 3 {
            return Err(Error::UnsupportedImage(format!(
                "RGB buffer of {} bytes does not match {}x{} dimensions",
                data.len(),
                width,
                height
            )));
        }
        let luma = data
            .chunks_exact(3)
            .map(|px| {
                let r = u32::from(px[0]);
                let g = u32::from(px[1]);
                let b = u32::from(px[2]);
                // integer Rec.601 luma
                ((r * 299 + g * 587 + b * 114) / 1000) as u8
            })
            .collect();
        Ok(ImageData {
            data: luma,
            width,
            height,
        })
    }

    /// Dispatch on channel count, accepting grayscale and RGB input only.
    pub fn from_raw(data: &[u8], width: u32, height: u32, num_channels: u32) -> Result<Self> {
        match num_channels {
            1 => ImageData::from_luma(data.to_vec(), width, height),
            3 => ImageData::from_rgb(data, width, height),
            n => Err(Error::UnsupportedImage(format!(
                "images with {} channels are not supported, must be 8bit gray or RGB",
                n
            ))),
        }
    }

    pub fn from_fn<F>(width: u32, height: u32, f: F) -> Self
    where
        F: Fn(u32, u32) -> u8,
    {
        let mut data = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        ImageData {
            data,
            width,
            height,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl PixelSource for ImageData {
    fn intensity(&self, x: i32, y: i32) -> u8 {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return 0;
        }
        self.data[(y as u32 * self.width + x as u32) as usize]
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }
}
