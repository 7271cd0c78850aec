// This file is part of facemark, a library implementing the cascaded
// regression-tree face alignment method described in the following paper:
//
//      One Millisecond Face Alignment with an Ensemble of Regression Trees,
//      Vahid Kazemi and Josephine Sullivan.
//      In CVPR 2014.
//
// facemark may be redistributed and/or modified under the terms of the
// BSD 2-Clause License.

use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::cascade::CascadeStage;
use crate::common::{PixelSource, Point, Rectangle, Shape};
use crate::error::{Error, Result};
use crate::feat::FeatureLocation;
use crate::math::SimilarityTransform;
use crate::tree::{RegressionTree, SplitFeature};

const MODEL_MAGIC: [u8; 4] = *b"FMRK";
const MODEL_VERSION: u32 = 1;

/// A trained shape predictor: the box-normalized initial mean shape plus an
/// ordered sequence of cascade stages.
///
/// Models are immutable once trained. Prediction is a pure function of
/// (model, image, box), so a model may be shared read-only across threads.
#[derive(Clone, Debug, PartialEq)]
pub struct ShapePredictor {
    initial_shape: Shape,
    stages: Vec<CascadeStage>,
}

impl ShapePredictor {
    pub fn new(initial_shape: Shape, stages: Vec<CascadeStage>) -> Self {
        ShapePredictor {
            initial_shape,
            stages,
        }
    }

    #[inline]
    pub fn num_parts(&self) -> usize {
        self.initial_shape.num_parts()
    }

    #[inline]
    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    #[inline]
    pub fn initial_shape(&self) -> &Shape {
        &self.initial_shape
    }

    #[inline]
    pub fn stages(&self) -> &[CascadeStage] {
        &self.stages
    }

    /// Locate the landmark set inside `rect`.
    ///
    /// Starts from the mean shape denormalized into the box and lets every
    /// cascade stage refine the running estimate; the per-stage feature
    /// lookups are anchored to the estimate as refined so far. Returns the
    /// final shape in absolute image coordinates.
    pub fn predict<S: PixelSource>(&self, image: &S, rect: &Rectangle) -> Result<Shape> {
        let tform = SimilarityTransform::from_rect(rect)?;
        let mut current = self.initial_shape.clone();
        for stage in &self.stages {
            stage.apply(&mut current, &tform, image);
        }
        Ok(Shape::new(
            current.iter().map(|p| tform.apply(*p)).collect(),
        ))
    }

    /// Serialize into the versioned little-endian binary layout.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        ModelWriter::new(writer).write(self)
    }

    /// Deserialize a model previously produced by [`ShapePredictor::write_to`].
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = vec![];
        reader.read_to_end(&mut buf)?;
        ModelReader::new(buf).read()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }
}

/// Load a shape predictor from a file written by [`ShapePredictor::save`].
pub fn load_model<P: AsRef<Path>>(path: P) -> Result<ShapePredictor> {
    let mut buf = vec![];
    File::open(path)?.read_to_end(&mut buf)?;
    ModelReader::new(buf).read()
}

struct ModelWriter<'a, W: Write> {
    writer: &'a mut W,
}

impl<'a, W: Write> ModelWriter<'a, W> {
    fn new(writer: &'a mut W) -> Self {
        ModelWriter { writer }
    }

    fn write(mut self, model: &ShapePredictor) -> Result<()> {
        self.writer.write_all(&MODEL_MAGIC)?;
        self.write_u32(MODEL_VERSION)?;

        self.write_u32(model.num_parts() as u32)?;
        self.write_shape(&model.initial_shape)?;

        self.write_u32(model.stages.len() as u32)?;
        for stage in &model.stages {
            self.write_stage(stage)?;
        }
        Ok(())
    }

    fn write_stage(&mut self, stage: &CascadeStage) -> Result<()> {
        self.write_u32(stage.feature_pool().len() as u32)?;
        for loc in stage.feature_pool() {
            self.write_u32(loc.anchor)?;
            self.write_f32(loc.dx)?;
            self.write_f32(loc.dy)?;
        }

        self.write_u32(stage.trees().len() as u32)?;
        for tree in stage.trees() {
            self.write_tree(tree)?;
        }
        Ok(())
    }

    fn write_tree(&mut self, tree: &RegressionTree) -> Result<()> {
        // splits in level order, leaves left to right
        self.write_u32(tree.splits().len() as u32)?;
        for split in tree.splits() {
            self.write_u32(split.idx1)?;
            self.write_u32(split.idx2)?;
            self.write_f32(split.threshold)?;
        }
        self.write_u32(tree.num_leaves() as u32)?;
        for leaf in tree.leaves() {
            self.write_shape(leaf)?;
        }
        Ok(())
    }

    fn write_shape(&mut self, shape: &Shape) -> Result<()> {
        for p in shape.iter() {
            self.write_f32(p.x)?;
            self.write_f32(p.y)?;
        }
        Ok(())
    }

    fn write_u32(&mut self, value: u32) -> Result<()> {
        self.writer.write_u32::<LittleEndian>(value)?;
        Ok(())
    }

    fn write_f32(&mut self, value: f32) -> Result<()> {
        self.writer.write_f32::<LittleEndian>(value)?;
        Ok(())
    }
}

struct ModelReader {
    reader: Cursor<Vec<u8>>,
}

impl ModelReader {
    fn new(buf: Vec<u8>) -> Self {
        ModelReader {
            reader: Cursor::new(buf),
        }
    }

    fn read(mut self) -> Result<ShapePredictor> {
        let mut magic = [0u8; 4];
        self.reader.read_exact(&mut magic)?;
        if magic != MODEL_MAGIC {
            return Err(Error::CorruptModel("bad magic tag".to_string()));
        }
        let version = self.read_u32()?;
        if version != MODEL_VERSION {
            return Err(Error::CorruptModel(format!(
                "unsupported model version: {}",
                version
            )));
        }

        let num_parts = self.read_u32()? as usize;
        if num_parts == 0 {
            return Err(Error::CorruptModel("model has zero parts".to_string()));
        }
        let initial_shape = self.read_shape(num_parts)?;

        let num_stages = self.read_u32()? as usize;
        let mut stages = Vec::with_capacity(num_stages);
        for _ in 0..num_stages {
            stages.push(self.read_stage(num_parts)?);
        }

        Ok(ShapePredictor::new(initial_shape, stages))
    }

    fn read_stage(&mut self, num_parts: usize) -> Result<CascadeStage> {
        let pool_size = self.read_u32()? as usize;
        let mut pool = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let anchor = self.read_u32()?;
            if anchor as usize >= num_parts {
                return Err(Error::CorruptModel(format!(
                    "feature anchor {} out of range for {} parts",
                    anchor, num_parts
                )));
            }
            let dx = self.read_f32()?;
            let dy = self.read_f32()?;
            pool.push(FeatureLocation { anchor, dx, dy });
        }

        let num_trees = self.read_u32()? as usize;
        let mut trees = Vec::with_capacity(num_trees);
        for _ in 0..num_trees {
            trees.push(self.read_tree(num_parts, pool_size)?);
        }

        Ok(CascadeStage::new(pool, trees))
    }

    fn read_tree(&mut self, num_parts: usize, pool_size: usize) -> Result<RegressionTree> {
        let num_splits = self.read_u32()? as usize;
        let mut splits = Vec::with_capacity(num_splits);
        for _ in 0..num_splits {
            let idx1 = self.read_u32()?;
            let idx2 = self.read_u32()?;
            if idx1 as usize >= pool_size || idx2 as usize >= pool_size {
                return Err(Error::CorruptModel(format!(
                    "split indices ({}, {}) out of range for pool of {}",
                    idx1, idx2, pool_size
                )));
            }
            let threshold = self.read_f32()?;
            splits.push(SplitFeature {
                idx1,
                idx2,
                threshold,
            });
        }

        let num_leaves = self.read_u32()? as usize;
        if num_leaves != num_splits + 1 {
            return Err(Error::CorruptModel(format!(
                "tree with {} splits cannot have {} leaves",
                num_splits, num_leaves
            )));
        }
        let mut leaves = Vec::with_capacity(num_leaves);
        for _ in 0..num_leaves {
            leaves.push(self.read_shape(num_parts)?);
        }

        Ok(RegressionTree::new(splits, leaves))
    }

    fn read_shape(&mut self, num_parts: usize) -> Result<Shape> {
        let mut points = Vec::with_capacity(num_parts);
        for _ in 0..num_parts {
            let x = self.read_f32()?;
            let y = self.read_f32()?;
            points.push(Point::new(x, y));
        }
        Ok(Shape::new(points))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(self.reader.read_u32::<LittleEndian>()?)
    }

    fn read_f32(&mut self) -> Result<f32> {
        Ok(self.reader.read_f32::<LittleEndian>()?)
    }
}
