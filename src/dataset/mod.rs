// This file is part of facemark, a library implementing the cascaded
// regression-tree face alignment method described in the following paper:
//
//      One Millisecond Face Alignment with an Ensemble of Regression Trees,
//      Vahid Kazemi and Josephine Sullivan.
//      In CVPR 2014.
//
// facemark may be redistributed and/or modified under the terms of the
// BSD 2-Clause License.

//! Loader for labeled landmark datasets.
//!
//! A dataset is a JSON manifest listing image files together with the
//! labeled boxes and part locations on each of them:
//!
//! ```json
//! {
//!   "images": [
//!     {
//!       "file": "faces/0001.png",
//!       "boxes": [
//!         {
//!           "left": 104.0, "top": 72.0, "right": 280.0, "bottom": 248.0,
//!           "parts": [[139.0, 146.0], [232.0, 144.0], [186.0, 205.0]]
//!         }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! Image paths are resolved relative to the manifest's directory. Images
//! are decoded at the loading boundary and reduced to 8-bit luma; the core
//! only ever sees [`ImageData`].

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::{FullObjectDetection, ImageData, Point, Rectangle, Shape};
use crate::error::Result;

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    images: Vec<ManifestImage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestImage {
    file: String,
    boxes: Vec<ManifestBox>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestBox {
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
    parts: Vec<[f32; 2]>,
}

/// Load a dataset manifest plus every image it references.
pub fn load_dataset<P: AsRef<Path>>(
    path: P,
) -> Result<(Vec<ImageData>, Vec<Vec<FullObjectDetection>>)> {
    let path = path.as_ref();
    let manifest: Manifest = serde_json::from_reader(BufReader::new(File::open(path)?))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut images = Vec::with_capacity(manifest.images.len());
    let mut detections = Vec::with_capacity(manifest.images.len());
    for entry in manifest.images {
        let decoded = image::open(base_dir.join(&entry.file))?.to_luma8();
        let (width, height) = decoded.dimensions();
        images.push(ImageData::from_luma(decoded.into_raw(), width, height)?);

        detections.push(
            entry
                .boxes
                .into_iter()
                .map(|b| {
                    FullObjectDetection::new(
                        Rectangle::new(b.left, b.top, b.right, b.bottom),
                        Shape::new(b.parts.iter().map(|p| Point::new(p[0], p[1])).collect()),
                    )
                })
                .collect(),
        );
    }
    Ok((images, detections))
}

/// Write a manifest for a labeled set, without copying the images.
///
/// The coordinates round-trip losslessly through [`load_dataset`].
pub fn save_manifest<P: AsRef<Path>>(
    path: P,
    image_files: &[String],
    detections: &[Vec<FullObjectDetection>],
) -> Result<()> {
    let manifest = Manifest {
        images: image_files
            .iter()
            .zip(detections.iter())
            .map(|(file, dets)| ManifestImage {
                file: file.clone(),
                boxes: dets
                    .iter()
                    .map(|det| ManifestBox {
                        left: det.rect().left(),
                        top: det.rect().top(),
                        right: det.rect().right(),
                        bottom: det.rect().bottom(),
                        parts: det.parts().iter().map(|p| [p.x, p.y]).collect(),
                    })
                    .collect(),
            })
            .collect(),
    };
    serde_json::to_writer_pretty(File::create(path)?, &manifest)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PixelSource;

    #[test]
    fn manifest_round_trips_through_json() {
        let dir = std::env::temp_dir().join("facemark_dataset_test");
        std::fs::create_dir_all(&dir).unwrap();

        let image_path = dir.join("ramp.png");
        let pixels: Vec<u8> = (0..16 * 8).map(|i| (i % 256) as u8).collect();
        image::save_buffer(&image_path, &pixels, 16, 8, image::ExtendedColorType::L8).unwrap();

        let det = FullObjectDetection::new(
            Rectangle::new(1.5, 2.0, 13.25, 7.0),
            Shape::new(vec![Point::new(3.125, 4.5), Point::new(9.0, 5.75)]),
        );
        let manifest_path = dir.join("set.json");
        save_manifest(
            &manifest_path,
            &["ramp.png".to_string()],
            &[vec![det.clone()]],
        )
        .unwrap();

        let (images, detections) = load_dataset(&manifest_path).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].width(), 16);
        assert_eq!(images[0].height(), 8);
        assert_eq!(images[0].intensity(1, 1), 17);
        assert_eq!(detections, vec![vec![det]]);

        std::fs::remove_file(manifest_path).ok();
        std::fs::remove_file(image_path).ok();
    }

    #[test]
    fn missing_image_file_is_an_error() {
        let dir = std::env::temp_dir().join("facemark_dataset_missing");
        std::fs::create_dir_all(&dir).unwrap();
        let manifest_path = dir.join("set.json");
        std::fs::write(
            &manifest_path,
            r#"{"images": [{"file": "nope.png", "boxes": []}]}"#,
        )
        .unwrap();
        assert!(load_dataset(&manifest_path).is_err());
        std::fs::remove_file(manifest_path).ok();
    }
}
