// This file is part of facemark, a library implementing the cascaded
// regression-tree face alignment method described in the following paper:
//
//      One Millisecond Face Alignment with an Ensemble of Regression Trees,
//      Vahid Kazemi and Josephine Sullivan.
//      In CVPR 2014.
//
// facemark may be redistributed and/or modified under the terms of the
// BSD 2-Clause License.

use std::env::Args;
use std::time::Instant;

use image::Rgb;
use imageproc::drawing::{draw_cross_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use facemark::{ImageData, Rectangle, TrainingOptions};

const OUTPUT_FILE: &str = "landmarks.png";

fn main() {
    env_logger::init();

    let options = match Options::parse(std::env::args()) {
        Ok(options) => options,
        Err(message) => {
            println!("Failed to parse program arguments: {}", message);
            std::process::exit(1)
        }
    };

    let result = match options {
        Options::Train { dataset, output } => train(&dataset, &output),
        Options::Test { dataset, model } => test(&dataset, &model),
        Options::Predict {
            model,
            image,
            rect,
            output,
        } => predict(&model, &image, rect, &output),
    };

    if let Err(error) = result {
        println!("Error: {}", error);
        std::process::exit(1)
    }
}

fn train(dataset: &str, output: &str) -> facemark::Result<()> {
    let options = TrainingOptions {
        be_verbose: true,
        ..TrainingOptions::default()
    };
    let now = Instant::now();
    let model = facemark::train_shape_predictor_from_dataset(dataset, output, &options)?;
    println!(
        "Trained a {}-part predictor with {} cascade stages in {} s, saved to {}",
        model.num_parts(),
        model.num_stages(),
        now.elapsed().as_secs(),
        output
    );
    Ok(())
}

fn test(dataset: &str, model: &str) -> facemark::Result<()> {
    let error = facemark::test_shape_predictor_from_dataset(dataset, model)?;
    println!("Mean average error: {}", error);
    Ok(())
}

fn predict(model_path: &str, image_path: &str, rect: Rectangle, output: &str) -> facemark::Result<()> {
    let model = facemark::load_model(model_path)?;
    let decoded = image::open(image_path)?;

    let luma = decoded.to_luma8();
    let (width, height) = luma.dimensions();
    let image = ImageData::from_luma(luma.into_raw(), width, height)?;

    let now = Instant::now();
    let landmarks = model.predict(&image, &rect)?;
    println!(
        "Located {} landmarks in {} ms",
        landmarks.num_parts(),
        now.elapsed().as_millis()
    );

    let mut canvas = decoded.to_rgb8();
    draw_hollow_rect_mut(
        &mut canvas,
        Rect::at(rect.left() as i32, rect.top() as i32)
            .of_size(rect.width() as u32, rect.height() as u32),
        Rgb([255, 0, 0]),
    );
    for point in landmarks.iter() {
        draw_cross_mut(&mut canvas, Rgb([0, 255, 0]), point.x as i32, point.y as i32);
    }
    canvas.save(output)?;
    println!("Saved result to {}", output);
    Ok(())
}

enum Options {
    Train {
        dataset: String,
        output: String,
    },
    Test {
        dataset: String,
        model: String,
    },
    Predict {
        model: String,
        image: String,
        rect: Rectangle,
        output: String,
    },
}

impl Options {
    fn parse(args: Args) -> Result<Self, String> {
        let args: Vec<String> = args.collect();
        let usage = || {
            format!(
                "Usage: {} train <dataset.json> <output-model>\n       \
                 {} test <dataset.json> <model>\n       \
                 {} predict <model> <image> <left> <top> <right> <bottom> [output.png]",
                args[0], args[0], args[0]
            )
        };

        match args.get(1).map(String::as_str) {
            Some("train") if args.len() == 4 => Ok(Options::Train {
                dataset: args[2].clone(),
                output: args[3].clone(),
            }),
            Some("test") if args.len() == 4 => Ok(Options::Test {
                dataset: args[2].clone(),
                model: args[3].clone(),
            }),
            Some("predict") if args.len() == 8 || args.len() == 9 => {
                let mut coords = [0.0f32; 4];
                for (slot, arg) in coords.iter_mut().zip(&args[4..8]) {
                    *slot = arg
                        .parse()
                        .map_err(|_| format!("invalid box coordinate: {}", arg))?;
                }
                Ok(Options::Predict {
                    model: args[2].clone(),
                    image: args[3].clone(),
                    rect: Rectangle::new(coords[0], coords[1], coords[2], coords[3]),
                    output: args
                        .get(8)
                        .cloned()
                        .unwrap_or_else(|| OUTPUT_FILE.to_string()),
                })
            }
            _ => Err(usage()),
        }
    }
}
