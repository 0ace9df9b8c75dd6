pub mod natural;

use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_filled_rect_mut, rect::Rect};
use tracing::warn;

use crate::model::constants::CHANNELS;

pub use natural::{natural_cmp, sort_natural};

/// Width of the strip drawn between the two panels of a comparison.
pub const DIVIDER_WIDTH: u32 = 4;

fn to_u8(val: f32) -> u8 {
    (val.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Builds an RGB image from interleaved (HWC) values in [0, 1].
pub fn float_vec_to_image(data: &[f32], height: usize, width: usize) -> Option<RgbImage> {
    let expected_len = width * height * CHANNELS;
    if data.len() != expected_len {
        warn!(
            "mismatched data length, expected {}, got {}",
            expected_len,
            data.len()
        );
        return None;
    }

    let raw_pixels: Vec<u8> = data.iter().map(|&val| to_u8(val)).collect();
    RgbImage::from_raw(width as u32, height as u32, raw_pixels)
}

/// Builds an RGB image from planar (CHW) values in [0, 1], as produced by a tensor.
pub fn chw_vec_to_image(data: &[f32], height: usize, width: usize) -> Option<RgbImage> {
    let plane = height * width;
    if data.len() != plane * CHANNELS {
        warn!(
            "mismatched data length, expected {}, got {}",
            plane * CHANNELS,
            data.len()
        );
        return None;
    }

    let mut raw_pixels = Vec::with_capacity(data.len());
    for idx in 0..plane {
        raw_pixels.push(to_u8(data[idx]));
        raw_pixels.push(to_u8(data[plane + idx]));
        raw_pixels.push(to_u8(data[2 * plane + idx]));
    }
    RgbImage::from_raw(width as u32, height as u32, raw_pixels)
}

/// Places `left` and `right` next to each other with a white divider between them.
pub fn side_by_side(left: &RgbImage, right: &RgbImage) -> RgbImage {
    let width = left.width() + DIVIDER_WIDTH + right.width();
    let height = left.height().max(right.height());
    let mut canvas = RgbImage::new(width, height);

    image::imageops::overlay(&mut canvas, left, 0, 0);
    image::imageops::overlay(
        &mut canvas,
        right,
        (left.width() + DIVIDER_WIDTH) as i64,
        0,
    );
    draw_filled_rect_mut(
        &mut canvas,
        Rect::at(left.width() as i32, 0).of_size(DIVIDER_WIDTH, height),
        Rgb([255, 255, 255]),
    );
    canvas
}
