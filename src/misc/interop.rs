// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Interoperability conversions between the image, matrix and tensor types.

use image::{imageops::FilterType, GrayImage, Luma, RgbImage};
use nalgebra::DMatrix;
use std::path::Path;

use crate::core::tensor::Tensor;
use crate::error::{Error, Result};
use crate::misc::type_aliases::Float;

/// Open any image file and convert it to RGB.
pub fn read_rgb<P: AsRef<Path>>(path: P) -> Result<RgbImage> {
    Ok(image::open(path)?.to_rgb8())
}

/// Resize an image if it does not already have the requested size.
pub fn resize_rgb(img: RgbImage, width: u32, height: u32) -> RgbImage {
    if img.dimensions() == (width, height) {
        img
    } else {
        image::imageops::resize(&img, width, height, FilterType::Triangle)
    }
}

/// Convert an `RgbImage` into a `[1, rows, cols, 3]` tensor with values in `[0, 1]`.
pub fn tensor_from_rgb(img: &RgbImage) -> Tensor {
    let (width, height) = img.dimensions();
    Tensor::from_fn([1, height as usize, width as usize, 3], |_, y, x, c| {
        Float::from(img.get_pixel(x as u32, y as u32)[c]) / 255.0
    })
}

/// Place a left and a right image side by side in a `[1, rows, 2 * cols, 3]` tensor.
pub fn stereo_from_pair(left: &RgbImage, right: &RgbImage) -> Result<Tensor> {
    let (width, height) = left.dimensions();
    if right.dimensions() != (width, height) {
        let (rw, rh) = right.dimensions();
        return Err(Error::shape(
            "stereo_from_pair",
            [1, height as usize, width as usize, 3],
            [1, rh as usize, rw as usize, 3],
        ));
    }
    let left = tensor_from_rgb(left);
    let right = tensor_from_rgb(right);
    let cols = width as usize;
    Ok(Tensor::from_fn([1, height as usize, 2 * cols, 3], |_, y, x, c| {
        if x < cols {
            left.get(0, y, x, c)
        } else {
            right.get(0, y, x - cols, c)
        }
    }))
}

/// Convert a `Float` matrix into a `GrayImage`, mapping its range to `[0, 255]`.
///
/// A constant matrix gives a black image.
#[allow(clippy::cast_possible_truncation)]
pub fn image_from_matrix(mat: &DMatrix<Float>) -> GrayImage {
    let (nb_rows, nb_cols) = mat.shape();
    let (min, max) = if mat.is_empty() { (0.0, 0.0) } else { (mat.min(), mat.max()) };
    let range = max - min;
    let mut img_buf = GrayImage::new(nb_cols as u32, nb_rows as u32);
    for (x, y, pixel) in img_buf.enumerate_pixels_mut() {
        let v = mat[(y as usize, x as usize)];
        let normalized = if range > 0.0 { (v - min) / range } else { 0.0 };
        *pixel = Luma([(normalized * 255.0).round() as u8]);
    }
    img_buf
}

/// One channel of one image of a NHWC tensor, as a normalized gray image.
pub fn image_from_channel(tensor: &Tensor, batch: usize, channel: usize) -> Result<GrayImage> {
    let shape = tensor.shape();
    if batch >= shape[0] || channel >= shape[3] {
        return Err(Error::shape(
            "image_from_channel",
            [batch + 1, shape[1], shape[2], channel + 1],
            shape,
        ));
    }
    Ok(image_from_matrix(&tensor.channel(batch, channel)))
}

// TESTS #############################################################
