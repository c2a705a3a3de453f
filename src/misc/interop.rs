// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Interoperability conversions between the image and matrix types.

use image::{GrayImage, Luma};
use nalgebra::DMatrix;

use crate::core::bube::Bube;
use crate::misc::type_aliases::Mask;

/// Convert an `u8` matrix into a `GrayImage`.
/// Inverse operation of `matrix_from_image`.
///
/// Performs a transposition to accomodate for the
/// column major matrix into the row major image.
#[allow(clippy::cast_possible_truncation)]
pub fn image_from_matrix(mat: &DMatrix<u8>) -> GrayImage {
    let (nb_rows, nb_cols) = mat.shape();
    let mut img_buf = GrayImage::new(nb_cols as u32, nb_rows as u32);
    for (x, y, pixel) in img_buf.enumerate_pixels_mut() {
        *pixel = Luma([mat[(y as usize, x as usize)]]);
    }
    img_buf
}

/// Convert a `GrayImage` into an `u8` matrix.
/// Inverse operation of `image_from_matrix`.
pub fn matrix_from_image(img: GrayImage) -> DMatrix<u8> {
    let (width, height) = img.dimensions();
    DMatrix::from_row_slice(height as usize, width as usize, &img.into_raw())
}

/// Binary mask of the pixels strictly above a threshold.
pub fn mask_from_image(img: GrayImage, threshold: u8) -> Mask {
    matrix_from_image(img).map(|v| v > threshold)
}

/// Gray image of a mask, 255 inside and 0 outside.
pub fn image_from_mask(mask: &Mask) -> GrayImage {
    image_from_matrix(&mask.map(|m| if m { 255 } else { 0 }))
}

/// Render the silhouette of a bube in an image of the given size.
pub fn silhouette_image(bube: &Bube, width: usize, height: usize) -> GrayImage {
    image_from_mask(&bube.silhouette(width, height))
}

// TESTS #############################################################
