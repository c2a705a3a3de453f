// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Metric depth maps, as given by an external depth estimator.

use nalgebra::DMatrix;

use crate::core::box2d::Box2D;
use crate::math::stats;
use crate::misc::type_aliases::{DepthImage, Float, Mask};

/// Dense depth map in meters, indexed `(y, x)`.
#[derive(PartialEq, Debug, Clone)]
pub struct DepthMap {
    values: DepthImage,
}

impl DepthMap {
    pub fn new(values: DepthImage) -> Self {
        Self { values }
    }

    /// Depth map from raw 16 bits values and the scale mapping them to meters
    /// (`depth = raw / scale`).
    #[allow(clippy::cast_lossless)]
    pub fn from_raw_u16(width: usize, height: usize, raw: &[u16], scale: Float) -> Self {
        let values = DMatrix::from_row_slice(height, width, raw).map(|d| d as Float / scale);
        Self { values }
    }

    pub fn values(&self) -> &DepthImage {
        &self.values
    }

    pub fn width(&self) -> usize {
        self.values.ncols()
    }

    pub fn height(&self) -> usize {
        self.values.nrows()
    }

    /// Depth at a pixel, coordinates truncated and clamped to the image.
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_sign_loss)]
    pub fn at(&self, x: Float, y: Float) -> Float {
        let col = (x.max(0.0) as usize).min(self.width().saturating_sub(1));
        let row = (y.max(0.0) as usize).min(self.height().saturating_sub(1));
        self.values[(row, col)]
    }

    /// Depth at a pixel whose coordinates are first clamped
    /// at least `margin` pixels away from the image border.
    pub fn at_with_margin(&self, x: Float, y: Float, margin: Float) -> Float {
        let max_x = (self.width() as Float - 1.0 - margin).max(margin);
        let max_y = (self.height() as Float - 1.0 - margin).max(margin);
        self.at(x.max(margin).min(max_x), y.max(margin).min(max_y))
    }

    /// All depth values inside a box clipped to the image.
    /// Rows `y1..y2` and columns `x1..x2`, bounds truncated.
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_sign_loss)]
    pub fn values_in_box(&self, b: &Box2D) -> Vec<Float> {
        let clipped = b.clip(self.width() as Float, self.height() as Float);
        let (x1, y1) = (clipped.x1() as usize, clipped.y1() as usize);
        let (x2, y2) = (clipped.x2() as usize, clipped.y2() as usize);
        if x2 <= x1 || y2 <= y1 {
            return Vec::new();
        }
        self.values
            .view((y1, x1), (y2 - y1, x2 - x1))
            .iter()
            .cloned()
            .collect()
    }

    /// Depth values at positions set in the mask.
    /// The mask must have the same shape as the depth map.
    pub fn values_in_mask(&self, mask: &Mask) -> Vec<Float> {
        if mask.shape() != self.values.shape() {
            return Vec::new();
        }
        self.values
            .iter()
            .zip(mask.iter())
            .filter_map(|(&d, &m)| if m { Some(d) } else { None })
            .collect()
    }

    /// Median depth inside a box clipped to the image.
    pub fn median_in_box(&self, b: &Box2D) -> Option<Float> {
        stats::median(&self.values_in_box(b))
    }

    /// Bilinear resize with aligned corners.
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_sign_loss)]
    pub fn resized(&self, width: usize, height: usize) -> Self {
        if (width, height) == (self.width(), self.height()) || self.values.is_empty() {
            return self.clone();
        }
        let ratio = |dst: usize, src: usize| {
            if dst > 1 {
                (src as Float - 1.0) / (dst as Float - 1.0)
            } else {
                0.0
            }
        };
        let (rx, ry) = (ratio(width, self.width()), ratio(height, self.height()));
        let (max_col, max_row) = (self.width() - 1, self.height() - 1);
        let values = DMatrix::from_fn(height, width, |row, col| {
            let sx = col as Float * rx;
            let sy = row as Float * ry;
            let (c0, r0) = (sx.floor() as usize, sy.floor() as usize);
            let (c1, r1) = ((c0 + 1).min(max_col), (r0 + 1).min(max_row));
            let (fx, fy) = (sx - c0 as Float, sy - r0 as Float);
            let top = self.values[(r0, c0)] * (1.0 - fx) + self.values[(r0, c1)] * fx;
            let bottom = self.values[(r1, c0)] * (1.0 - fx) + self.values[(r1, c1)] * fx;
            top * (1.0 - fy) + bottom * fy
        });
        Self { values }
    }
}

// TESTS #############################################################
