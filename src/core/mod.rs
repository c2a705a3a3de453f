// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Core functionalities of Weak Cube Rust.

use thiserror::Error;

use crate::misc::type_aliases::Float;

pub mod box2d;
pub mod bube;
pub mod camera;
pub mod cube;
pub mod depth;
pub mod head;
pub mod losses;
pub mod plane;
pub mod priors;
pub mod proposals;
pub mod roi_heads;
pub mod scoring;

/// Invalid geometric primitives are rejected at construction.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum GeometryError {
    /// A box corner is after the opposite one (`x1 > x2` or `y1 > y2`).
    #[error("inverted box: ({0}, {1}) is after ({2}, {3})")]
    InvertedBox(Float, Float, Float, Float),
    /// A cuboid dimension is not strictly positive.
    #[error("cuboid dimensions must be strictly positive, got ({0}, {1}, {2})")]
    NonPositiveDimensions(Float, Float, Float),
    /// The rotation matrix is not orthonormal with a +1 determinant.
    #[error("matrix is not a rotation")]
    NotARotation,
    /// Some coordinate is NaN or infinite.
    #[error("non finite coordinate")]
    NonFinite,
}
