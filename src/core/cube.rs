// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Oriented cuboids in camera space.

use crate::core::box2d::Box2D;
use crate::core::bube::Bube;
use crate::core::camera::Intrinsics;
use crate::core::GeometryError;
use crate::math::so3;
use crate::misc::type_aliases::{Corners3, Float, Mat3, Point2, Point3, Vec3};

/// Tolerance used to validate rotation matrices.
pub const ROTATION_TOLERANCE: Float = 1e-3;

/// Signs of the local corner template, in units of half dimensions.
/// Front face (`-l/2`) first, then back face (`+l/2`), both with the winding
/// `(-,-) (+,-) (+,+) (-,+)` in the `(w, h)` plane.
#[rustfmt::skip]
const CORNER_SIGNS: [(Float, Float, Float); 8] = [
    (-1.0, -1.0, -1.0), (1.0, -1.0, -1.0), (1.0, 1.0, -1.0), (-1.0, 1.0, -1.0),
    (-1.0, -1.0,  1.0), (1.0, -1.0,  1.0), (1.0, 1.0,  1.0), (-1.0, 1.0,  1.0),
];

/// Oriented cuboid: center, dimensions `(w, h, l)` and rotation whose
/// columns are the local axes expressed in the camera frame.
#[derive(PartialEq, Debug, Clone, Copy)]
pub struct Cube3D {
    center: Point3,
    dimensions: Vec3,
    rotation: Mat3,
}

impl Cube3D {
    /// Create a cuboid, checking positive dimensions and a valid rotation.
    pub fn new(center: Point3, dimensions: Vec3, rotation: Mat3) -> Result<Self, GeometryError> {
        if !(center.coords.iter().all(|v| v.is_finite())
            && dimensions.iter().all(|v| v.is_finite()))
        {
            return Err(GeometryError::NonFinite);
        }
        if dimensions.iter().any(|&d| d <= 0.0) {
            return Err(GeometryError::NonPositiveDimensions(
                dimensions.x,
                dimensions.y,
                dimensions.z,
            ));
        }
        if !so3::is_rotation(&rotation, ROTATION_TOLERANCE) {
            return Err(GeometryError::NotARotation);
        }
        Ok(Self {
            center,
            dimensions,
            rotation,
        })
    }

    /// Build a cuboid from a ground-truth record:
    /// projected center in pixels, depth, dimensions and rotation.
    pub fn from_projected_center(
        intrinsics: &Intrinsics,
        projected_center: &Point2,
        depth: Float,
        dimensions: Vec3,
        rotation: Mat3,
    ) -> Result<Self, GeometryError> {
        Self::new(
            intrinsics.back_project(projected_center, depth),
            dimensions,
            rotation,
        )
    }

    pub fn center(&self) -> &Point3 {
        &self.center
    }

    pub fn dimensions(&self) -> &Vec3 {
        &self.dimensions
    }

    pub fn rotation(&self) -> &Mat3 {
        &self.rotation
    }

    /// Same cuboid moved along the camera `z` axis.
    pub fn shifted_depth(&self, dz: Float) -> Self {
        let mut shifted = *self;
        shifted.center.z += dz;
        shifted
    }

    /// The 8 corners in camera space, in the fixed template order.
    pub fn corners(&self) -> Corners3 {
        let half = 0.5 * self.dimensions;
        let mut corners = [Point3::origin(); 8];
        for (corner, &(sw, sh, sl)) in corners.iter_mut().zip(CORNER_SIGNS.iter()) {
            let local = Vec3::new(sw * half.x, sh * half.y, sl * half.z);
            *corner = self.center + self.rotation * local;
        }
        corners
    }

    /// Projection of the cuboid in the image.
    pub fn bube(&self, intrinsics: &Intrinsics) -> Bube {
        Bube::project(&self.corners(), intrinsics)
    }

    /// Enclosing 2D box of the projected corners.
    pub fn projected_box(&self, intrinsics: &Intrinsics) -> Option<Box2D> {
        self.bube(intrinsics).enclosing_box()
    }
}

// TESTS #############################################################
