// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Pinhole camera intrinsics: projection, back-projection
//! and allocentric / egocentric rotation conversions.

use crate::math::so3;
use crate::misc::type_aliases::{Float, Mat3, Point2, Point3, Vec3};

/// Smallest camera-space depth accepted for a projection.
pub const MIN_DEPTH: Float = 1e-4;

/// Intrinsic parameters of a pinhole camera, without skew.
#[derive(PartialEq, Debug, Clone, Copy)]
pub struct Intrinsics {
    /// Principal point `(cx, cy)` in pixels.
    pub principal_point: (Float, Float),
    /// Focal lengths `(fx, fy)` in pixels.
    pub focal: (Float, Float),
}

impl Intrinsics {
    /// Create intrinsics from focal lengths and principal point.
    pub fn new(fx: Float, fy: Float, cx: Float, cy: Float) -> Self {
        Self {
            principal_point: (cx, cy),
            focal: (fx, fy),
        }
    }

    /// Read intrinsics from a 3x3 calibration matrix `K`.
    pub fn from_matrix(k: &Mat3) -> Self {
        Self::new(k[(0, 0)], k[(1, 1)], k[(0, 2)], k[(1, 2)])
    }

    /// Calibration matrix `K`.
    #[rustfmt::skip]
    pub fn matrix(&self) -> Mat3 {
        Mat3::new(
            self.focal.0, 0.0,          self.principal_point.0,
            0.0,          self.focal.1, self.principal_point.1,
            0.0,          0.0,          1.0,
        )
    }

    /// Intrinsics of the same camera for an image resized by `factor`.
    /// Every coefficient scales linearly except the bottom-right 1.
    pub fn scaled(&self, factor: Float) -> Self {
        let (fx, fy) = self.focal;
        let (cx, cy) = self.principal_point;
        Self::new(fx * factor, fy * factor, cx * factor, cy * factor)
    }

    /// Project a camera-space point to pixel coordinates.
    /// Returns `None` for points not strictly in front of the camera.
    pub fn project(&self, point: &Point3) -> Option<Point2> {
        if point.z > MIN_DEPTH {
            Some(self.project_unchecked(point, point.z))
        } else {
            None
        }
    }

    /// Project a camera-space point, clamping its depth to `MIN_DEPTH`.
    /// The second value is `false` if the clamp was needed.
    pub fn project_clamped(&self, point: &Point3) -> (Point2, bool) {
        let in_front = point.z > MIN_DEPTH;
        (self.project_unchecked(point, point.z.max(MIN_DEPTH)), in_front)
    }

    fn project_unchecked(&self, point: &Point3, depth: Float) -> Point2 {
        Point2::new(
            self.focal.0 * point.x / depth + self.principal_point.0,
            self.focal.1 * point.y / depth + self.principal_point.1,
        )
    }

    /// Back-project a pixel with a given depth (`z` coordinate) into camera space.
    pub fn back_project(&self, pixel: &Point2, depth: Float) -> Point3 {
        Point3::new(
            depth * (pixel.x - self.principal_point.0) / self.focal.0,
            depth * (pixel.y - self.principal_point.1) / self.focal.1,
            depth,
        )
    }

    /// Back-project a pixel with a distance measured along its viewing ray.
    ///
    /// The horizontal and vertical angles of the ray are computed from the
    /// pixel offsets with the horizontal focal length, then the distance is
    /// decomposed along those angles.
    pub fn back_project_along_ray(&self, pixel: &Point2, distance: Float) -> Point3 {
        let fx = self.focal.0;
        let du = pixel.x - self.principal_point.0;
        let dv = pixel.y - self.principal_point.1;
        let angle_x = du.atan2(fx);
        let dist_in_camera = (du * du + fx * fx).sqrt();
        let angle_d = dv.atan2(dist_in_camera);
        let y = distance * angle_d.sin();
        let dx = (distance * distance - y * y).max(0.0).sqrt();
        let x = dx * angle_x.sin();
        let z = (dx * dx - x * x).max(0.0).sqrt();
        Point3::new(x, y, z)
    }

    /// Rotation bringing the principal axis onto the viewing ray of a pixel.
    fn ray_rotation(&self, pixel: &Point2) -> Mat3 {
        let ray = Vec3::new(
            (pixel.x - self.principal_point.0) / self.focal.0,
            (pixel.y - self.principal_point.1) / self.focal.1,
            1.0,
        )
        .normalize();
        let angle = ray.z.max(-1.0).min(1.0).acos();
        match Vec3::new(-ray.y, ray.x, 0.0).try_normalize(1e-12) {
            Some(axis) if angle > 0.0 => so3::exp_matrix(axis * angle),
            _ => Mat3::identity(),
        }
    }

    /// Convert a rotation relative to the viewing ray of `pixel`
    /// into a rotation in the camera frame.
    pub fn egocentric_from_allocentric(&self, pixel: &Point2, allocentric: &Mat3) -> Mat3 {
        self.ray_rotation(pixel) * allocentric
    }

    /// Inverse of `egocentric_from_allocentric`.
    pub fn allocentric_from_egocentric(&self, pixel: &Point2, egocentric: &Mat3) -> Mat3 {
        self.ray_rotation(pixel).transpose() * egocentric
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use approx;
    use quickcheck_macros;

    fn camera() -> Intrinsics {
        Intrinsics::new(500.0, 500.0, 320.0, 240.0)
    }

    #[test]
    fn matrix_round_trip() {
        let k = camera().matrix();
        assert_eq!(camera(), Intrinsics::from_matrix(&k));
        assert_eq!(1.0, camera().scaled(0.5).matrix()[(2, 2)]);
        assert_eq!((250.0, 250.0), camera().scaled(0.5).focal);
    }

    #[test]
    fn behind_camera_is_flagged() {
        assert_eq!(None, camera().project(&Point3::new(0.0, 0.0, -1.0)));
        let (pixel, in_front) = camera().project_clamped(&Point3::new(1.0, 0.0, 0.0));
        assert!(!in_front);
        assert!(pixel.x.is_finite());
    }

    #[test]
    fn ray_back_projection_at_principal_point() {
        let p = camera().back_project_along_ray(&Point2::new(320.0, 240.0), 5.0);
        approx::assert_relative_eq!(p, Point3::new(0.0, 0.0, 5.0));
    }

    #[test]
    fn allocentric_at_principal_point_is_egocentric() {
        let r = so3::exp_matrix(Vec3::new(0.1, 0.7, -0.2));
        let ego = camera().egocentric_from_allocentric(&Point2::new(320.0, 240.0), &r);
        approx::assert_relative_eq!(ego, r);
    }

    #[quickcheck_macros::quickcheck]
    fn project_back_project(u: u16, v: u16, depth: u8) -> bool {
        let pixel = Point2::new((u % 640) as Float, (v % 480) as Float);
        let depth = 0.5 + depth as Float / 10.0;
        match camera().project(&camera().back_project(&pixel, depth)) {
            Some(p) => (p - pixel).norm() < 1e-2,
            None => false,
        }
    }

    #[quickcheck_macros::quickcheck]
    fn ray_back_projection_reprojects(u: u16, v: u16, distance: u8) -> bool {
        let pixel = Point2::new((u % 640) as Float, (v % 480) as Float);
        let distance = 0.5 + distance as Float / 10.0;
        let point = camera().back_project_along_ray(&pixel, distance);
        let dist_ok = ((point - Point3::origin()).norm() - distance).abs() < 1e-3 * distance;
        match camera().project(&point) {
            Some(p) => dist_ok && (p - pixel).norm() < 1e-2,
            None => false,
        }
    }

    #[quickcheck_macros::quickcheck]
    fn allocentric_inverse(u: u16, v: u16, a: i8, b: i8, c: i8) -> bool {
        let pixel = Point2::new((u % 640) as Float, (v % 480) as Float);
        let r = so3::exp_matrix(Vec3::new(a as Float, b as Float, c as Float) / 50.0);
        let allo = camera().allocentric_from_egocentric(&pixel, &r);
        let back = camera().egocentric_from_allocentric(&pixel, &allo);
        (back - r).abs().max() < 1e-4 && so3::is_rotation(&allo, 1e-4)
    }
}
