// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Image-plane projection of a cuboid ("bube"): its 8 projected corners,
//! their enclosing box and the rasterized silhouette.

use nalgebra::DMatrix;

use crate::core::box2d::Box2D;
use crate::core::camera::Intrinsics;
use crate::misc::type_aliases::{Corners2, Corners3, Float, Mask, Point2};

/// Projected corners of a cuboid.
///
/// Corners behind the camera are projected with a clamped depth
/// and flagged in `in_front`.
#[derive(PartialEq, Debug, Clone, Copy)]
pub struct Bube {
    corners: Corners2,
    in_front: [bool; 8],
}

impl Bube {
    /// Project camera-space corners through the intrinsics.
    pub(crate) fn project(corners: &Corners3, intrinsics: &Intrinsics) -> Self {
        let mut projected = [Point2::origin(); 8];
        let mut in_front = [true; 8];
        for (i, corner) in corners.iter().enumerate() {
            let (pixel, ok) = intrinsics.project_clamped(corner);
            projected[i] = pixel;
            in_front[i] = ok;
        }
        Self {
            corners: projected,
            in_front,
        }
    }

    pub fn corners(&self) -> &Corners2 {
        &self.corners
    }

    /// True if every corner is strictly in front of the camera.
    pub fn all_in_front(&self) -> bool {
        self.in_front.iter().all(|&ok| ok)
    }

    /// Axis-aligned box enclosing the 8 projected corners.
    pub fn enclosing_box(&self) -> Option<Box2D> {
        Box2D::enclosing(self.corners.iter())
    }

    /// Corners clamped to `[0, width - 1] x [0, height - 1]`.
    pub fn clamped_corners(&self, width: usize, height: usize) -> Corners2 {
        let max_x = width.saturating_sub(1) as Float;
        let max_y = height.saturating_sub(1) as Float;
        let mut clamped = self.corners;
        for p in clamped.iter_mut() {
            p.x = p.x.max(0.0).min(max_x);
            p.y = p.y.max(0.0).min(max_y);
        }
        clamped
    }

    /// Convex hull of the projected corners.
    pub fn convex_hull(&self) -> Vec<Point2> {
        convex_hull(&self.corners)
    }

    /// Binary silhouette of the bube in an image of the given size,
    /// indexed `(y, x)`. Corners are clamped to the image first.
    pub fn silhouette(&self, width: usize, height: usize) -> Mask {
        let hull = convex_hull(&self.clamped_corners(width, height));
        rasterize(&hull, width, height)
    }
}

/// Convex hull with the monotone chain algorithm.
/// Points are returned counter-clockwise (in a y-up frame), without repetition.
pub fn convex_hull(points: &[Point2]) -> Vec<Point2> {
    let mut sorted: Vec<Point2> = points
        .iter()
        .cloned()
        .filter(|p| p.x.is_finite() && p.y.is_finite())
        .collect();
    sorted.sort_by(|a, b| {
        (a.x, a.y)
            .partial_cmp(&(b.x, b.y))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    sorted.dedup();
    if sorted.len() < 3 {
        return sorted;
    }
    let mut lower: Vec<Point2> = Vec::with_capacity(sorted.len());
    for p in sorted.iter() {
        while lower.len() >= 2 && cross(&lower[lower.len() - 2], &lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(*p);
    }
    let mut upper: Vec<Point2> = Vec::with_capacity(sorted.len());
    for p in sorted.iter().rev() {
        while upper.len() >= 2 && cross(&upper[upper.len() - 2], &upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(*p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Z component of `(a - o) x (b - o)`.
fn cross(o: &Point2, a: &Point2, b: &Point2) -> Float {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Rasterize a convex polygon given counter-clockwise.
/// A pixel `(x, y)` is set if its integer coordinates lie inside or on the border.
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
pub fn rasterize(hull: &[Point2], width: usize, height: usize) -> Mask {
    let mut mask = DMatrix::from_element(height, width, false);
    if hull.len() < 3 || width == 0 || height == 0 {
        return mask;
    }
    let bounds = match Box2D::enclosing(hull.iter()) {
        Some(b) => b,
        None => return mask,
    };
    let x_start = bounds.x1().max(0.0).ceil() as usize;
    let y_start = bounds.y1().max(0.0).ceil() as usize;
    let x_end = (bounds.x2().floor().max(-1.0) + 1.0).min(width as Float) as usize;
    let y_end = (bounds.y2().floor().max(-1.0) + 1.0).min(height as Float) as usize;
    for y in y_start..y_end {
        for x in x_start..x_end {
            let p = Point2::new(x as Float, y as Float);
            let inside = (0..hull.len())
                .all(|i| cross(&hull[i], &hull[(i + 1) % hull.len()], &p) >= -1e-3);
            if inside {
                mask[(y, x)] = true;
            }
        }
    }
    mask
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use crate::core::cube::Cube3D;
    use crate::misc::type_aliases::{Mat3, Point3, Vec3};

    #[test]
    fn hull_of_square_with_inner_point() {
        let pts = [
            Point2::new(0.0, 0.0),
            Point2::new(2.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(2.0, 2.0),
            Point2::new(0.0, 2.0),
        ];
        let hull = convex_hull(&pts);
        assert_eq!(4, hull.len());
        assert!(!hull.contains(&Point2::new(1.0, 1.0)));
    }

    #[test]
    fn rasterized_square() {
        let hull = convex_hull(&[
            Point2::new(1.0, 1.0),
            Point2::new(3.0, 1.0),
            Point2::new(3.0, 3.0),
            Point2::new(1.0, 3.0),
        ]);
        let mask = rasterize(&hull, 5, 5);
        assert_eq!(9, mask.iter().filter(|&&m| m).count());
        assert!(mask[(2, 2)]);
        assert!(!mask[(0, 0)]);
    }

    #[test]
    fn silhouette_inside_projected_box() {
        let camera = Intrinsics::new(100.0, 100.0, 32.0, 24.0);
        let cube = Cube3D::new(Point3::new(0.0, 0.0, 4.0), Vec3::new(1.0, 1.0, 1.0), Mat3::identity())
            .unwrap();
        let bube = cube.bube(&camera);
        assert!(bube.all_in_front());
        let mask = bube.silhouette(64, 48);
        let b = bube.enclosing_box().unwrap();
        assert!(mask[(24, 32)]);
        for ((y, x), &m) in mask.iter().enumerate().map(|(i, m)| ((i % 48, i / 48), m)) {
            if m {
                assert!(b.contains(&Point2::new(x as Float, y as Float)));
            }
        }
    }

    #[test]
    fn behind_camera_corners_are_flagged() {
        let camera = Intrinsics::new(100.0, 100.0, 32.0, 24.0);
        let cube = Cube3D::new(Point3::new(0.0, 0.0, 0.2), Vec3::new(1.0, 1.0, 1.0), Mat3::identity())
            .unwrap();
        let bube = cube.bube(&camera);
        assert!(!bube.all_in_front());
        assert!(bube.corners().iter().all(|p| p.x.is_finite() && p.y.is_finite()));
        let clamped = bube.clamped_corners(64, 48);
        assert!(clamped.iter().all(|p| p.x >= 0.0 && p.x <= 63.0 && p.y <= 47.0));
    }
}
