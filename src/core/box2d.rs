// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Axis-aligned 2D boxes in pixel space.
//!
//! A box is stored by its corners and both the corner and the center-size
//! representations are always available through accessors.

use crate::core::GeometryError;
use crate::misc::type_aliases::{Float, Point2};

/// Axis-aligned rectangle with `x1 <= x2` and `y1 <= y2`.
#[derive(PartialEq, Debug, Clone, Copy)]
pub struct Box2D {
    x1: Float,
    y1: Float,
    x2: Float,
    y2: Float,
}

impl Box2D {
    /// Create a box from its top-left and bottom-right corners.
    pub fn new(x1: Float, y1: Float, x2: Float, y2: Float) -> Result<Self, GeometryError> {
        if !(x1.is_finite() && y1.is_finite() && x2.is_finite() && y2.is_finite()) {
            Err(GeometryError::NonFinite)
        } else if x1 > x2 || y1 > y2 {
            Err(GeometryError::InvertedBox(x1, y1, x2, y2))
        } else {
            Ok(Self { x1, y1, x2, y2 })
        }
    }

    /// Create a box from its center and size.
    pub fn from_center_size(
        center: Point2,
        width: Float,
        height: Float,
    ) -> Result<Self, GeometryError> {
        let (hw, hh) = (0.5 * width, 0.5 * height);
        Self::new(center.x - hw, center.y - hh, center.x + hw, center.y + hh)
    }

    /// Smallest box enclosing all points. `None` if there is no finite point.
    pub fn enclosing<'a, I: IntoIterator<Item = &'a Point2>>(points: I) -> Option<Self> {
        let init = (
            Float::INFINITY,
            Float::INFINITY,
            Float::NEG_INFINITY,
            Float::NEG_INFINITY,
        );
        let (x1, y1, x2, y2) = points
            .into_iter()
            .filter(|p| p.x.is_finite() && p.y.is_finite())
            .fold(init, |(x1, y1, x2, y2), p| {
                (x1.min(p.x), y1.min(p.y), x2.max(p.x), y2.max(p.y))
            });
        Self::new(x1, y1, x2, y2).ok()
    }

    /// Corners as `[x1, y1, x2, y2]`.
    pub fn xyxy(&self) -> [Float; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    pub fn x1(&self) -> Float {
        self.x1
    }

    pub fn y1(&self) -> Float {
        self.y1
    }

    pub fn x2(&self) -> Float {
        self.x2
    }

    pub fn y2(&self) -> Float {
        self.y2
    }

    pub fn width(&self) -> Float {
        self.x2 - self.x1
    }

    pub fn height(&self) -> Float {
        self.y2 - self.y1
    }

    pub fn center(&self) -> Point2 {
        Point2::new(0.5 * (self.x1 + self.x2), 0.5 * (self.y1 + self.y2))
    }

    pub fn area(&self) -> Float {
        self.width() * self.height()
    }

    /// Length of the diagonal, used as the apparent scale of an object.
    pub fn diagonal(&self) -> Float {
        self.width().hypot(self.height())
    }

    /// The 4 corners: upper-left, upper-right, bottom-right, bottom-left.
    pub fn corners(&self) -> [Point2; 4] {
        [
            Point2::new(self.x1, self.y1),
            Point2::new(self.x2, self.y1),
            Point2::new(self.x2, self.y2),
            Point2::new(self.x1, self.y2),
        ]
    }

    /// Check if a point is inside the box (borders included).
    pub fn contains(&self, point: &Point2) -> bool {
        self.x1 <= point.x && point.x <= self.x2 && self.y1 <= point.y && point.y <= self.y2
    }

    /// Clamp the box to an image of the given size.
    /// A box fully outside the image ends up with a null area.
    pub fn clip(&self, width: Float, height: Float) -> Self {
        let cx = |x: Float| x.max(0.0).min(width);
        let cy = |y: Float| y.max(0.0).min(height);
        Self {
            x1: cx(self.x1),
            y1: cy(self.y1),
            x2: cx(self.x2),
            y2: cy(self.y2),
        }
    }

    /// Box with the same center and a size multiplied by `factor`
    /// (zoom in if `factor < 1`, out if `factor > 1`).
    pub fn scaled(&self, factor: Float) -> Self {
        let c = self.center();
        let (hw, hh) = (
            0.5 * self.width() * factor.abs(),
            0.5 * self.height() * factor.abs(),
        );
        Self {
            x1: c.x - hw,
            y1: c.y - hh,
            x2: c.x + hw,
            y2: c.y + hh,
        }
    }

    /// Remove `1 / divisor` of the width and height on every side.
    pub fn shrunk(&self, divisor: Float) -> Self {
        let (dx, dy) = (self.width() / divisor, self.height() / divisor);
        if 2.0 * dx > self.width() || 2.0 * dy > self.height() {
            let c = self.center();
            return Self {
                x1: c.x,
                y1: c.y,
                x2: c.x,
                y2: c.y,
            };
        }
        Self {
            x1: self.x1 + dx,
            y1: self.y1 + dy,
            x2: self.x2 - dx,
            y2: self.y2 - dy,
        }
    }

    /// Area of the intersection of two boxes.
    pub fn intersection_area(&self, other: &Self) -> Float {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        w * h
    }

    /// Intersection over union. 0 if both boxes are empty.
    pub fn iou(&self, other: &Self) -> Float {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }

    /// Intersection over the area of `other`. 0 if `other` is empty.
    pub fn ioa(&self, other: &Self) -> Float {
        let area = other.area();
        if area > 0.0 {
            self.intersection_area(other) / area
        } else {
            0.0
        }
    }

    /// Generalized IoU, in `[-1, 1]`.
    pub fn giou(&self, other: &Self) -> Float {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        let hull = Self {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        };
        let hull_area = hull.area();
        let iou = if union > 0.0 { inter / union } else { 0.0 };
        if hull_area > 0.0 {
            iou - (hull_area - union) / hull_area
        } else {
            iou
        }
    }

    /// Generalized IoU loss, `1 - giou`, in `[0, 2]`.
    pub fn giou_loss(&self, other: &Self) -> Float {
        1.0 - self.giou(other)
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use approx;
    use quickcheck_macros;

    fn bx(x1: Float, y1: Float, x2: Float, y2: Float) -> Box2D {
        Box2D::new(x1, y1, x2, y2).unwrap()
    }

    #[test]
    fn inverted_box_is_rejected() {
        assert_eq!(
            Err(GeometryError::InvertedBox(2.0, 0.0, 1.0, 1.0)),
            Box2D::new(2.0, 0.0, 1.0, 1.0)
        );
        assert_eq!(
            Err(GeometryError::NonFinite),
            Box2D::new(Float::NAN, 0.0, 1.0, 1.0)
        );
    }

    #[test]
    fn both_representations() {
        let b = Box2D::from_center_size(Point2::new(10.0, 20.0), 4.0, 6.0).unwrap();
        assert_eq!([8.0, 17.0, 12.0, 23.0], b.xyxy());
        assert_eq!(Point2::new(10.0, 20.0), b.center());
        assert_eq!(24.0, b.area());
    }

    #[test]
    fn shrink_by_quarter() {
        let b = bx(100.0, 100.0, 300.0, 300.0).shrunk(4.0);
        assert_eq!([150.0, 150.0, 250.0, 250.0], b.xyxy());
    }

    #[test]
    fn clip_outside_is_empty() {
        let b = bx(700.0, 10.0, 800.0, 50.0).clip(640.0, 480.0);
        assert_eq!(0.0, b.area());
    }

    #[test]
    fn overlaps() {
        let a = bx(0.0, 0.0, 2.0, 2.0);
        let b = bx(1.0, 0.0, 3.0, 2.0);
        approx::assert_relative_eq!(1.0 / 3.0, a.iou(&b));
        approx::assert_relative_eq!(0.5, a.ioa(&b));
        approx::assert_relative_eq!(1.0 / 3.0, a.giou(&b));
        let far = bx(10.0, 0.0, 12.0, 2.0);
        assert!(a.giou(&far) < 0.0);
        approx::assert_relative_eq!(1.0, a.giou(&a));
    }

    #[test]
    fn enclosing_points() {
        let pts = [Point2::new(1.0, 5.0), Point2::new(-2.0, 3.0), Point2::new(4.0, 0.0)];
        assert_eq!(
            [-2.0, 0.0, 4.0, 5.0],
            Box2D::enclosing(pts.iter()).unwrap().xyxy()
        );
        assert_eq!(None, Box2D::enclosing(std::iter::empty()));
    }

    #[quickcheck_macros::quickcheck]
    fn iou_in_unit_range(a: (u8, u8, u8, u8), b: (u8, u8, u8, u8)) -> bool {
        let mk = |(x, y, w, h): (u8, u8, u8, u8)| {
            bx(x as Float, y as Float, (x as Float) + w as Float, y as Float + h as Float)
        };
        let (a, b) = (mk(a), mk(b));
        let iou = a.iou(&b);
        let giou = a.giou(&b);
        (0.0..=1.0).contains(&iou) && (-1.0..=1.0).contains(&giou) && giou <= iou + 1e-6
    }
}
