// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! RANSAC plane fitting and ground normal estimation from depth maps.

use log::{debug, warn};
use nalgebra::DMatrix;
use rand::{seq::index, Rng};

use crate::core::camera::Intrinsics;
use crate::core::depth::DepthMap;
use crate::misc::type_aliases::{Float, Mask, Point3, Vec3};

/// Configuration of the RANSAC plane fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneFitConfig {
    /// Maximum distance of an inlier to the plane.
    pub threshold: Float,
    /// Number of sampled point triples.
    pub max_iterations: usize,
    /// Number of candidate planes evaluated together in the batched fit.
    pub chunk_size: usize,
    /// Only every `stride`-th pixel (in both directions) of a depth map is used.
    pub stride: usize,
}

impl Default for PlaneFitConfig {
    fn default() -> Self {
        Self {
            threshold: 0.05,
            max_iterations: 1000,
            chunk_size: 64,
            stride: 5,
        }
    }
}

/// Plane `normal · p + offset = 0` with a unit normal,
/// and the indices of the points it was fitted on that are inliers.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub offset: Float,
    pub inliers: Vec<usize>,
}

impl Plane {
    /// Signed distance of a point to the plane.
    pub fn distance(&self, point: &Point3) -> Float {
        self.normal.dot(&point.coords) + self.offset
    }
}

/// Plane equation through 3 points, `None` if they are collinear.
fn plane_through(p0: &Point3, p1: &Point3, p2: &Point3) -> Option<(Vec3, Float)> {
    let normal = (p1 - p0).cross(&(p2 - p0)).try_normalize(1e-12)?;
    Some((normal, -normal.dot(&p1.coords)))
}

/// Sample a candidate plane from 3 distinct random points.
fn sample_candidate<R: Rng>(points: &[Point3], rng: &mut R) -> Option<(Vec3, Float)> {
    let ids = index::sample(rng, points.len(), 3);
    plane_through(&points[ids.index(0)], &points[ids.index(1)], &points[ids.index(2)])
}

fn inliers_of(points: &[Point3], normal: &Vec3, offset: Float, threshold: Float) -> Vec<usize> {
    points
        .iter()
        .enumerate()
        .filter(|(_, p)| (normal.dot(&p.coords) + offset).abs() <= threshold)
        .map(|(i, _)| i)
        .collect()
}

/// Sequential RANSAC: one candidate plane evaluated at a time,
/// keeping the first candidate with the most inliers.
pub fn fit<R: Rng>(points: &[Point3], config: &PlaneFitConfig, rng: &mut R) -> Option<Plane> {
    if points.len() < 3 {
        return None;
    }
    let mut best: Option<Plane> = None;
    for _ in 0..config.max_iterations {
        if let Some((normal, offset)) = sample_candidate(points, rng) {
            let inliers = inliers_of(points, &normal, offset, config.threshold);
            if best.as_ref().map_or(true, |b| inliers.len() > b.inliers.len()) {
                best = Some(Plane {
                    normal,
                    offset,
                    inliers,
                });
            }
        }
    }
    best
}

/// Batched RANSAC: all triples are sampled first, then candidate planes are
/// evaluated against all points with dense matrix products, a chunk of
/// candidates at a time. Same result distribution as `fit`.
pub fn fit_parallel<R: Rng>(
    points: &[Point3],
    config: &PlaneFitConfig,
    rng: &mut R,
) -> Option<Plane> {
    if points.len() < 3 {
        return None;
    }
    let candidates: Vec<(Vec3, Float)> = (0..config.max_iterations)
        .filter_map(|_| sample_candidate(points, rng))
        .collect();
    if candidates.is_empty() {
        return None;
    }

    // Homogeneous points, one per column.
    let homogeneous = DMatrix::from_fn(4, points.len(), |r, c| {
        if r < 3 {
            points[c][r]
        } else {
            1.0
        }
    });

    let chunk_size = config.chunk_size.max(1);
    let mut best_index = 0;
    let mut best_count = 0;
    for (chunk_id, chunk) in candidates.chunks(chunk_size).enumerate() {
        let equations = DMatrix::from_fn(chunk.len(), 4, |r, c| {
            let (normal, offset) = &chunk[r];
            if c < 3 {
                normal[c]
            } else {
                *offset
            }
        });
        let distances = equations * &homogeneous;
        for (r, row) in distances.row_iter().enumerate() {
            let count = row.iter().filter(|d| d.abs() <= config.threshold).count();
            if count > best_count {
                best_count = count;
                best_index = chunk_id * chunk_size + r;
            }
        }
    }

    let (normal, offset) = candidates[best_index];
    Some(Plane {
        normal,
        offset,
        inliers: inliers_of(points, &normal, offset, config.threshold),
    })
}

// GROUND NORMAL #####################################################

/// How trustworthy a ground normal estimate is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroundValidity {
    /// Fitted on ground points, floor-like orientation.
    Fitted,
    /// Fitted on ground points, but the plane looked like a wall and
    /// was rotated by 90° assuming walls orthogonal to the floor.
    Reoriented,
    /// No ground mask available, fitted on the whole image.
    NoGroundMask,
    /// No plane could be fitted; the normal defaults to `+y`.
    Failed,
}

impl GroundValidity {
    /// Weight of the losses depending on the ground normal.
    pub fn weight(self) -> Float {
        match self {
            GroundValidity::Fitted | GroundValidity::Reoriented => 1.0,
            GroundValidity::NoGroundMask | GroundValidity::Failed => 0.1,
        }
    }
}

/// Ground normal of one image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundEstimate {
    /// Unit normal pointing "up" (`normal · y >= 0`).
    pub normal: Vec3,
    pub validity: GroundValidity,
    /// Whether the wall to floor heuristic changed the fitted normal.
    pub reoriented: bool,
    /// Fraction of the used points that are inliers of the plane.
    pub inlier_ratio: Float,
}

impl GroundEstimate {
    /// Placeholder estimate for an image without usable depth.
    pub fn failed() -> Self {
        Self {
            normal: Vec3::y(),
            validity: GroundValidity::Failed,
            reoriented: false,
            inlier_ratio: 0.0,
        }
    }
}

/// Point cloud from every `stride`-th pixel of a depth map, restricted to the
/// ground mask if any. The camera used has focal lengths divided by the
/// stride (integer division) and its principal point at the subsampled image center.
#[allow(clippy::cast_precision_loss)]
pub fn ground_point_cloud(
    depth: &DepthMap,
    ground_mask: Option<&Mask>,
    intrinsics: &Intrinsics,
    stride: usize,
) -> Vec<Point3> {
    let stride = stride.max(1);
    let nb_rows = (depth.height() + stride - 1) / stride;
    let nb_cols = (depth.width() + stride - 1) / stride;
    let fx = (intrinsics.focal.0 / stride as Float).floor().max(1.0);
    let fy = (intrinsics.focal.1 / stride as Float).floor().max(1.0);
    let (cx, cy) = (nb_cols as Float / 2.0, nb_rows as Float / 2.0);
    let mut points = Vec::with_capacity(nb_rows * nb_cols);
    for r in 0..nb_rows {
        for c in 0..nb_cols {
            let (row, col) = (r * stride, c * stride);
            if ground_mask.map_or(false, |m| !m[(row, col)]) {
                continue;
            }
            let z = depth.values()[(row, col)];
            if z.is_finite() && z > 0.0 {
                let x = (c as Float - cx) * z / fx;
                let y = (r as Float - cy) * z / fy;
                points.push(Point3::new(x, y, z));
            }
        }
    }
    points
}

/// Map a normal that looks like a back or side wall onto a floor normal,
/// then orient it towards `+y`. Returns whether a wall was detected.
pub fn orient_ground_normal(normal: &Vec3) -> (Vec3, bool) {
    let mut n = *normal;
    let mut reoriented = false;
    if n.z.abs() > n.y.abs() {
        // Back wall: turn 90° around the x axis.
        n = Vec3::new(n.x, n.z, -n.y);
        reoriented = true;
    }
    if n.x.abs() > n.y.abs() {
        // Side wall: turn 90° around the y axis.
        n = Vec3::new(-n.z, n.x, n.y);
        reoriented = true;
    }
    if n.y < 0.0 {
        n = -n;
    }
    (n, reoriented)
}

/// Estimate the ground normal of an image from its depth map.
#[allow(clippy::cast_precision_loss)]
pub fn ground_normal<R: Rng>(
    depth: &DepthMap,
    ground_mask: Option<&Mask>,
    intrinsics: &Intrinsics,
    config: &PlaneFitConfig,
    rng: &mut R,
) -> GroundEstimate {
    let mask = match ground_mask {
        Some(m) if m.shape() != depth.values().shape() => {
            warn!(
                "ground mask shape {:?} differs from depth shape {:?}, ignoring it",
                m.shape(),
                depth.values().shape()
            );
            None
        }
        other => other,
    };
    let points = ground_point_cloud(depth, mask, intrinsics, config.stride);
    let plane = match fit_parallel(&points, config, rng) {
        Some(plane) => plane,
        None => {
            warn!("ground plane fit failed on {} points", points.len());
            return GroundEstimate::failed();
        }
    };
    let inlier_ratio = plane.inliers.len() as Float / points.len() as Float;
    let (normal, reoriented) = orient_ground_normal(&plane.normal);
    let validity = match (mask.is_some(), reoriented) {
        (false, _) => GroundValidity::NoGroundMask,
        (true, true) => GroundValidity::Reoriented,
        (true, false) => GroundValidity::Fitted,
    };
    if reoriented {
        warn!("ground plane looked like a wall, normal reoriented to {:?}", normal);
    }
    debug!(
        "ground normal {:?} ({:?}), inlier ratio {:.3}",
        normal, validity, inlier_ratio
    );
    GroundEstimate {
        normal,
        validity,
        reoriented,
        inlier_ratio,
    }
}

// TESTS #############################################################
