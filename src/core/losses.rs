// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Weakly supervised loss terms, their weighting and their NaN-safe reduction.
//!
//! Each term is computed per instance. A term that cannot be computed for
//! a whole batch is `None` (absent), a term that cannot be computed for
//! one instance is non finite and is excluded by [`safely_reduce`].

use log::{debug, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::core::box2d::Box2D;
use crate::core::camera::Intrinsics;
use crate::core::cube::Cube3D;
use crate::core::depth::DepthMap;
use crate::core::priors::DimensionPrior;
use crate::math::{so3, stats};
use crate::misc::type_aliases::{Corners3, Float, Mask, Mat3, Point2, Point3, Vec3};

/// Number of depth steps scanned by the geometric z loss.
pub const Z_SCAN_STEPS: usize = 50;

/// Length of one depth step of the geometric z loss.
pub const Z_SCAN_STEP: Float = 0.1;

/// Margin in pixels around the ground-truth box inside which
/// the projected center must lie for the z scan to run.
pub const Z_SCAN_MARGIN: Float = 50.0;

/// Fixed z penalty of a projected center outside the ground-truth box.
pub const Z_OUTSIDE_PENALTY: Float = Z_SCAN_STEP * Z_SCAN_STEPS as Float;

/// Area added to empty projected boxes during the z scan.
const ZERO_AREA_PENALTY: Float = 1e7;

/// Border kept when reading pseudo ground-truth depth at a point.
pub const PSEUDO_GT_MARGIN: Float = 10.0;

/// Largest z error counted as close in diagnostics.
pub const Z_CLOSE_THRESHOLD: Float = 0.2;

const FOCAL_ALPHA: Float = 0.25;
const FOCAL_GAMMA: Float = 2.0;
const DICE_SMOOTH: Float = 1.0;

// TERMS #############################################################

/// Loss terms that can be enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LossTerm {
    Iou,
    PoseAlignment,
    PoseGround,
    PoseGround2,
    Segmentation,
    Z,
    ZPseudoGtPatch,
    ZPseudoGtCenter,
    Dims,
    Depth,
}

impl LossTerm {
    pub const ALL: [LossTerm; 10] = [
        LossTerm::Iou,
        LossTerm::PoseAlignment,
        LossTerm::PoseGround,
        LossTerm::PoseGround2,
        LossTerm::Segmentation,
        LossTerm::Z,
        LossTerm::ZPseudoGtPatch,
        LossTerm::ZPseudoGtCenter,
        LossTerm::Dims,
        LossTerm::Depth,
    ];

    pub fn name(self) -> &'static str {
        match self {
            LossTerm::Iou => "iou",
            LossTerm::PoseAlignment => "pose_alignment",
            LossTerm::PoseGround => "pose_ground",
            LossTerm::PoseGround2 => "pose_ground2",
            LossTerm::Segmentation => "segmentation",
            LossTerm::Z => "z",
            LossTerm::ZPseudoGtPatch => "z_pseudo_gt_patch",
            LossTerm::ZPseudoGtCenter => "z_pseudo_gt_center",
            LossTerm::Dims => "dims",
            LossTerm::Depth => "depth",
        }
    }
}

impl fmt::Display for LossTerm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for LossTerm {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LossTerm::ALL
            .iter()
            .find(|t| t.name() == s)
            .cloned()
            .ok_or_else(|| format!("unknown loss term: {}", s))
    }
}

/// Per pixel loss comparing a silhouette with a mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentationLoss {
    Bce,
    Dice,
    Focal,
}

/// Weights of the loss terms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossWeights {
    pub iou: Float,
    pub seg: Float,
    pub pose: Float,
    pub normal_vec: Float,
    pub z: Float,
    pub dims: Float,
    pub depth: Float,
    /// Global weight of every 3D term.
    pub global: Float,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            iou: 1.0,
            seg: 1.0,
            pose: 1.0,
            normal_vec: 1.0,
            z: 1.0,
            dims: 1.0,
            depth: 1.0,
            global: 1.0,
        }
    }
}

/// Configuration of the loss orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct LossConfig {
    pub terms: Vec<LossTerm>,
    pub weights: LossWeights,
    pub segmentation: SegmentationLoss,
    /// Weight of the uncertainty regularization, confidence weighting is
    /// disabled if not strictly positive.
    pub use_confidence: Float,
    /// Multiply every term by `1 / ln(max(z, e))`.
    pub inverse_z_weight: bool,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            terms: vec![
                LossTerm::Iou,
                LossTerm::PoseAlignment,
                LossTerm::PoseGround,
                LossTerm::Segmentation,
                LossTerm::Z,
                LossTerm::Dims,
                LossTerm::Depth,
            ],
            weights: LossWeights::default(),
            segmentation: SegmentationLoss::Focal,
            use_confidence: 0.0,
            inverse_z_weight: false,
        }
    }
}

impl LossConfig {
    pub fn enabled(&self, term: LossTerm) -> bool {
        self.terms.contains(&term)
    }
}

// REDUCTION AND WEIGHTING ###########################################

/// Mean of the finite values, exactly 0 if there is none.
pub fn safely_reduce(values: &[Float]) -> Float {
    match stats::finite_mean(values) {
        Some(mean) => mean,
        None => {
            if !values.is_empty() {
                warn!("all {} loss values are non finite", values.len());
            }
            0.0
        }
    }
}

/// Multiplicative loss weight of a predicted log-uncertainty, `sqrt(2) exp(-u)`.
pub fn confidence_weight(uncertainty: Float) -> Float {
    std::f32::consts::SQRT_2 * (-uncertainty).exp()
}

/// Weight up-weighting nearby objects, `1 / ln(max(z, e))`.
pub fn inverse_depth_weight(z: Float) -> Float {
    1.0 / z.max(std::f32::consts::E).ln()
}

// LOSS FUNCTIONS ####################################################

/// Generalized IoU loss of the projected box. A cube without projection
/// gets the largest loss.
pub fn iou(projected: Option<&Box2D>, gt_box: &Box2D) -> Float {
    projected.map_or(2.0, |p| gt_box.giou_loss(p))
}

/// Pairwise rotation consistency inside each image: mean of
/// `1 - |cos(angle)|` over all pairs, summed over images and divided by
/// one more than the number of images with a single instance.
///
/// `None` if no image has two instances.
pub fn pose_alignment(rotations_per_image: &[Vec<Mat3>]) -> Option<Float> {
    let mut loss = 0.0;
    let mut nb_fails = 0;
    for rotations in rotations_per_image.iter() {
        if rotations.len() < 2 {
            nb_fails += 1;
            continue;
        }
        let mut pair_losses = Vec::new();
        for (i, r1) in rotations.iter().enumerate() {
            for r2 in rotations[i + 1..].iter() {
                pair_losses.push(1.0 - so3::relative_angle_cos(r1, r2).abs());
            }
        }
        loss += stats::safe_mean(&pair_losses);
    }
    if nb_fails == rotations_per_image.len() {
        debug!("pose alignment skipped, no image with two instances");
        return None;
    }
    Some(loss / (nb_fails + 1) as Float)
}

/// `1 - |cos|` between the ground normal and the up axis (column 1)
/// of the rotation, times the ground validity weight.
pub fn pose_ground(rotation: &Mat3, normal: &Vec3, weight: Float) -> Float {
    let up = rotation.column(1);
    let cos = up.dot(normal) / (up.norm() * normal.norm()).max(1e-8);
    (1.0 - cos.abs()) * weight
}

/// `1 - cos(angle)` between the rotation and the rotation built from the
/// ground normal, times the ground validity weight.
pub fn pose_ground_rotation(rotation: &Mat3, normal: &Vec3, weight: Float) -> Float {
    (1.0 - so3::relative_angle_cos(rotation, &so3::from_normal(normal))) * weight
}

/// Area of the projected box of a cube, clipped to the image.
fn clipped_projected_area(cube: &Cube3D, intrinsics: &Intrinsics, width: Float, height: Float) -> Float {
    cube.projected_box(intrinsics)
        .map_or(0.0, |b| b.clip(width, height).area())
}

/// Geometric z loss.
///
/// The cube is moved away from (or toward) the camera by steps of 0.1
/// until its clipped projected area best matches the ground-truth box area.
/// The loss is half the distance moved. A projected center farther than
/// 50 pixels from the ground-truth box gets a fixed penalty instead.
#[allow(clippy::cast_precision_loss)]
pub fn z_scan(
    cube: &Cube3D,
    gt_box: &Box2D,
    intrinsics: &Intrinsics,
    width: usize,
    height: usize,
) -> Float {
    let (w, h) = (width as Float, height as Float);
    let projected = cube.projected_box(intrinsics).map(|b| b.clip(w, h));
    let center = match projected {
        Some(b) => b.center(),
        None => return 0.5 * Z_OUTSIDE_PENALTY,
    };
    let within = gt_box.x1() - Z_SCAN_MARGIN <= center.x
        && center.x <= gt_box.x2() + Z_SCAN_MARGIN
        && gt_box.y1() - Z_SCAN_MARGIN <= center.y
        && center.y <= gt_box.y2() + Z_SCAN_MARGIN;
    if !within {
        return 0.5 * Z_OUTSIDE_PENALTY;
    }
    let gt_area = gt_box.area();
    // A too large projection means the cube is too close.
    let direction = if gt_area < projected.map_or(0.0, |b| b.area()) {
        1.0
    } else {
        -1.0
    };
    let steps = stats::linspace(0.0, Z_SCAN_STEP * (Z_SCAN_STEPS - 1) as Float, Z_SCAN_STEPS);
    let area_errors: Vec<Float> = steps
        .iter()
        .map(|step| {
            let moved = cube.shifted_depth(direction * step);
            let mut area = clipped_projected_area(&moved, intrinsics, w, h);
            if area == 0.0 {
                area += ZERO_AREA_PENALTY;
            }
            (gt_area - area).abs()
        })
        .collect();
    let best = stats::argmin(&area_errors).unwrap_or(0);
    0.5 * steps[best]
}

/// Pseudo ground-truth depth: median depth inside the projected box
/// clipped to the image, or the depth at its center if the clipped box is empty.
#[allow(clippy::cast_precision_loss)]
pub fn z_pseudo_gt_patch(depth: &DepthMap, projected: &Box2D) -> Float {
    let clipped = projected.clip(depth.width() as Float, depth.height() as Float);
    if clipped.area() > 0.0 {
        if let Some(median) = depth.median_in_box(&clipped) {
            return median;
        }
    }
    let c = projected.center();
    depth.at_with_margin(c.x, c.y, PSEUDO_GT_MARGIN)
}

/// Pseudo ground-truth depth at a pixel, kept away from the image border.
pub fn z_pseudo_gt_center(depth: &DepthMap, center: &Point2) -> Float {
    depth.at_with_margin(center.x, center.y, PSEUDO_GT_MARGIN)
}

/// Dimension loss: z-score beyond a dead zone of one std, per axis.
/// `None` if some prior std is unknown.
pub fn dims(dimensions: &Vec3, prior: &DimensionPrior) -> Option<Vec3> {
    if prior.has_unknown_std() {
        return None;
    }
    Some(Vec3::from_fn(|i, _| {
        ((dimensions[i] - prior.mean[i]).abs() / prior.std[i] - 1.0).max(0.0)
    }))
}

fn sigmoid(x: Float) -> Float {
    1.0 / (1.0 + (-x).exp())
}

/// Binary cross entropy of a logit against a target in `[0, 1]`.
fn bce_with_logits(logit: Float, target: Float) -> Float {
    logit.max(0.0) - logit * target + (-logit.abs()).exp().ln_1p()
}

/// Focal loss of a logit against a target in `[0, 1]`.
fn focal(logit: Float, target: Float) -> Float {
    let p = sigmoid(logit);
    let p_t = p * target + (1.0 - p) * (1.0 - target);
    let alpha_t = FOCAL_ALPHA * target + (1.0 - FOCAL_ALPHA) * (1.0 - target);
    alpha_t * bce_with_logits(logit, target) * (1.0 - p_t).powf(FOCAL_GAMMA)
}

/// Segmentation loss between a mask and a rasterized silhouette of the
/// same shape. Mask values are used as logits, silhouette values as targets
/// (for dice, the silhouette goes through a sigmoid).
///
/// NaN if the shapes differ or are empty.
#[allow(clippy::cast_precision_loss)]
pub fn segmentation(kind: SegmentationLoss, mask: &Mask, silhouette: &Mask) -> Float {
    if mask.shape() != silhouette.shape() || mask.is_empty() {
        return Float::NAN;
    }
    let as_float = |b: &bool| if *b { 1.0 } else { 0.0 };
    let pairs = mask.iter().map(as_float).zip(silhouette.iter().map(as_float));
    let count = mask.len() as Float;
    match kind {
        SegmentationLoss::Bce => pairs.map(|(x, t)| bce_with_logits(x, t)).sum::<Float>() / count,
        SegmentationLoss::Focal => pairs.map(|(x, t)| focal(x, t)).sum::<Float>() / count,
        SegmentationLoss::Dice => {
            let (inter, sum_pred, sum_gt) = pairs.fold((0.0, 0.0, 0.0), |(i, p, g), (y, s)| {
                let s = sigmoid(s);
                (i + s * y, p + s, g + y)
            });
            1.0 - (2.0 * inter + DICE_SMOOTH) / (sum_pred + sum_gt + DICE_SMOOTH)
        }
    }
}

/// Depth range loss: L1 between the depth extent of the cube corners and
/// the 10% - 90% quantile range of the depth map inside the object mask.
///
/// The depth map is resized to the mask shape. An empty or missing mask
/// falls back to the ground-truth box. NaN if no depth value is available.
pub fn depth_range(depth: &DepthMap, mask: Option<&Mask>, gt_box: &Box2D, cube: &Cube3D) -> Float {
    let values = match mask.filter(|m| !m.is_empty()) {
        Some(m) => {
            let resized = depth.resized(m.ncols(), m.nrows());
            let inside = resized.values_in_mask(m);
            if inside.is_empty() {
                debug!("empty mask, depth range taken in the box");
                resized.values_in_box(gt_box)
            } else {
                inside
            }
        }
        None => depth.values_in_box(gt_box),
    };
    let target = match (stats::quantile(&values, 0.9), stats::quantile(&values, 0.1)) {
        (Some(high), Some(low)) => high - low,
        _ => return Float::NAN,
    };
    let corners = cube.corners();
    let (min, max) = corners
        .iter()
        .fold((Float::INFINITY, Float::NEG_INFINITY), |(lo, hi), c| {
            (lo.min(c.z), hi.max(c.z))
        });
    (target - (max - min)).abs()
}

// SUPERVISED HELPERS ################################################

/// Smooth L1 loss. With `beta <= 0` this is the plain L1 loss.
pub fn smooth_l1(prediction: Float, target: Float, beta: Float) -> Float {
    let diff = (prediction - target).abs();
    if beta <= 0.0 || diff >= beta {
        diff - 0.5 * beta.max(0.0)
    } else {
        0.5 * diff * diff / beta
    }
}

fn l1_distance(a: &Point3, b: &Point3) -> Float {
    (a - b).abs().sum()
}

/// Mean L1 distance between corresponding corners.
pub fn corners_l1(a: &Corners3, b: &Corners3) -> Float {
    a.iter().zip(b.iter()).map(|(p, q)| l1_distance(p, q)).sum::<Float>() / 8.0
}

/// Symmetric chamfer distance between two corner sets, with the L1 distance.
pub fn chamfer(a: &Corners3, b: &Corners3) -> Float {
    let one_way = |from: &Corners3, to: &Corners3| {
        from.iter()
            .map(|p| {
                to.iter()
                    .map(|q| l1_distance(p, q))
                    .fold(Float::INFINITY, Float::min)
            })
            .sum::<Float>()
            / 8.0
    };
    one_way(a, b) + one_way(b, a)
}

// REPORT ############################################################

/// Per instance values of every computed term. `None` terms are absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceLosses {
    pub iou: Option<Vec<Float>>,
    pub pose: Option<Vec<Float>>,
    pub normal_vec: Option<Vec<Float>>,
    pub seg: Option<Vec<Float>>,
    pub z: Option<Vec<Float>>,
    pub pseudo_gt_z: Option<Vec<Float>>,
    pub dims_w: Option<Vec<Float>>,
    pub dims_h: Option<Vec<Float>>,
    pub dims_l: Option<Vec<Float>>,
    pub depth: Option<Vec<Float>>,
}

/// Reduced losses and the weighted 3D total before confidence weighting.
#[derive(Debug, Clone, PartialEq)]
pub struct ReducedLosses {
    pub losses: BTreeMap<&'static str, Float>,
    pub total_3d: Option<Float>,
}

impl InstanceLosses {
    fn entries(&self, w: &LossWeights) -> [(&'static str, Float, &Option<Vec<Float>>); 10] {
        [
            ("loss_iou", w.iou, &self.iou),
            ("loss_pose", w.pose, &self.pose),
            ("loss_normal_vec", w.normal_vec, &self.normal_vec),
            ("loss_seg", w.seg, &self.seg),
            ("loss_z", w.z, &self.z),
            ("loss_pseudo_gt_z", w.z, &self.pseudo_gt_z),
            ("loss_dims_w", w.dims, &self.dims_w),
            ("loss_dims_h", w.dims, &self.dims_h),
            ("loss_dims_l", w.dims, &self.dims_l),
            ("loss_depth", w.depth, &self.depth),
        ]
    }

    /// Weight and reduce every present term.
    ///
    /// `uncertainties` and `depths` are per instance. Uncertainties are used
    /// only if `use_confidence` is strictly positive, depths only with
    /// the inverse z weight.
    pub fn reduce(
        &self,
        config: &LossConfig,
        uncertainties: Option<&[Float]>,
        depths: &[Float],
    ) -> ReducedLosses {
        let uncertainties = uncertainties.filter(|_| config.use_confidence > 0.0);
        let mut losses = BTreeMap::new();
        let mut total: Vec<Float> = Vec::new();
        let mut any_term = false;
        for (name, weight, values) in self.entries(&config.weights).iter() {
            let values = match values {
                Some(values) => values,
                None => continue,
            };
            any_term = true;
            if total.len() < values.len() {
                total.resize(values.len(), 0.0);
            }
            for (t, v) in total.iter_mut().zip(values.iter()) {
                *t += v * weight;
            }
            let weighted: Vec<Float> = values
                .iter()
                .enumerate()
                .map(|(i, &v)| {
                    let mut v = v;
                    if config.inverse_z_weight {
                        v *= depths.get(i).map_or(1.0, |&z| inverse_depth_weight(z));
                    }
                    if let Some(u) = uncertainties.and_then(|u| u.get(i)) {
                        v *= confidence_weight(*u);
                    }
                    v
                })
                .collect();
            losses.insert(*name, safely_reduce(&weighted) * weight * config.weights.global);
        }
        if let Some(u) = uncertainties {
            losses.insert("uncert", config.use_confidence * safely_reduce(u));
        }
        let total_3d = if any_term {
            Some(config.weights.global * safely_reduce(&total))
        } else {
            None
        };
        ReducedLosses { losses, total_3d }
    }
}

/// Tracking values, not used for optimization.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Diagnostics {
    /// Mean 2D IoU between projected and ground-truth boxes.
    pub iou_2d: Option<Float>,
    pub z_error: Option<Float>,
    pub dims_error: Option<Float>,
    pub xy_error: Option<Float>,
    /// Fraction of z errors below 0.2.
    pub z_close: Option<Float>,
    /// Weighted sum of the terms before confidence weighting.
    pub total_3d_loss: Option<Float>,
}

/// Outcome of the loss computation of one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct LossReport {
    pub losses: BTreeMap<&'static str, Float>,
    pub diagnostics: Diagnostics,
}

impl LossReport {
    pub fn get(&self, key: &str) -> Option<Float> {
        self.losses.get(key).cloned()
    }

    /// Sum of all reported losses.
    pub fn total(&self) -> Float {
        self.losses.values().sum()
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use approx;
    use nalgebra::DMatrix;
    use quickcheck_macros;

    fn camera() -> Intrinsics {
        Intrinsics::new(500.0, 500.0, 320.0, 240.0)
    }

    fn unit_cube(z: Float) -> Cube3D {
        Cube3D::new(Point3::new(0.0, 0.0, z), Vec3::new(1.0, 1.0, 1.0), Mat3::identity()).unwrap()
    }

    #[test]
    fn reduction_ignores_non_finite() {
        approx::assert_relative_eq!(2.0, safely_reduce(&[1.0, Float::NAN, 3.0, Float::INFINITY]));
        assert_eq!(0.0, safely_reduce(&[Float::NAN, Float::NEG_INFINITY]));
        assert_eq!(0.0, safely_reduce(&[]));
    }

    #[test]
    fn term_names_round_trip() {
        for term in LossTerm::ALL.iter() {
            assert_eq!(Ok(*term), term.name().parse::<LossTerm>());
        }
        assert!("pose".parse::<LossTerm>().is_err());
    }

    #[test]
    fn pose_alignment_absent_for_single_instances() {
        let r = so3::exp_matrix(Vec3::new(0.0, 0.3, 0.0));
        assert_eq!(None, pose_alignment(&[vec![r], vec![Mat3::identity()]]));
        let aligned = pose_alignment(&[vec![r, r], vec![r]]).unwrap();
        approx::assert_abs_diff_eq!(0.0, aligned, epsilon = 1e-6);
        // Quarter turn: cos = 0, loss 1, single-instance image halves it.
        let quarter = so3::exp_matrix(Vec3::new(0.0, std::f32::consts::FRAC_PI_2, 0.0));
        let loss = pose_alignment(&[vec![Mat3::identity(), quarter], vec![r]]).unwrap();
        approx::assert_relative_eq!(0.5, loss, epsilon = 1e-5);
    }

    #[test]
    fn ground_losses() {
        let normal = Vec3::y();
        approx::assert_abs_diff_eq!(0.0, pose_ground(&Mat3::identity(), &normal, 1.0));
        let tilted = so3::exp_matrix(Vec3::new(0.0, 0.0, std::f32::consts::FRAC_PI_2));
        approx::assert_relative_eq!(0.1, pose_ground(&tilted, &normal, 0.1), epsilon = 1e-5);
        let r = so3::from_normal(&normal);
        approx::assert_abs_diff_eq!(0.0, pose_ground_rotation(&r, &normal, 1.0), epsilon = 1e-5);
    }

    #[test]
    fn z_scan_finds_depth_offset() {
        let intrinsics = camera();
        let truth = unit_cube(5.0);
        let gt_box = truth.projected_box(&intrinsics).unwrap();
        // Too close by 1: moving 1 away matches the box area.
        let close = unit_cube(4.0);
        approx::assert_relative_eq!(0.5, z_scan(&close, &gt_box, &intrinsics, 640, 480), epsilon = 1e-4);
        let far = unit_cube(6.5);
        approx::assert_relative_eq!(0.75, z_scan(&far, &gt_box, &intrinsics, 640, 480), epsilon = 1e-4);
        approx::assert_abs_diff_eq!(0.0, z_scan(&truth, &gt_box, &intrinsics, 640, 480));
        let away = Box2D::new(500.0, 10.0, 600.0, 50.0).unwrap();
        assert_eq!(2.5, z_scan(&truth, &away, &intrinsics, 640, 480));
    }

    #[test]
    fn pseudo_gt_depth() {
        let depth = DepthMap::new(DMatrix::from_fn(48, 64, |_, c| c as Float));
        let inside = Box2D::new(10.0, 10.0, 20.0, 20.0).unwrap();
        assert_eq!(14.0, z_pseudo_gt_patch(&depth, &inside));
        let outside = Box2D::new(100.0, 100.0, 120.0, 120.0).unwrap();
        assert_eq!(53.0, z_pseudo_gt_patch(&depth, &outside));
        assert_eq!(10.0, z_pseudo_gt_center(&depth, &Point2::new(-4.0, 3.0)));
    }

    #[test]
    fn dims_dead_zone() {
        let prior = DimensionPrior {
            mean: Vec3::new(1.0, 1.0, 1.0),
            std: Vec3::new(0.1, 0.2, 0.5),
        };
        let loss = dims(&Vec3::new(1.05, 1.6, 0.0), &prior).unwrap();
        approx::assert_relative_eq!(Vec3::new(0.0, 2.0, 1.0), loss, epsilon = 1e-5);
        let unknown = DimensionPrior {
            std: Vec3::new(0.1, Float::NAN, 0.1),
            ..prior
        };
        assert_eq!(None, dims(&Vec3::new(1.0, 1.0, 1.0), &unknown));
    }

    #[test]
    fn segmentation_prefers_matching_silhouette() {
        let mask = DMatrix::from_fn(20, 20, |r, c| r >= 5 && r < 15 && c >= 5 && c < 15);
        let shifted = DMatrix::from_fn(20, 20, |r, c| r >= 8 && r < 18 && c < 10);
        for kind in [SegmentationLoss::Bce, SegmentationLoss::Dice, SegmentationLoss::Focal].iter() {
            let matching = segmentation(*kind, &mask, &mask);
            let wrong = segmentation(*kind, &mask, &shifted);
            assert!(matching < wrong, "{:?}: {} >= {}", kind, matching, wrong);
        }
        let small = DMatrix::from_element(3, 3, true);
        assert!(segmentation(SegmentationLoss::Focal, &mask, &small).is_nan());
    }

    #[test]
    fn depth_range_with_mask_and_fallback() {
        let depth = DepthMap::new(DMatrix::from_fn(10, 10, |_, c| c as Float));
        let cube = unit_cube(5.0);
        let gt_box = Box2D::new(0.0, 0.0, 10.0, 10.0).unwrap();
        let mask = DMatrix::from_element(10, 10, true);
        // Quantiles 0.9 and 0.1 of 0..9 are 8.1 and 0.9, cube extent is 1.
        let expected = (8.1 - 0.9 - 1.0 as Float).abs();
        approx::assert_relative_eq!(expected, depth_range(&depth, Some(&mask), &gt_box, &cube), epsilon = 1e-4);
        let empty = DMatrix::from_element(10, 10, false);
        approx::assert_relative_eq!(expected, depth_range(&depth, Some(&empty), &gt_box, &cube), epsilon = 1e-4);
        approx::assert_relative_eq!(expected, depth_range(&depth, None, &gt_box, &cube), epsilon = 1e-4);
        let outside = Box2D::new(50.0, 50.0, 60.0, 60.0).unwrap();
        assert!(depth_range(&depth, None, &outside, &cube).is_nan());
    }

    #[test]
    fn supervised_helpers() {
        assert_eq!(2.0, smooth_l1(1.0, 3.0, 0.0));
        approx::assert_relative_eq!(0.125, smooth_l1(1.0, 1.5, 1.0));
        let a = unit_cube(5.0).corners();
        let b = unit_cube(6.0).corners();
        assert_eq!(0.0, chamfer(&a, &a));
        approx::assert_relative_eq!(1.0, corners_l1(&a, &b), epsilon = 1e-5);
        // Half of the corners of each cube coincide with the other cube.
        approx::assert_relative_eq!(1.0, chamfer(&a, &b), epsilon = 1e-5);
    }

    #[test]
    fn reduce_weights_and_absent_terms() {
        let config = LossConfig {
            weights: LossWeights {
                iou: 2.0,
                global: 0.5,
                ..LossWeights::default()
            },
            ..LossConfig::default()
        };
        let terms = InstanceLosses {
            iou: Some(vec![1.0, Float::NAN, 3.0]),
            ..InstanceLosses::default()
        };
        let reduced = terms.reduce(&config, None, &[]);
        assert_eq!(1, reduced.losses.len());
        approx::assert_relative_eq!(2.0, reduced.losses["loss_iou"]);
        assert!(!reduced.losses.contains_key("uncert"));
        approx::assert_relative_eq!(2.0, reduced.total_3d.unwrap());
        assert_eq!(None, InstanceLosses::default().reduce(&config, None, &[]).total_3d);
    }

    #[test]
    fn inverse_depth_weighting() {
        approx::assert_relative_eq!(1.0, inverse_depth_weight(0.5), epsilon = 1e-6);
        approx::assert_relative_eq!(0.5, inverse_depth_weight(std::f32::consts::E.powi(2)));
    }

    #[quickcheck_macros::quickcheck]
    fn confidence_weighting_is_monotonic(loss: u8, u1: i8, du: u8) -> bool {
        let config = LossConfig {
            use_confidence: 1.0,
            ..LossConfig::default()
        };
        let terms = InstanceLosses {
            z: Some(vec![1.0 + loss as Float / 10.0]),
            ..InstanceLosses::default()
        };
        let u1 = u1 as Float / 40.0;
        let u2 = u1 + (1 + du as u16) as Float / 100.0;
        let low = terms.reduce(&config, Some(&[u1]), &[]);
        let high = terms.reduce(&config, Some(&[u2]), &[]);
        high.losses["loss_z"] < low.losses["loss_z"] && high.losses["uncert"] > low.losses["uncert"]
    }
}
