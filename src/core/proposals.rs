// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Geometric proposal sampler: candidate cuboids for a 2D reference box
//! from a depth map, dimension priors and an optional ground normal.
//!
//! Center estimation:
//!   1. shrink the reference box by `1 / margin_divisor` on each side,
//!   2. read depth along a diagonal grid of pixels of the shrunk box,
//!   3. back-project every grid pixel along its viewing ray,
//!   4. sample each center coordinate around an affine function of the grid
//!      median, with a standard deviation proportional to the grid spread.
//!
//! Dimensions are sampled from the category prior inside a clip window,
//! rotations either uniformly (approximately) or around the ground normal.

use log::{debug, warn};
use rand::{seq::SliceRandom, Rng};
use rand_distr::{Distribution, Normal};
use std::fmt;

use crate::core::box2d::Box2D;
use crate::core::camera::Intrinsics;
use crate::core::cube::Cube3D;
use crate::core::depth::DepthMap;
use crate::core::priors::DimensionPrior;
use crate::math::{so3, stats};
use crate::misc::type_aliases::{Float, Mat3, Point2, Point3, Vec3};

/// Configuration of the proposal sampler.
/// Default values are the empirically tuned ones.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerConfig {
    /// The outer `1 / margin_divisor` of the box is ignored on each side.
    pub margin_divisor: Float,
    /// Maximum number of redraws of an out of range sample before clamping it.
    pub max_retries: usize,
    /// Lower bound of every sampled dimension.
    pub min_dimension: Float,
    /// Factors of the prior std used to sample `(w, h, l)`.
    pub dimension_std_factors: Vec3,
    /// Upper bound of `(w, h, l)`, as `mean + k * std`.
    pub dimension_upper_stds: Vec3,
    /// Center coordinates are sampled around `scale * median + offset`.
    pub center_scale: Vec3,
    pub center_offset: Vec3,
    /// Factors of the grid std used to sample the center.
    pub center_std_factors: Vec3,
    /// Number of yaw angles in `[0, π]` when a ground normal is given.
    pub nb_yaw_angles: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            margin_divisor: 4.0,
            max_retries: 100,
            min_dimension: 0.05,
            dimension_std_factors: Vec3::new(1.0, 1.1, 1.0),
            dimension_upper_stds: Vec3::new(2.0, 2.2, 2.0),
            center_scale: Vec3::new(1.15, 1.1, 0.85),
            center_offset: Vec3::new(0.0, 0.0, 0.35),
            center_std_factors: Vec3::new(0.7, 0.7, 1.2),
            nb_yaw_angles: 36,
        }
    }
}

/// Per-image inputs shared by all the reference boxes of the image.
#[derive(Debug, Clone, Copy)]
pub struct ProposalContext<'a> {
    pub depth: &'a DepthMap,
    pub intrinsics: &'a Intrinsics,
    /// Unit ground normal pointing up, if known.
    pub ground_normal: Option<Vec3>,
}

/// Min and max of the sampled values, per axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampledRanges {
    pub center_min: Vec3,
    pub center_max: Vec3,
    pub dimensions_min: Vec3,
    pub dimensions_max: Vec3,
}

/// Candidate cuboids for one reference box.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposalSet {
    pub reference: Box2D,
    pub cubes: Vec<Cube3D>,
    pub ranges: Option<SampledRanges>,
}

impl ProposalSet {
    fn empty(reference: Box2D) -> Self {
        Self {
            reference,
            cubes: Vec::new(),
            ranges: None,
        }
    }
}

/// Sample `count` values from `Normal(mean, std)`.
///
/// With a range, out of range values are redrawn at most `max_retries`
/// times, then clamped into the range.
pub fn sample_normal_in_range<R: Rng>(
    mean: Float,
    std: Float,
    count: usize,
    range: Option<(Float, Float)>,
    max_retries: usize,
    rng: &mut R,
) -> Vec<Float> {
    let clamp = |v: Float| match range {
        Some((low, high)) => v.max(low).min(high),
        None => v,
    };
    let normal = match Normal::new(mean, std) {
        Ok(normal) if std.is_finite() => normal,
        _ => {
            debug!("invalid normal distribution ({}, {}), using the mean", mean, std);
            return vec![clamp(mean); count];
        }
    };
    let in_range = |v: Float| range.map_or(true, |(low, high)| low <= v && v <= high);
    let mut nb_clamped = 0;
    let samples = (0..count)
        .map(|_| {
            let mut value = normal.sample(rng);
            let mut retries = 0;
            while !in_range(value) && retries < max_retries {
                value = normal.sample(rng);
                retries += 1;
            }
            if !in_range(value) {
                nb_clamped += 1;
            }
            clamp(value)
        })
        .collect();
    if nb_clamped > 0 {
        debug!(
            "{} samples of Normal({}, {}) clamped into {:?} after {} retries",
            nb_clamped, mean, std, range, max_retries
        );
    }
    samples
}

/// Sample `count` cuboid proposals for one reference box.
pub fn propose<R: Rng>(
    reference: &Box2D,
    prior: &DimensionPrior,
    context: &ProposalContext,
    count: usize,
    config: &SamplerConfig,
    rng: &mut R,
) -> ProposalSet {
    if count == 0 {
        return ProposalSet::empty(*reference);
    }

    // Dimensions.
    let dims: Vec<Vec<Float>> = (0..3)
        .map(|axis| {
            let mean = prior.mean[axis];
            let std = prior.std[axis];
            let high = mean + config.dimension_upper_stds[axis] * std;
            let range = if high.is_finite() {
                Some((config.min_dimension, high.max(config.min_dimension)))
            } else {
                Some((config.min_dimension, Float::INFINITY))
            };
            let std = std * config.dimension_std_factors[axis];
            sample_normal_in_range(mean, std, count, range, config.max_retries, rng)
        })
        .collect();
    let lengths = &dims[2];

    // Grid of back-projected points on the diagonal of the shrunk box.
    let shrunk = reference.shrunk(config.margin_divisor);
    let xs_px = stats::linspace(shrunk.x1(), shrunk.x2(), count);
    let ys_px = stats::linspace(shrunk.y1(), shrunk.y2(), count);
    let mut grid: [Vec<Float>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    for ((x_px, y_px), l) in xs_px.iter().zip(ys_px.iter()).zip(lengths.iter()) {
        let pixel = Point2::new(x_px.trunc(), y_px.trunc());
        let distance = context.depth.at(pixel.x, pixel.y);
        if !(distance.is_finite() && distance > 0.0) {
            continue;
        }
        let p = context.intrinsics.back_project_along_ray(&pixel, distance);
        grid[0].push(p.x);
        grid[1].push(p.y);
        // The visible surface is the front of the object.
        grid[2].push(p.z + 0.5 * l);
    }
    if grid[2].is_empty() {
        warn!("no valid depth inside {:?}, no proposal", reference);
        return ProposalSet::empty(*reference);
    }

    // Center.
    let centers: Vec<Vec<Float>> = (0..3)
        .map(|axis| {
            let median = stats::median(&grid[axis]).unwrap_or(0.0);
            let std = stats::std_dev(&grid[axis]).unwrap_or(0.0);
            let mean = config.center_scale[axis] * median + config.center_offset[axis];
            let std = config.center_std_factors[axis] * std;
            sample_normal_in_range(mean, std, count, None, config.max_retries, rng)
        })
        .collect();

    // Rotations.
    let ground = context.ground_normal.and_then(|n| n.try_normalize(1e-6));
    let family = ground.map(|n| so3::orthobasis_family(&n, config.nb_yaw_angles.max(1)));
    let rotations: Vec<Mat3> = (0..count)
        .map(|_| match &family {
            Some(family) => *family.choose(rng).unwrap_or(&Mat3::identity()),
            None => so3::random_orthobasis(rng),
        })
        .collect();

    let cubes: Vec<Cube3D> = (0..count)
        .filter_map(|i| {
            let center = Point3::new(centers[0][i], centers[1][i], centers[2][i]);
            let dimensions = Vec3::new(dims[0][i], dims[1][i], dims[2][i]);
            Cube3D::new(center, dimensions, rotations[i]).ok()
        })
        .collect();
    if cubes.len() < count {
        warn!("{} invalid proposals dropped", count - cubes.len());
    }

    let min_max = |values: &[Float]| {
        values
            .iter()
            .fold((Float::INFINITY, Float::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    };
    let (cx, cy, cz) = (min_max(&centers[0]), min_max(&centers[1]), min_max(&centers[2]));
    let (dw, dh, dl) = (min_max(&dims[0]), min_max(&dims[1]), min_max(&dims[2]));
    let ranges = SampledRanges {
        center_min: Vec3::new(cx.0, cy.0, cz.0),
        center_max: Vec3::new(cx.1, cy.1, cz.1),
        dimensions_min: Vec3::new(dw.0, dh.0, dl.0),
        dimensions_max: Vec3::new(dw.1, dh.1, dl.1),
    };
    ProposalSet {
        reference: *reference,
        cubes,
        ranges: Some(ranges),
    }
}

/// Sample proposals for every reference box of an image, each with its prior.
/// Boxes are sampled independently, in order.
pub fn propose_batch<R: Rng>(
    instances: &[(Box2D, DimensionPrior)],
    context: &ProposalContext,
    count: usize,
    config: &SamplerConfig,
    rng: &mut R,
) -> Vec<ProposalSet> {
    instances
        .iter()
        .map(|(reference, prior)| propose(reference, prior, context, count, config, rng))
        .collect()
}

/// Baseline proposals ignoring every input: center `x, y ∈ [-1, 1]`,
/// `z ∈ [0, 5]`, dimensions in `(0, 2]` and random rotations.
pub fn propose_random<R: Rng>(reference: &Box2D, count: usize, rng: &mut R) -> ProposalSet {
    let cubes = (0..count)
        .filter_map(|_| {
            let center = Point3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(0.0..5.0),
            );
            let mut dim = || 2.0 - rng.gen_range(0.0..2.0);
            let dimensions = Vec3::new(dim(), dim(), dim());
            Cube3D::new(center, dimensions, so3::random_orthobasis(rng)).ok()
        })
        .collect();
    ProposalSet {
        reference: *reference,
        cubes,
        ranges: None,
    }
}

// DIAGNOSTICS #######################################################

/// Position of a ground-truth value relative to a sampled range,
/// normalized by the range width.
///
/// For a positive range it is the distance above the lower bound, for a
/// negative range the distance below the upper bound, and for a range
/// containing 0 the distance to the bound on the other side of 0.
pub fn gt_in_norm_range(range: (Float, Float), gt: Float) -> Float {
    let (low, high) = range;
    let width = (high - low).abs();
    let offset = if low > 0.0 {
        gt - low
    } else if high > 0.0 {
        if gt > 0.0 {
            gt - low
        } else {
            high - gt
        }
    } else {
        high - gt
    };
    offset / width
}

/// Reason why a ground-truth cuboid cannot be reached by a proposal set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Unreachable {
    /// Center coordinate out of the sampled range, by this distance.
    X(Float),
    Y(Float),
    Z(Float),
    /// Dimension more than 1.5 std below or above the prior mean.
    WidthBelow,
    WidthAbove,
    HeightBelow,
    HeightAbove,
    LengthBelow,
    LengthAbove,
}

impl fmt::Display for Unreachable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Unreachable::X(d) => write!(f, "x by {:.1}", d),
            Unreachable::Y(d) => write!(f, "y by {:.1}", d),
            Unreachable::Z(d) => write!(f, "z by {:.1}", d),
            Unreachable::WidthBelow => write!(f, "w-"),
            Unreachable::WidthAbove => write!(f, "w+"),
            Unreachable::HeightBelow => write!(f, "h-"),
            Unreachable::HeightAbove => write!(f, "h+"),
            Unreachable::LengthBelow => write!(f, "l-"),
            Unreachable::LengthAbove => write!(f, "l+"),
        }
    }
}

/// Number of prior std beyond which a dimension is unreachable.
const UNREACHABLE_STDS: Float = 1.5;

/// Check every axis of a ground-truth cuboid against the sampled ranges
/// and the prior. An empty result means the ground truth is reachable.
pub fn gt_reachability(
    gt: &Cube3D,
    ranges: &SampledRanges,
    prior: &DimensionPrior,
) -> Vec<Unreachable> {
    let mut reasons = Vec::new();
    let center = gt.center();
    let axes: [fn(Float) -> Unreachable; 3] = [Unreachable::X, Unreachable::Y, Unreachable::Z];
    for (axis, reason) in axes.iter().enumerate() {
        let (low, high) = (ranges.center_min[axis], ranges.center_max[axis]);
        let v = center[axis];
        if !(low < v && v < high) {
            let distance = if v < low { low - v } else { v - high };
            reasons.push(reason(distance));
        }
    }
    let dims = gt.dimensions();
    let checks = [
        (Unreachable::WidthBelow, Unreachable::WidthAbove),
        (Unreachable::HeightBelow, Unreachable::HeightAbove),
        (Unreachable::LengthBelow, Unreachable::LengthAbove),
    ];
    for (axis, (below, above)) in checks.iter().enumerate() {
        let spread = UNREACHABLE_STDS * prior.std[axis];
        if dims[axis] < prior.mean[axis] - spread {
            reasons.push(*below);
        }
        if dims[axis] > prior.mean[axis] + spread {
            reasons.push(*above);
        }
    }
    if !reasons.is_empty() {
        let text: Vec<String> = reasons.iter().map(|r| r.to_string()).collect();
        debug!("ground truth cannot be found due to {:?}", text);
    }
    reasons
}

/// Normalized position of the ground truth in the sampled range of each
/// axis `(x, y, z, w, h, l)`.
pub fn range_statistics(gt: &Cube3D, ranges: &SampledRanges) -> [Float; 6] {
    let mut stats = [0.0; 6];
    for axis in 0..3 {
        stats[axis] = gt_in_norm_range(
            (ranges.center_min[axis], ranges.center_max[axis]),
            gt.center()[axis],
        );
        stats[axis + 3] = gt_in_norm_range(
            (ranges.dimensions_min[axis], ranges.dimensions_max[axis]),
            gt.dimensions()[axis],
        );
    }
    stats
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use approx;
    use nalgebra::DMatrix;
    use quickcheck_macros;
    use rand::{rngs::StdRng, SeedableRng};

    fn prior() -> DimensionPrior {
        DimensionPrior {
            mean: Vec3::new(1.0, 1.0, 1.0),
            std: Vec3::new(0.1, 0.1, 0.1),
        }
    }

    fn flat_depth() -> DepthMap {
        DepthMap::new(DMatrix::from_element(480, 640, 5.0))
    }

    fn camera() -> Intrinsics {
        Intrinsics::new(500.0, 500.0, 320.0, 240.0)
    }

    fn reference() -> Box2D {
        Box2D::new(100.0, 100.0, 300.0, 300.0).unwrap()
    }

    #[test]
    fn flat_scene_proposals() {
        let depth = flat_depth();
        let intrinsics = camera();
        let context = ProposalContext {
            depth: &depth,
            intrinsics: &intrinsics,
            ground_normal: None,
        };
        let config = SamplerConfig::default();
        let mut rng = StdRng::seed_from_u64(3);
        let mut nb_in_window = 0;
        let mut nb_dims = 0;
        let mut z_sum = 0.0;
        let mut nb_cubes = 0;
        for _ in 0..50 {
            let set = propose(&reference(), &prior(), &context, 8, &config, &mut rng);
            assert_eq!(8, set.cubes.len());
            for cube in set.cubes.iter() {
                z_sum += cube.center().z;
                nb_cubes += 1;
                for d in cube.dimensions().iter() {
                    nb_dims += 1;
                    if (0.8..=1.2).contains(d) {
                        nb_in_window += 1;
                    }
                }
            }
        }
        let z_mean = z_sum / nb_cubes as Float;
        assert!(z_mean > 4.5 && z_mean < 5.2, "z mean {}", z_mean);
        assert!(nb_in_window as Float > 0.9 * nb_dims as Float);
    }

    #[test]
    fn ground_normal_rotations_are_upright() {
        let depth = flat_depth();
        let intrinsics = camera();
        let normal = Vec3::new(0.0, 1.0, 0.1).normalize();
        let context = ProposalContext {
            depth: &depth,
            intrinsics: &intrinsics,
            ground_normal: Some(normal),
        };
        let mut rng = StdRng::seed_from_u64(11);
        let set = propose(&reference(), &prior(), &context, 20, &SamplerConfig::default(), &mut rng);
        for cube in set.cubes.iter() {
            approx::assert_relative_eq!(cube.rotation().column(1).into_owned(), normal, epsilon = 1e-5);
        }
    }

    #[test]
    fn invalid_depth_gives_no_proposal() {
        let depth = DepthMap::new(DMatrix::from_element(480, 640, Float::NAN));
        let intrinsics = camera();
        let context = ProposalContext {
            depth: &depth,
            intrinsics: &intrinsics,
            ground_normal: None,
        };
        let mut rng = StdRng::seed_from_u64(0);
        let set = propose(&reference(), &prior(), &context, 8, &SamplerConfig::default(), &mut rng);
        assert!(set.cubes.is_empty());
        assert_eq!(None, set.ranges);
    }

    #[test]
    fn sampling_terminates_with_impossible_range() {
        let mut rng = StdRng::seed_from_u64(0);
        let samples = sample_normal_in_range(10.0, 0.1, 5, Some((0.0, 1.0)), 10, &mut rng);
        assert_eq!(vec![1.0; 5], samples);
    }

    #[test]
    fn random_baseline_bounds() {
        let mut rng = StdRng::seed_from_u64(5);
        let set = propose_random(&reference(), 100, &mut rng);
        assert_eq!(100, set.cubes.len());
        for cube in set.cubes.iter() {
            let c = cube.center();
            assert!(c.x.abs() <= 1.0 && c.y.abs() <= 1.0 && (0.0..=5.0).contains(&c.z));
            assert!(cube.dimensions().iter().all(|&d| d > 0.0 && d <= 2.0));
        }
    }

    #[test]
    fn norm_range_cases() {
        approx::assert_relative_eq!(0.5, gt_in_norm_range((1.0, 3.0), 2.0));
        approx::assert_relative_eq!(0.75, gt_in_norm_range((-1.0, 3.0), 2.0));
        approx::assert_relative_eq!(1.0, gt_in_norm_range((-1.0, 3.0), -1.0));
        approx::assert_relative_eq!(0.25, gt_in_norm_range((-5.0, -1.0), -2.0));
    }

    #[test]
    fn reachability_reasons() {
        let ranges = SampledRanges {
            center_min: Vec3::new(-1.0, -1.0, 4.0),
            center_max: Vec3::new(1.0, 1.0, 6.0),
            dimensions_min: Vec3::new(0.8, 0.8, 0.8),
            dimensions_max: Vec3::new(1.2, 1.2, 1.2),
        };
        let ok = Cube3D::new(Point3::new(0.0, 0.0, 5.0), Vec3::new(1.0, 1.0, 1.0), Mat3::identity())
            .unwrap();
        assert!(gt_reachability(&ok, &ranges, &prior()).is_empty());
        let far = Cube3D::new(Point3::new(0.0, 0.0, 8.0), Vec3::new(1.0, 2.0, 0.5), Mat3::identity())
            .unwrap();
        let reasons = gt_reachability(&far, &ranges, &prior());
        assert_eq!(
            vec![Unreachable::Z(2.0), Unreachable::HeightAbove, Unreachable::LengthBelow],
            reasons
        );
        assert_eq!("z by 2.0", reasons[0].to_string());
        let stats = range_statistics(&ok, &ranges);
        approx::assert_relative_eq!(0.5, stats[2]);
    }

    #[quickcheck_macros::quickcheck]
    fn dimensions_in_clip_window(seed: u64, mean: u8, std: u8) -> bool {
        let mean = 0.1 + mean as Float / 50.0;
        let std = 0.01 + std as Float / 500.0;
        let prior = DimensionPrior {
            mean: Vec3::new(mean, mean, mean),
            std: Vec3::new(std, std, std),
        };
        let depth = DepthMap::new(DMatrix::from_element(48, 64, 3.0));
        let intrinsics = Intrinsics::new(50.0, 50.0, 32.0, 24.0);
        let context = ProposalContext {
            depth: &depth,
            intrinsics: &intrinsics,
            ground_normal: None,
        };
        let config = SamplerConfig::default();
        let mut rng = StdRng::seed_from_u64(seed);
        let reference = Box2D::new(10.0, 10.0, 40.0, 30.0).unwrap();
        let set = propose(&reference, &prior, &context, 10, &config, &mut rng);
        set.cubes.iter().all(|c| {
            let d = c.dimensions();
            (0..3).all(|i| {
                d[i] >= config.min_dimension
                    && d[i] <= (mean + config.dimension_upper_stds[i] * std).max(config.min_dimension)
            })
        })
    }

    #[test]
    fn grid_center_projects_inside_shrunk_box() {
        // Without jitter, the grid points project back into the shrunk box.
        let intrinsics = camera();
        let shrunk = reference().shrunk(4.0);
        for (x, y) in stats::linspace(shrunk.x1(), shrunk.x2(), 8)
            .into_iter()
            .zip(stats::linspace(shrunk.y1(), shrunk.y2(), 8))
        {
            let p = intrinsics.back_project_along_ray(&Point2::new(x.trunc(), y.trunc()), 5.0);
            let pixel = intrinsics.project(&p).unwrap();
            assert!(shrunk.scaled(1.001).contains(&pixel));
        }
    }
}
