// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Ranking of sampled cuboid proposals against a reference 2D box
//! and an optional segmentation mask.

use itertools::Itertools;
use log::debug;
use std::cmp::Ordering;

use crate::core::box2d::Box2D;
use crate::core::camera::Intrinsics;
use crate::core::cube::Cube3D;
use crate::core::priors::DimensionPrior;
use crate::core::proposals::ProposalSet;
use crate::misc::type_aliases::{Float, Mask, Vec3};

/// Default aggressiveness of the S-curve mapping.
pub const DEFAULT_BETA: Float = 1.7;

/// S-shaped mapping of `[0, 1]` onto itself: `1 / (1 + (x / (1 - x))^-beta)`.
/// Non-positive inputs map to 0, inputs of at least 1 map to 1.
pub fn custom_mapping(x: Float, beta: Float) -> Float {
    if x <= 0.0 || x.is_nan() {
        0.0
    } else if x >= 1.0 {
        1.0
    } else {
        1.0 / (1.0 + (x / (1.0 - x)).powf(-beta))
    }
}

/// Intersection over union of two masks of the same shape, 0 otherwise.
#[allow(clippy::cast_precision_loss)]
pub fn mask_iou(a: &Mask, b: &Mask) -> Float {
    if a.shape() != b.shape() {
        return 0.0;
    }
    let (inter, union) = a
        .iter()
        .zip(b.iter())
        .fold((0usize, 0usize), |(i, u), (&x, &y)| {
            (i + usize::from(x && y), u + usize::from(x || y))
        });
    if union == 0 {
        0.0
    } else {
        inter as Float / union as Float
    }
}

/// Unnormalized Gaussian likelihood of the dimensions under the prior,
/// in `(0, 1]`. Axes with an unknown standard deviation are ignored.
pub fn dims_score(dimensions: &Vec3, prior: &DimensionPrior) -> Float {
    let sq: Float = (0..3)
        .filter(|&i| !prior.std[i].is_nan())
        .map(|i| ((dimensions[i] - prior.mean[i]) / prior.std[i]).powi(2))
        .sum();
    (-0.5 * sq).exp()
}

/// Individual and combined scores of one proposal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProposalScores {
    /// IoU of the projected box, clipped to the image, with the reference box.
    pub iou: Float,
    /// Mask IoU of the silhouette with the segmentation, if any.
    pub segmentation: Option<Float>,
    pub dimensions: Float,
    /// Product of the mapped IoU, the segmentation and the dimension scores.
    pub combined: Float,
}

/// Proposal index in its set with its scores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedProposal {
    pub index: usize,
    pub scores: ProposalScores,
}

/// Inputs shared by every proposal of a set.
#[derive(Debug, Clone, Copy)]
pub struct ScoringContext<'a> {
    pub intrinsics: &'a Intrinsics,
    pub width: usize,
    pub height: usize,
    pub mask: Option<&'a Mask>,
    pub prior: &'a DimensionPrior,
    pub beta: Float,
}

/// Score one cube against a reference box.
#[allow(clippy::cast_precision_loss)]
pub fn score(cube: &Cube3D, reference: &Box2D, context: &ScoringContext) -> ProposalScores {
    let (w, h) = (context.width as Float, context.height as Float);
    let iou = cube
        .projected_box(context.intrinsics)
        .map_or(0.0, |b| b.clip(w, h).iou(reference));
    let segmentation = context.mask.map(|mask| {
        let silhouette = cube
            .bube(context.intrinsics)
            .silhouette(mask.ncols(), mask.nrows());
        mask_iou(mask, &silhouette)
    });
    let dimensions = dims_score(cube.dimensions(), context.prior);
    let combined = custom_mapping(iou, context.beta) * segmentation.unwrap_or(1.0) * dimensions;
    ProposalScores {
        iou,
        segmentation,
        dimensions,
        combined,
    }
}

/// Rank the proposals of a set by decreasing combined score.
/// Equal scores keep the sampling order.
pub fn rank(set: &ProposalSet, context: &ScoringContext) -> Vec<RankedProposal> {
    let ranked: Vec<RankedProposal> = set
        .cubes
        .iter()
        .enumerate()
        .map(|(index, cube)| RankedProposal {
            index,
            scores: score(cube, &set.reference, context),
        })
        .sorted_by(|a, b| {
            b.scores
                .combined
                .partial_cmp(&a.scores.combined)
                .unwrap_or(Ordering::Equal)
        })
        .collect();
    if let Some(best) = ranked.first() {
        debug!(
            "best of {} proposals: #{} with {:?}",
            ranked.len(),
            best.index,
            best.scores
        );
    }
    ranked
}

// TESTS #############################################################
