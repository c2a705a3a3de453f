// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Cube head: pooled region features to raw outputs, and decoding of raw
//! outputs into physically valid cuboid parameters.
//!
//! Raw outputs are unconstrained. Decoding maps them into cuboid space:
//! a 2D center offset relative to the source box, a depth (see [`ZType`]),
//! strictly positive dimensions (see [`DimsType`]), a rotation built from
//! two columns, optionally allocentric, and an optional log-uncertainty.

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;
use std::str::FromStr;
use thiserror::Error;

use crate::core::box2d::Box2D;
use crate::core::camera::Intrinsics;
use crate::core::cube::Cube3D;
use crate::core::priors::{DepthCluster, DimensionPrior, Priors};
use crate::core::GeometryError;
use crate::math::so3;
use crate::misc::type_aliases::{Corners3, Float, Mat3, Point2, Vec2, Vec3, Vec6};

/// Largest raw dimension value before exponentiation.
const MAX_RAW_DIMENSION: Float = 5.0;

/// Upper bound of the depth in the sigmoid parametrization.
const SIGMOID_DEPTH_RANGE: Float = 100.0;

/// Smallest depth accepted when encoding with the log parametrization.
const MIN_LOG_DEPTH: Float = 0.01;

/// Standard deviation of the random initialization of a linear head.
const INIT_STD: Float = 0.001;

/// Errors of the cube head.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HeadError {
    #[error("expected features of dimension {expected}, got {got}")]
    FeatureDimension { expected: usize, got: usize },
    #[error("expected parameters of shape {expected:?}, got {got:?}")]
    ParameterShape {
        expected: (usize, usize),
        got: (usize, usize),
    },
    #[error("unknown cube head kind: {0}")]
    UnknownHead(String),
    #[error("unknown category: {0}")]
    UnknownCategory(usize),
    #[error("category {0} has no depth cluster")]
    NoDepthClusters(usize),
    #[error("degenerate rotation output")]
    DegenerateRotation,
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Parametrization of the predicted depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZType {
    /// Raw value.
    Direct,
    /// `100 * sigmoid(raw)`.
    Sigmoid,
    /// `exp(raw)`.
    Log,
    /// Sigmoid scaled into `[mean - 3 std, mean + 3 std]` of the depth
    /// cluster closest to the source box diagonal, lower bound clipped at 0.
    Clusters,
}

/// Parametrization of the predicted dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimsType {
    /// `exp(min(raw, 5))`, no prior.
    Exp,
    /// Sigmoid scaled into `[mean - 3 std, mean + 3 std]` of the category
    /// prior, lower bound clipped at 0.
    PriorSigmoid,
    /// `exp(min(raw, 5)) * mean` of the category prior.
    PriorExp,
}

/// Configuration of the cube head.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadConfig {
    pub z_type: ZType,
    pub dims_type: DimsType,
    /// Predicted rotations are relative to the viewing ray of the 2D center.
    pub allocentric_pose: bool,
    /// Depth is predicted for a virtual camera of focal `virtual_focal`.
    pub virtual_depth: bool,
    pub virtual_focal: Float,
    /// A log-uncertainty is predicted per instance.
    pub use_confidence: bool,
    /// Source boxes are scaled about their center by this factor before
    /// pooling, disabled if not strictly positive.
    pub scale_roi_boxes: Float,
}

impl Default for HeadConfig {
    fn default() -> Self {
        Self {
            z_type: ZType::Direct,
            dims_type: DimsType::PriorExp,
            allocentric_pose: true,
            virtual_depth: true,
            virtual_focal: 512.0,
            use_confidence: true,
            scale_roi_boxes: 0.0,
        }
    }
}

/// Layout of the raw output vector: one block per category holding
/// `[dx, dy, z_1 .. z_k, w, h, l, pose_1 .. pose_6, (uncertainty)]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLayout {
    pub nb_categories: usize,
    /// Number of depth outputs per category, at least 1.
    pub nb_depths: usize,
    pub with_uncertainty: bool,
}

impl OutputLayout {
    /// Layout for the given configuration and priors.
    pub fn new(config: &HeadConfig, priors: &Priors) -> Self {
        Self {
            nb_categories: priors.nb_categories(),
            nb_depths: priors.nb_clusters().max(1),
            with_uncertainty: config.use_confidence,
        }
    }

    /// Size of the block of one category.
    pub fn block_size(&self) -> usize {
        2 + self.nb_depths + 3 + 6 + usize::from(self.with_uncertainty)
    }

    /// Size of the whole output vector.
    pub fn output_size(&self) -> usize {
        self.nb_categories * self.block_size()
    }
}

/// Raw outputs of one category.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCategoryOutput {
    pub deltas: Vec2,
    /// One depth per cluster (a single one without clusters).
    pub depths: Vec<Float>,
    pub dimensions: Vec3,
    pub pose: Vec6,
    pub uncertainty: Option<Float>,
}

/// Raw outputs of every category for one region.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCubeOutput {
    pub categories: Vec<RawCategoryOutput>,
}

impl RawCubeOutput {
    /// Split a flat output vector following the layout.
    pub fn from_flat(flat: &DVector<Float>, layout: &OutputLayout) -> Self {
        let stride = layout.block_size();
        let categories = (0..layout.nb_categories)
            .map(|c| {
                let block = flat.rows(c * stride, stride);
                let k = layout.nb_depths;
                RawCategoryOutput {
                    deltas: Vec2::new(block[0], block[1]),
                    depths: block.rows(2, k).iter().cloned().collect(),
                    dimensions: Vec3::new(block[2 + k], block[3 + k], block[4 + k]),
                    pose: Vec6::from_iterator(block.rows(5 + k, 6).iter().cloned()),
                    uncertainty: if layout.with_uncertainty {
                        Some(block[11 + k])
                    } else {
                        None
                    },
                }
            })
            .collect();
        Self { categories }
    }
}

/// Capability interface of a cube head.
pub trait CubeHead {
    /// Pool the features of one region of a feature map
    /// (one matrix per channel) whose cells cover `stride` pixels.
    fn pool_features(
        &self,
        feature_map: &[DMatrix<Float>],
        region: &Box2D,
        stride: Float,
    ) -> DVector<Float>;

    /// Raw outputs for pooled features.
    fn predict(&self, features: &DVector<Float>) -> Result<RawCubeOutput, HeadError>;

    /// Layout of the raw outputs.
    fn layout(&self) -> &OutputLayout;
}

/// Average of each channel over the cells covered by a region.
/// A region covering no cell pools its nearest cell.
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
pub fn average_pool(feature_map: &[DMatrix<Float>], region: &Box2D, stride: Float) -> DVector<Float> {
    let mut pooled = DVector::zeros(feature_map.len());
    let (rows, cols) = match feature_map.first() {
        Some(channel) if !channel.is_empty() => channel.shape(),
        _ => return pooled,
    };
    let cell = |v: Float, max: usize| ((v / stride).max(0.0) as usize).min(max);
    let c1 = cell(region.x1(), cols - 1);
    let r1 = cell(region.y1(), rows - 1);
    let c2 = cell(region.x2().ceil(), cols).max(c1 + 1);
    let r2 = cell(region.y2().ceil(), rows).max(r1 + 1);
    for (value, channel) in pooled.iter_mut().zip(feature_map.iter()) {
        *value = channel.view((r1, c1), (r2 - r1, c2 - c1)).mean();
    }
    pooled
}

/// Cube head made of a single dense layer on average-pooled features.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearCubeHead {
    layout: OutputLayout,
    weights: DMatrix<Float>,
    bias: DVector<Float>,
}

impl LinearCubeHead {
    /// Head with given parameters, of shape `(output_size, feature_dim)`.
    pub fn new(
        layout: OutputLayout,
        weights: DMatrix<Float>,
        bias: DVector<Float>,
    ) -> Result<Self, HeadError> {
        let expected = (layout.output_size(), weights.ncols());
        if weights.nrows() != expected.0 {
            return Err(HeadError::ParameterShape {
                expected,
                got: weights.shape(),
            });
        }
        if bias.len() != expected.0 {
            return Err(HeadError::ParameterShape {
                expected: (expected.0, 1),
                got: bias.shape(),
            });
        }
        Ok(Self {
            layout,
            weights,
            bias,
        })
    }

    /// Head with small random weights and null bias.
    pub fn random<R: Rng>(layout: OutputLayout, feature_dim: usize, rng: &mut R) -> Self {
        let weights = DMatrix::from_fn(layout.output_size(), feature_dim, |_, _| {
            INIT_STD * rng.sample::<Float, _>(StandardNormal)
        });
        let bias = DVector::zeros(layout.output_size());
        Self {
            layout,
            weights,
            bias,
        }
    }

    pub fn feature_dim(&self) -> usize {
        self.weights.ncols()
    }
}

impl CubeHead for LinearCubeHead {
    fn pool_features(
        &self,
        feature_map: &[DMatrix<Float>],
        region: &Box2D,
        stride: Float,
    ) -> DVector<Float> {
        average_pool(feature_map, region, stride)
    }

    fn predict(&self, features: &DVector<Float>) -> Result<RawCubeOutput, HeadError> {
        if features.len() != self.feature_dim() {
            return Err(HeadError::FeatureDimension {
                expected: self.feature_dim(),
                got: features.len(),
            });
        }
        let flat = &self.weights * features + &self.bias;
        Ok(RawCubeOutput::from_flat(&flat, &self.layout))
    }

    fn layout(&self) -> &OutputLayout {
        &self.layout
    }
}

/// Kinds of cube heads known to the factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadKind {
    Linear,
}

impl FromStr for HeadKind {
    type Err = HeadError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(HeadKind::Linear),
            _ => Err(HeadError::UnknownHead(s.to_string())),
        }
    }
}

/// Build a randomly initialized cube head, resolved once from its name.
pub fn build_cube_head<R: Rng>(
    kind: &str,
    config: &HeadConfig,
    priors: &Priors,
    feature_dim: usize,
    rng: &mut R,
) -> Result<Box<dyn CubeHead>, HeadError> {
    let layout = OutputLayout::new(config, priors);
    match kind.parse::<HeadKind>()? {
        HeadKind::Linear => Ok(Box::new(LinearCubeHead::random(layout, feature_dim, rng))),
    }
}

// PARAMETRIZATIONS ##################################################

fn sigmoid(x: Float) -> Float {
    1.0 / (1.0 + (-x).exp())
}

/// Sigmoid rescaled into `[min, max]`.
pub fn scaled_sigmoid(x: Float, min: Float, max: Float) -> Float {
    min + (max - min) * sigmoid(x)
}

/// Scale converting a depth predicted for a virtual camera into a real depth.
///
/// `focal` and `image_height` belong to the real camera, `virtual_focal` and
/// `virtual_height` to the virtual one: `(focal * virtual_height) / (virtual_focal * image_height)`.
pub fn virtual_to_real(
    focal: Float,
    image_height: Float,
    virtual_focal: Float,
    virtual_height: Float,
) -> Float {
    (focal * virtual_height) / (virtual_focal * image_height)
}

/// `[mean - 3 std, mean + 3 std]`, lower bound clipped at 0.
/// An unknown (NaN) std collapses the range on the mean.
fn three_sigma_range(mean: Float, std: Float) -> (Float, Float) {
    let std = if std.is_nan() { 0.0 } else { std };
    ((mean - 3.0 * std).max(0.0), mean + 3.0 * std)
}

/// Decode a raw depth, returning `(depth, normalized depth)`.
pub fn decode_depth(z_type: ZType, raw: Float, cluster: Option<&DepthCluster>) -> (Float, Float) {
    match (z_type, cluster) {
        (ZType::Sigmoid, _) => {
            let norm = sigmoid(raw);
            (norm * SIGMOID_DEPTH_RANGE, norm)
        }
        (ZType::Log, _) => (raw.exp(), raw),
        (ZType::Clusters, Some(c)) => {
            let (min, max) = three_sigma_range(c.mean, c.std);
            (scaled_sigmoid(raw, min, max), raw)
        }
        (ZType::Direct, _) | (ZType::Clusters, None) => (raw, raw),
    }
}

/// Encode a ground-truth depth into the normalized depth space.
pub fn encode_depth(z_type: ZType, z: Float, cluster: Option<&DepthCluster>) -> Float {
    match (z_type, cluster) {
        (ZType::Sigmoid, _) => (z / SIGMOID_DEPTH_RANGE).max(0.0).min(1.0),
        (ZType::Log, _) => z.max(MIN_LOG_DEPTH).ln(),
        (ZType::Clusters, Some(c)) => (z - c.mean) / c.std,
        (ZType::Direct, _) | (ZType::Clusters, None) => z,
    }
}

/// Decode raw dimensions.
pub fn decode_dimensions(dims_type: DimsType, raw: &Vec3, prior: &DimensionPrior) -> Vec3 {
    match dims_type {
        DimsType::Exp => raw.map(|r| r.min(MAX_RAW_DIMENSION).exp()),
        DimsType::PriorExp => raw
            .map(|r| r.min(MAX_RAW_DIMENSION).exp())
            .component_mul(&prior.mean),
        DimsType::PriorSigmoid => Vec3::from_fn(|i, _| {
            let (min, max) = three_sigma_range(prior.mean[i], prior.std[i]);
            scaled_sigmoid(raw[i], min, max)
        }),
    }
}

// DECODING ##########################################################

/// Geometry of one image as seen by the head.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageGeometry {
    /// Intrinsics at the original image resolution.
    pub intrinsics: Intrinsics,
    /// Original resolution over network resolution.
    pub image_ratio: Float,
    /// Image size at network resolution.
    pub width: usize,
    pub height: usize,
}

impl ImageGeometry {
    /// Intrinsics at network resolution.
    pub fn scaled_intrinsics(&self) -> Intrinsics {
        self.intrinsics.scaled(1.0 / self.image_ratio)
    }

    /// Depth scale of the virtual camera.
    #[allow(clippy::cast_precision_loss)]
    pub fn virtual_to_real(&self, virtual_focal: Float) -> Float {
        let height = self.height as Float;
        virtual_to_real(
            self.intrinsics.focal.1,
            height * self.image_ratio,
            virtual_focal,
            height,
        )
    }
}

/// Decoded prediction of one region.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedCube {
    pub category: usize,
    pub cube: Cube3D,
    /// Projected center at network resolution.
    pub center_2d: Point2,
    /// Depth in the normalized space of the z parametrization.
    pub z_norm: Float,
    /// Rotation as predicted, before the allocentric correction.
    pub allocentric_rotation: Option<Mat3>,
    pub uncertainty: Option<Float>,
    pub cluster: Option<usize>,
}

impl DecodedCube {
    /// Confidence `exp(-uncertainty)`, if an uncertainty is predicted.
    pub fn confidence(&self) -> Option<Float> {
        self.uncertainty.map(|u| (-u).exp())
    }
}

/// Decodes raw outputs with a configuration and priors.
#[derive(Debug, Clone, Copy)]
pub struct CubeDecoder<'a> {
    pub config: &'a HeadConfig,
    pub priors: &'a Priors,
}

impl<'a> CubeDecoder<'a> {
    pub fn new(config: &'a HeadConfig, priors: &'a Priors) -> Self {
        Self { config, priors }
    }

    /// Depth cluster of a category closest to a box diagonal.
    pub fn cluster_for(&self, category: usize, source_box: &Box2D) -> Option<(usize, &'a DepthCluster)> {
        self.priors.closest_cluster(category, source_box.diagonal())
    }

    /// Decode the outputs of the category of a source box.
    pub fn decode(
        &self,
        raw: &RawCubeOutput,
        source_box: &Box2D,
        category: usize,
        image: &ImageGeometry,
    ) -> Result<DecodedCube, HeadError> {
        let output = raw
            .categories
            .get(category)
            .ok_or(HeadError::UnknownCategory(category))?;
        let prior = self
            .priors
            .dimensions(category)
            .ok_or(HeadError::UnknownCategory(category))?;
        let cluster = self.cluster_for(category, source_box);
        if self.config.z_type == ZType::Clusters && cluster.is_none() {
            return Err(HeadError::NoDepthClusters(category));
        }

        // 2D center.
        let center = source_box.center();
        let center_2d = Point2::new(
            center.x + source_box.width() * output.deltas.x,
            center.y + source_box.height() * output.deltas.y,
        );

        // Depth.
        let index = cluster.map(|(i, _)| i);
        let raw_z = index
            .and_then(|i| output.depths.get(i))
            .or_else(|| output.depths.first())
            .cloned()
            .unwrap_or(0.0);
        let (mut z, z_norm) = decode_depth(self.config.z_type, raw_z, cluster.map(|(_, c)| c));
        if self.config.virtual_depth {
            z *= image.virtual_to_real(self.config.virtual_focal);
        }

        let dimensions = decode_dimensions(self.config.dims_type, &output.dimensions, prior);

        // Rotation.
        let predicted = so3::from_two_columns(&output.pose).ok_or(HeadError::DegenerateRotation)?;
        let intrinsics = image.scaled_intrinsics();
        let (rotation, allocentric_rotation) = if self.config.allocentric_pose {
            let ego = intrinsics.egocentric_from_allocentric(&center_2d, &predicted);
            (ego, Some(predicted))
        } else {
            (predicted, None)
        };

        let cube = Cube3D::new(intrinsics.back_project(&center_2d, z), dimensions, rotation)?;
        Ok(DecodedCube {
            category,
            cube,
            center_2d,
            z_norm,
            allocentric_rotation,
            uncertainty: output.uncertainty,
            cluster: index,
        })
    }

    /// Pool, predict and decode every region of one image.
    /// Regions whose decoding fails are logged and returned as errors,
    /// keeping the index correspondence with the input regions.
    pub fn forward(
        &self,
        head: &dyn CubeHead,
        feature_map: &[DMatrix<Float>],
        stride: Float,
        regions: &[(Box2D, usize)],
        image: &ImageGeometry,
    ) -> Vec<Result<DecodedCube, HeadError>> {
        regions
            .iter()
            .map(|(source_box, category)| {
                let pooled_box = if self.config.scale_roi_boxes > 0.0 {
                    source_box.scaled(self.config.scale_roi_boxes)
                } else {
                    *source_box
                };
                let features = head.pool_features(feature_map, &pooled_box, stride);
                let decoded = head
                    .predict(&features)
                    .and_then(|raw| self.decode(&raw, source_box, *category, image));
                if let Err(err) = &decoded {
                    warn!("cannot decode region {:?}: {}", source_box, err);
                }
                decoded
            })
            .collect()
    }
}

// INFERENCE #########################################################

/// Final per-instance output.
#[derive(Debug, Clone, PartialEq)]
pub struct CubePrediction {
    pub category: usize,
    pub cube: Cube3D,
    /// Projected center at the original image resolution.
    pub center_2d: Point2,
    pub corners: Corners3,
    pub score: Float,
}

/// Build the inference output of a decoded cube.
///
/// The score is `sqrt(detection_score * confidence)` when both exist,
/// otherwise whichever exists, otherwise 1.
pub fn to_prediction(
    decoded: &DecodedCube,
    detection_score: Option<Float>,
    image: &ImageGeometry,
) -> CubePrediction {
    let score = match (detection_score, decoded.confidence()) {
        (Some(s), Some(c)) => (s * c).sqrt(),
        (Some(s), None) => s,
        (None, Some(c)) => c,
        (None, None) => 1.0,
    };
    debug!("prediction score {} for category {}", score, decoded.category);
    CubePrediction {
        category: decoded.category,
        cube: decoded.cube,
        center_2d: decoded.center_2d * image.image_ratio,
        corners: decoded.cube.corners(),
        score,
    }
}

// TESTS #############################################################
