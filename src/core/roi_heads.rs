// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! ROI heads orchestrator: proposal labeling, cube head forward pass,
//! weakly supervised losses and inference outputs for a batch of images.
//!
//! Images are processed independently (ground plane fit, proposal labeling)
//! and instances keep their correspondence with their matched ground truth
//! from decoding to loss computation.

use log::{debug, warn};
use nalgebra::DMatrix;
use rand::Rng;

use crate::core::box2d::Box2D;
use crate::core::camera::Intrinsics;
use crate::core::cube::Cube3D;
use crate::core::depth::DepthMap;
use crate::core::head::{self, CubeDecoder, CubeHead, CubePrediction, DecodedCube, HeadConfig, ImageGeometry};
use crate::core::losses::{self, Diagnostics, InstanceLosses, LossConfig, LossReport, LossTerm};
use crate::core::plane::{self, GroundEstimate, PlaneFitConfig};
use crate::core::priors::Priors;
use crate::core::GeometryError;
use crate::math::stats;
use crate::misc::type_aliases::{Float, Mask, Mat3, Point2, Vec3};

/// 3D part of a ground-truth record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundTruth3D {
    /// Projected center in pixels, at network resolution.
    pub projected_center: Point2,
    pub depth: Float,
    pub dimensions: Vec3,
    pub rotation: Mat3,
}

impl GroundTruth3D {
    /// Cuboid obtained by back-projecting the projected center.
    pub fn cube(&self, intrinsics: &Intrinsics) -> Result<Cube3D, GeometryError> {
        Cube3D::from_projected_center(
            intrinsics,
            &self.projected_center,
            self.depth,
            self.dimensions,
            self.rotation,
        )
    }
}

/// Ground-truth record of one object.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundTruth {
    /// Negative categories mark ignore regions.
    pub category: i32,
    pub box2d: Box2D,
    pub box3d: Option<GroundTruth3D>,
}

impl GroundTruth {
    pub fn is_ignore(&self) -> bool {
        self.category < 0
    }

    #[allow(clippy::cast_sign_loss)]
    pub fn category_id(&self) -> Option<usize> {
        if self.is_ignore() {
            None
        } else {
            Some(self.category as usize)
        }
    }
}

/// Label of a proposal after matching with the ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalLabel {
    /// Matched with the target of this index.
    Foreground(usize),
    Background,
    /// Background inside an ignore region.
    Ignored,
}

/// Thresholds of the proposal matching.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchConfig {
    /// Smallest IoU of a foreground proposal with its target.
    pub foreground_iou: Float,
    /// Smallest intersection over proposal area with an ignore region
    /// for a background proposal to be ignored.
    pub ignore_thresh: Float,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            foreground_iou: 0.5,
            ignore_thresh: 0.5,
        }
    }
}

/// Match proposals with the targets of one image.
///
/// Each proposal is foreground for the valid target of best IoU if that IoU
/// reaches the threshold, background otherwise. When the image has ignore
/// regions and more than one background proposal, background proposals
/// mostly inside an ignore region are labeled ignored.
pub fn label_proposals(
    proposals: &[Box2D],
    targets: &[GroundTruth],
    config: &MatchConfig,
) -> Vec<ProposalLabel> {
    let mut labels: Vec<ProposalLabel> = proposals
        .iter()
        .map(|proposal| {
            let best = targets
                .iter()
                .enumerate()
                .filter(|(_, t)| !t.is_ignore())
                .map(|(i, t)| (i, t.box2d.iou(proposal)))
                .fold(None, |best: Option<(usize, Float)>, (i, iou)| match best {
                    Some((_, b)) if b >= iou => best,
                    _ => Some((i, iou)),
                });
            match best {
                Some((i, iou)) if iou >= config.foreground_iou => ProposalLabel::Foreground(i),
                _ => ProposalLabel::Background,
            }
        })
        .collect();

    let ignore_regions: Vec<&Box2D> = targets
        .iter()
        .filter(|t| t.is_ignore())
        .map(|t| &t.box2d)
        .collect();
    let nb_background = labels
        .iter()
        .filter(|&&l| l == ProposalLabel::Background)
        .count();
    if !ignore_regions.is_empty() && nb_background > 1 {
        for (label, proposal) in labels.iter_mut().zip(proposals.iter()) {
            if *label != ProposalLabel::Background {
                continue;
            }
            let max_ioa = ignore_regions
                .iter()
                .map(|region| region.ioa(proposal))
                .fold(0.0, Float::max);
            if max_ioa >= config.ignore_thresh {
                *label = ProposalLabel::Ignored;
            }
        }
    }
    labels
}

/// Configuration of the whole ROI heads.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RoiHeadsConfig {
    pub head: HeadConfig,
    pub losses: LossConfig,
    pub matching: MatchConfig,
    pub plane: PlaneFitConfig,
}

/// One training image with its oracle outputs.
#[derive(Debug, Clone, Copy)]
pub struct TrainingImage<'a> {
    pub geometry: ImageGeometry,
    /// Feature map, one matrix per channel.
    pub features: &'a [DMatrix<Float>],
    /// Pixels covered by a feature cell.
    pub stride: Float,
    pub proposals: &'a [Box2D],
    pub targets: &'a [GroundTruth],
    pub depth: Option<&'a DepthMap>,
    pub ground_mask: Option<&'a Mask>,
    /// One object mask per target, in the order of `targets`.
    pub object_masks: Option<&'a [Mask]>,
}

/// Detection given to the inference forward pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub box2d: Box2D,
    pub category: usize,
    pub score: Option<Float>,
}

/// One inference image.
#[derive(Debug, Clone, Copy)]
pub struct InferenceImage<'a> {
    pub geometry: ImageGeometry,
    pub features: &'a [DMatrix<Float>],
    pub stride: Float,
    pub detections: &'a [Detection],
}

/// Decoded foreground proposal with its matched ground truth.
struct Instance<'a> {
    image: usize,
    target_index: usize,
    target: &'a GroundTruth,
    decoded: DecodedCube,
    projected: Option<Box2D>,
}

/// Cube head and losses, with the immutable priors.
pub struct RoiHeads<'a> {
    pub config: RoiHeadsConfig,
    pub priors: &'a Priors,
    head: Box<dyn CubeHead>,
}

impl<'a> RoiHeads<'a> {
    pub fn new(config: RoiHeadsConfig, priors: &'a Priors, head: Box<dyn CubeHead>) -> Self {
        Self {
            config,
            priors,
            head,
        }
    }

    fn decoder(&self) -> CubeDecoder {
        CubeDecoder::new(&self.config.head, self.priors)
    }

    /// Inference forward pass: one prediction per successfully decoded
    /// detection, per image.
    pub fn forward_inference(&self, images: &[InferenceImage]) -> Vec<Vec<CubePrediction>> {
        let decoder = self.decoder();
        images
            .iter()
            .map(|image| {
                let regions: Vec<(Box2D, usize)> = image
                    .detections
                    .iter()
                    .map(|d| (d.box2d, d.category))
                    .collect();
                decoder
                    .forward(self.head.as_ref(), image.features, image.stride, &regions, &image.geometry)
                    .into_iter()
                    .zip(image.detections.iter())
                    .filter_map(|(decoded, detection)| {
                        decoded
                            .ok()
                            .map(|d| head::to_prediction(&d, detection.score, &image.geometry))
                    })
                    .collect()
            })
            .collect()
    }

    /// Training forward pass: predictions of the foreground proposals of each
    /// image and the loss report of the batch.
    pub fn forward_training<R: Rng>(
        &self,
        images: &[TrainingImage],
        rng: &mut R,
    ) -> (Vec<Vec<CubePrediction>>, LossReport) {
        let decoder = self.decoder();
        let loss_config = &self.config.losses;
        let needs_ground =
            loss_config.enabled(LossTerm::PoseGround) || loss_config.enabled(LossTerm::PoseGround2);

        let mut instances: Vec<Instance> = Vec::new();
        let mut grounds: Vec<GroundEstimate> = Vec::with_capacity(images.len());
        let mut predictions = Vec::with_capacity(images.len());
        for (image_index, image) in images.iter().enumerate() {
            let intrinsics = image.geometry.scaled_intrinsics();
            grounds.push(match (needs_ground, image.depth) {
                (true, Some(depth)) => plane::ground_normal(
                    depth,
                    image.ground_mask,
                    &intrinsics,
                    &self.config.plane,
                    rng,
                ),
                _ => GroundEstimate::failed(),
            });

            let labels = label_proposals(image.proposals, image.targets, &self.config.matching);
            let foreground: Vec<(Box2D, usize, usize)> = labels
                .iter()
                .zip(image.proposals.iter())
                .filter_map(|(label, proposal)| match label {
                    ProposalLabel::Foreground(t) => image.targets[*t]
                        .category_id()
                        .map(|category| (*proposal, category, *t)),
                    _ => None,
                })
                .collect();
            debug!(
                "image {}: {} foreground, {} ignored out of {} proposals",
                image_index,
                foreground.len(),
                labels.iter().filter(|&&l| l == ProposalLabel::Ignored).count(),
                labels.len()
            );

            let regions: Vec<(Box2D, usize)> = foreground.iter().map(|&(b, c, _)| (b, c)).collect();
            let decoded = decoder.forward(
                self.head.as_ref(),
                image.features,
                image.stride,
                &regions,
                &image.geometry,
            );
            let (width, height) = (image.geometry.width as Float, image.geometry.height as Float);
            let mut image_predictions = Vec::new();
            for (decoded, &(_, _, target_index)) in decoded.into_iter().zip(foreground.iter()) {
                if let Ok(decoded) = decoded {
                    image_predictions.push(head::to_prediction(&decoded, None, &image.geometry));
                    let projected = decoded
                        .cube
                        .projected_box(&intrinsics)
                        .map(|b| b.clip(width, height));
                    instances.push(Instance {
                        image: image_index,
                        target_index,
                        target: &image.targets[target_index],
                        decoded,
                        projected,
                    });
                }
            }
            predictions.push(image_predictions);
        }

        let report = self.losses(images, &grounds, &instances);
        (predictions, report)
    }

    /// Compute every enabled term, then weight and reduce them.
    #[allow(clippy::cast_precision_loss)]
    fn losses(
        &self,
        images: &[TrainingImage],
        grounds: &[GroundEstimate],
        instances: &[Instance],
    ) -> LossReport {
        let config = &self.config.losses;
        let n = instances.len();
        let mut terms = InstanceLosses::default();
        if n == 0 {
            debug!("no foreground instance in the batch");
            return LossReport {
                losses: Default::default(),
                diagnostics: Diagnostics::default(),
            };
        }
        let intrinsics: Vec<Intrinsics> = images
            .iter()
            .map(|image| image.geometry.scaled_intrinsics())
            .collect();
        let mask_of = |inst: &Instance| {
            images[inst.image]
                .object_masks
                .and_then(|masks| masks.get(inst.target_index))
        };

        if config.enabled(LossTerm::Iou) {
            terms.iou = Some(per_instance(instances, |inst| {
                losses::iou(inst.projected.as_ref(), &inst.target.box2d)
            }));
        }

        if config.enabled(LossTerm::PoseAlignment) {
            let mut per_image: Vec<Vec<Mat3>> = vec![Vec::new(); images.len()];
            for inst in instances.iter() {
                per_image[inst.image].push(*inst.decoded.cube.rotation());
            }
            terms.pose = losses::pose_alignment(&per_image).map(|loss| vec![loss; n]);
        }

        if config.enabled(LossTerm::PoseGround2) {
            terms.normal_vec = Some(per_instance(instances, |inst| {
                let ground = &grounds[inst.image];
                losses::pose_ground_rotation(
                    inst.decoded.cube.rotation(),
                    &ground.normal,
                    ground.validity.weight(),
                )
            }));
        } else if config.enabled(LossTerm::PoseGround) {
            terms.normal_vec = Some(per_instance(instances, |inst| {
                let ground = &grounds[inst.image];
                losses::pose_ground(
                    inst.decoded.cube.rotation(),
                    &ground.normal,
                    ground.validity.weight(),
                )
            }));
        }

        let has_depth = images.iter().any(|image| image.depth.is_some());
        if config.enabled(LossTerm::ZPseudoGtPatch) || config.enabled(LossTerm::ZPseudoGtCenter) {
            if has_depth {
                let patch = config.enabled(LossTerm::ZPseudoGtPatch);
                terms.pseudo_gt_z = Some(per_instance(instances, |inst| {
                    let depth = match images[inst.image].depth {
                        Some(depth) => depth,
                        None => return Float::NAN,
                    };
                    let target = match (patch, inst.projected.as_ref()) {
                        (true, Some(projected)) => losses::z_pseudo_gt_patch(depth, projected),
                        _ => losses::z_pseudo_gt_center(depth, &inst.decoded.center_2d),
                    };
                    losses::smooth_l1(inst.decoded.cube.center().z, target, 0.0)
                }));
            } else {
                debug!("pseudo ground-truth z skipped, no depth map");
            }
        }

        if config.enabled(LossTerm::Segmentation) {
            if instances.iter().any(|inst| mask_of(inst).is_some()) {
                terms.seg = Some(per_instance(instances, |inst| match mask_of(inst) {
                    Some(mask) => {
                        let silhouette = inst
                            .decoded
                            .cube
                            .bube(&intrinsics[inst.image])
                            .silhouette(mask.ncols(), mask.nrows());
                        losses::segmentation(config.segmentation, mask, &silhouette)
                    }
                    None => Float::NAN,
                }));
            } else {
                debug!("segmentation skipped, no object mask");
            }
        }

        if config.enabled(LossTerm::Z) {
            terms.z = Some(per_instance(instances, |inst| {
                let geometry = &images[inst.image].geometry;
                losses::z_scan(
                    &inst.decoded.cube,
                    &inst.target.box2d,
                    &intrinsics[inst.image],
                    geometry.width,
                    geometry.height,
                )
            }));
        }

        if config.enabled(LossTerm::Dims) {
            let dims: Option<Vec<Vec3>> = instances
                .iter()
                .map(|inst| {
                    let prior = self.priors.dimensions(inst.decoded.category)?;
                    losses::dims(inst.decoded.cube.dimensions(), prior)
                })
                .collect();
            match dims {
                Some(dims) => {
                    terms.dims_w = Some(dims.iter().map(|d| d.x).collect());
                    terms.dims_h = Some(dims.iter().map(|d| d.y).collect());
                    terms.dims_l = Some(dims.iter().map(|d| d.z).collect());
                }
                None => debug!("dimension loss skipped, unknown prior std"),
            }
        }

        if config.enabled(LossTerm::Depth) {
            if has_depth {
                terms.depth = Some(per_instance(instances, |inst| match images[inst.image].depth {
                    Some(depth) => {
                        losses::depth_range(depth, mask_of(inst), &inst.target.box2d, &inst.decoded.cube)
                    }
                    None => Float::NAN,
                }));
            } else {
                debug!("depth range skipped, no depth map");
            }
        }

        // Weighting and reduction.
        let uncertainties: Option<Vec<Float>> =
            instances.iter().map(|inst| inst.decoded.uncertainty).collect();
        let gt_cubes: Vec<Option<Cube3D>> = instances
            .iter()
            .map(|inst| {
                inst.target
                    .box3d
                    .and_then(|gt| gt.cube(&intrinsics[inst.image]).ok())
            })
            .collect();
        let depths: Vec<Float> = instances
            .iter()
            .zip(gt_cubes.iter())
            .map(|(inst, gt)| gt.as_ref().unwrap_or(&inst.decoded.cube).center().z)
            .collect();
        let reduced = terms.reduce(config, uncertainties.as_deref(), &depths);

        let mut diagnostics = diagnostics(instances, &gt_cubes);
        diagnostics.total_3d_loss = reduced.total_3d;
        if reduced.losses.values().any(|v| !v.is_finite()) {
            warn!("non finite reduced loss: {:?}", reduced.losses);
        }
        LossReport {
            losses: reduced.losses,
            diagnostics,
        }
    }
}

fn per_instance<F: Fn(&Instance) -> Float>(instances: &[Instance], f: F) -> Vec<Float> {
    instances.iter().map(f).collect()
}

/// Tracking errors against the 3D ground truth, when available.
#[allow(clippy::cast_precision_loss)]
fn diagnostics(instances: &[Instance], gt_cubes: &[Option<Cube3D>]) -> Diagnostics {
    let ious: Vec<Float> = instances
        .iter()
        .map(|inst| inst.projected.map_or(0.0, |p| p.iou(&inst.target.box2d)))
        .collect();
    let mut z_errors = Vec::new();
    let mut dims_errors = Vec::new();
    let mut xy_errors = Vec::new();
    for (inst, gt) in instances.iter().zip(gt_cubes.iter()) {
        let (gt, record) = match (gt, inst.target.box3d) {
            (Some(gt), Some(record)) => (gt, record),
            _ => continue,
        };
        let cube = &inst.decoded.cube;
        z_errors.push((cube.center().z - gt.center().z).abs());
        dims_errors.push((cube.dimensions() - gt.dimensions()).abs().mean());
        xy_errors.push((inst.decoded.center_2d - record.projected_center).abs().mean());
    }
    let z_close = if z_errors.is_empty() {
        None
    } else {
        let close = z_errors
            .iter()
            .filter(|&&e| e < losses::Z_CLOSE_THRESHOLD)
            .count();
        Some(close as Float / z_errors.len() as Float)
    };
    Diagnostics {
        iou_2d: stats::finite_mean(&ious),
        z_error: stats::finite_mean(&z_errors),
        dims_error: stats::finite_mean(&dims_errors),
        xy_error: stats::finite_mean(&xy_errors),
        z_close,
        total_3d_loss: None,
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use crate::core::head::{LinearCubeHead, OutputLayout};
    use approx;
    use nalgebra::DVector;
    use rand::{rngs::StdRng, SeedableRng};

    fn bx(x1: Float, y1: Float, x2: Float, y2: Float) -> Box2D {
        Box2D::new(x1, y1, x2, y2).unwrap()
    }

    fn target(category: i32, b: Box2D) -> GroundTruth {
        GroundTruth {
            category,
            box2d: b,
            box3d: None,
        }
    }

    #[test]
    fn proposals_labels() {
        let targets = vec![target(0, bx(0.0, 0.0, 10.0, 10.0)), target(-1, bx(50.0, 50.0, 100.0, 100.0))];
        let proposals = vec![
            bx(0.0, 0.0, 10.0, 9.0),
            bx(20.0, 20.0, 30.0, 30.0),
            bx(60.0, 60.0, 70.0, 70.0),
        ];
        let labels = label_proposals(&proposals, &targets, &MatchConfig::default());
        assert_eq!(
            vec![
                ProposalLabel::Foreground(0),
                ProposalLabel::Background,
                ProposalLabel::Ignored
            ],
            labels
        );
        // A single background proposal is never ignored.
        let labels = label_proposals(&proposals[..1], &targets, &MatchConfig::default());
        assert_eq!(vec![ProposalLabel::Foreground(0)], labels);
        let labels = label_proposals(&proposals[2..], &targets, &MatchConfig::default());
        assert_eq!(vec![ProposalLabel::Background], labels);
        // Without ignore regions nothing is ignored.
        let labels = label_proposals(&proposals, &targets[..1], &MatchConfig::default());
        assert_eq!(ProposalLabel::Background, labels[2]);
    }

    const PRIORS: &str = r#"{ "categories": [
        { "name": "box",
          "dimensions": { "mean": [1.0, 1.0, 1.0], "std": [0.1, 0.1, 0.1] } } ] }"#;

    fn geometry() -> ImageGeometry {
        ImageGeometry {
            intrinsics: Intrinsics::new(500.0, 500.0, 320.0, 240.0),
            image_ratio: 1.0,
            width: 640,
            height: 480,
        }
    }

    /// Head predicting a unit cube at depth 5 in front of the source box center.
    fn constant_head(config: &HeadConfig, priors: &Priors) -> Box<dyn CubeHead> {
        let layout = OutputLayout::new(config, priors);
        let mut bias = DVector::zeros(layout.output_size());
        bias[2] = 5.0; // depth
        bias[6] = 1.0; // first pose column
        bias[10] = 1.0; // second pose column
        let weights = DMatrix::zeros(layout.output_size(), 2);
        Box::new(LinearCubeHead::new(layout, weights, bias).unwrap())
    }

    fn config() -> RoiHeadsConfig {
        let mut config = RoiHeadsConfig::default();
        config.head.virtual_depth = false;
        config.losses.use_confidence = 1.0;
        config
    }

    #[test]
    fn training_on_exact_prediction() {
        let _ = env_logger::builder().is_test(true).try_init();
        let priors = Priors::from_json(PRIORS).unwrap();
        let config = config();
        let heads = RoiHeads::new(config.clone(), &priors, constant_head(&config.head, &priors));
        let intrinsics = geometry().intrinsics;
        let truth = Cube3D::new(
            crate::misc::type_aliases::Point3::new(0.0, 0.0, 5.0),
            Vec3::new(1.0, 1.0, 1.0),
            Mat3::identity(),
        )
        .unwrap();
        let gt_box = truth.projected_box(&intrinsics).unwrap();
        let targets = vec![GroundTruth {
            category: 0,
            box2d: gt_box,
            box3d: Some(GroundTruth3D {
                projected_center: Point2::new(320.0, 240.0),
                depth: 5.0,
                dimensions: Vec3::new(1.0, 1.0, 1.0),
                rotation: Mat3::identity(),
            }),
        }];
        let proposals = vec![gt_box, bx(0.0, 0.0, 20.0, 20.0)];
        let features = vec![DMatrix::from_element(60, 80, 1.0); 2];
        let depth = DepthMap::new(DMatrix::from_element(480, 640, 5.0));
        let image = TrainingImage {
            geometry: geometry(),
            features: &features,
            stride: 8.0,
            proposals: &proposals,
            targets: &targets,
            depth: Some(&depth),
            ground_mask: None,
            object_masks: None,
        };
        let mut rng = StdRng::seed_from_u64(0);
        let (predictions, report) = heads.forward_training(&[image], &mut rng);

        assert_eq!(1, predictions.len());
        assert_eq!(1, predictions[0].len());
        approx::assert_abs_diff_eq!(0.0, report.get("loss_iou").unwrap(), epsilon = 1e-4);
        approx::assert_abs_diff_eq!(0.0, report.get("loss_z").unwrap());
        approx::assert_abs_diff_eq!(0.0, report.get("loss_dims_h").unwrap(), epsilon = 1e-4);
        approx::assert_abs_diff_eq!(0.0, report.get("loss_normal_vec").unwrap(), epsilon = 1e-3);
        // Flat depth: null depth range against a unit extent, weighted by sqrt(2).
        approx::assert_relative_eq!(
            std::f32::consts::SQRT_2,
            report.get("loss_depth").unwrap(),
            epsilon = 1e-4
        );
        assert_eq!(Some(0.0), report.get("uncert"));
        // Single instance: no pose alignment. No mask: no segmentation.
        assert_eq!(None, report.get("loss_pose"));
        assert_eq!(None, report.get("loss_seg"));
        let diagnostics = report.diagnostics;
        approx::assert_abs_diff_eq!(0.0, diagnostics.z_error.unwrap(), epsilon = 1e-4);
        approx::assert_relative_eq!(1.0, diagnostics.iou_2d.unwrap(), epsilon = 1e-4);
        assert_eq!(Some(1.0), diagnostics.z_close);
        assert!(diagnostics.total_3d_loss.unwrap().is_finite());
    }

    #[test]
    fn training_without_foreground_reports_nothing() {
        let priors = Priors::from_json(PRIORS).unwrap();
        let config = config();
        let heads = RoiHeads::new(config.clone(), &priors, constant_head(&config.head, &priors));
        let features = vec![DMatrix::from_element(60, 80, 1.0); 2];
        let proposals = vec![bx(0.0, 0.0, 20.0, 20.0)];
        let image = TrainingImage {
            geometry: geometry(),
            features: &features,
            stride: 8.0,
            proposals: &proposals,
            targets: &[],
            depth: None,
            ground_mask: None,
            object_masks: None,
        };
        let mut rng = StdRng::seed_from_u64(0);
        let (predictions, report) = heads.forward_training(&[image], &mut rng);
        assert!(predictions[0].is_empty());
        assert!(report.losses.is_empty());
        assert_eq!(0.0, report.total());
    }

    #[test]
    fn inference_merges_scores() {
        let priors = Priors::from_json(PRIORS).unwrap();
        let config = config();
        let heads = RoiHeads::new(config.clone(), &priors, constant_head(&config.head, &priors));
        let features = vec![DMatrix::from_element(60, 80, 1.0); 2];
        let detections = vec![
            Detection {
                box2d: bx(270.0, 190.0, 370.0, 290.0),
                category: 0,
                score: Some(0.81),
            },
            Detection {
                box2d: bx(270.0, 190.0, 370.0, 290.0),
                category: 4,
                score: Some(0.5),
            },
        ];
        let image = InferenceImage {
            geometry: geometry(),
            features: &features,
            stride: 8.0,
            detections: &detections,
        };
        let predictions = heads.forward_inference(&[image]);
        assert_eq!(1, predictions[0].len());
        let prediction = &predictions[0][0];
        approx::assert_relative_eq!(0.9, prediction.score, epsilon = 1e-6);
        approx::assert_relative_eq!(Point2::new(320.0, 240.0), prediction.center_2d);
        approx::assert_relative_eq!(5.0, prediction.cube.center().z);
    }
}
