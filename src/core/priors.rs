// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per-category priors: dimension statistics and depth clusters.
//!
//! Priors are built once, validated, and then only read.
//! The JSON layout is:
//!
//! ```json
//! { "categories": [
//!     { "name": "chair",
//!       "dimensions": { "mean": [0.5, 0.9, 0.5], "std": [0.1, 0.2, null] },
//!       "depth_clusters": [ { "scale": 150.0, "mean": 3.0, "std": 1.0 } ] } ] }
//! ```
//!
//! A `null` standard deviation means unknown and is stored as NaN.

use serde::{Deserialize, Serialize};
use std::{fs, io, path::Path};
use thiserror::Error;

use crate::misc::type_aliases::{Float, Vec3};

/// Errors when loading or validating priors.
#[derive(Debug, Error)]
pub enum PriorsError {
    #[error("cannot read priors: {0}")]
    Io(#[from] io::Error),
    #[error("cannot parse priors: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no category in priors")]
    Empty,
    #[error("category {0}: mean dimensions must be strictly positive")]
    NonPositiveMean(String),
    #[error("category {0}: standard deviations must be strictly positive or unknown")]
    NonPositiveStd(String),
    #[error("category {name}: expected {expected} depth clusters, got {got}")]
    ClusterCountMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
}

/// Mean and standard deviation of `(w, h, l)` for one category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimensionPrior {
    pub mean: Vec3,
    /// NaN entries are unknown.
    pub std: Vec3,
}

impl DimensionPrior {
    /// True if some standard deviation is unknown.
    pub fn has_unknown_std(&self) -> bool {
        self.std.iter().any(|s| s.is_nan())
    }
}

/// Depth statistics of the objects of a category whose 2D box diagonal
/// is close to `scale` pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthCluster {
    pub scale: Float,
    pub mean: Float,
    pub std: Float,
}

/// All priors of one category.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryPriors {
    pub name: String,
    pub dimensions: DimensionPrior,
    pub depth_clusters: Vec<DepthCluster>,
}

/// Priors of every category, indexed by category id.
#[derive(Debug, Clone, PartialEq)]
pub struct Priors {
    categories: Vec<CategoryPriors>,
}

#[derive(Serialize, Deserialize)]
struct DimensionsFile {
    mean: [Float; 3],
    std: [Option<Float>; 3],
}

#[derive(Serialize, Deserialize)]
struct CategoryFile {
    name: String,
    dimensions: DimensionsFile,
    #[serde(default)]
    depth_clusters: Vec<DepthCluster>,
}

#[derive(Serialize, Deserialize)]
struct PriorsFile {
    categories: Vec<CategoryFile>,
}

impl Priors {
    /// Validate and build priors.
    /// Every category must have the same number of depth clusters.
    pub fn new(categories: Vec<CategoryPriors>) -> Result<Self, PriorsError> {
        let expected = match categories.first() {
            Some(c) => c.depth_clusters.len(),
            None => return Err(PriorsError::Empty),
        };
        for cat in categories.iter() {
            if cat.dimensions.mean.iter().any(|&m| m.is_nan() || m <= 0.0) {
                return Err(PriorsError::NonPositiveMean(cat.name.clone()));
            }
            let bad_std = |s: Float| !s.is_nan() && s <= 0.0;
            if cat.dimensions.std.iter().any(|&s| bad_std(s))
                || cat.depth_clusters.iter().any(|c| bad_std(c.std))
            {
                return Err(PriorsError::NonPositiveStd(cat.name.clone()));
            }
            if cat.depth_clusters.len() != expected {
                return Err(PriorsError::ClusterCountMismatch {
                    name: cat.name.clone(),
                    expected,
                    got: cat.depth_clusters.len(),
                });
            }
        }
        Ok(Self { categories })
    }

    /// Parse priors from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, PriorsError> {
        let file: PriorsFile = serde_json::from_str(json)?;
        let categories = file
            .categories
            .into_iter()
            .map(|c| CategoryPriors {
                name: c.name,
                dimensions: DimensionPrior {
                    mean: Vec3::from(c.dimensions.mean),
                    std: Vec3::from(c.dimensions.std.map(|s| s.unwrap_or(Float::NAN))),
                },
                depth_clusters: c.depth_clusters,
            })
            .collect();
        Self::new(categories)
    }

    /// Read priors from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PriorsError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// Serialize back to the JSON layout.
    pub fn to_json(&self) -> Result<String, PriorsError> {
        let file = PriorsFile {
            categories: self
                .categories
                .iter()
                .map(|c| CategoryFile {
                    name: c.name.clone(),
                    dimensions: DimensionsFile {
                        mean: c.dimensions.mean.into(),
                        std: [0, 1, 2].map(|i| {
                            let s = c.dimensions.std[i];
                            if s.is_nan() {
                                None
                            } else {
                                Some(s)
                            }
                        }),
                    },
                    depth_clusters: c.depth_clusters.clone(),
                })
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    pub fn nb_categories(&self) -> usize {
        self.categories.len()
    }

    /// Number of depth clusters, the same for every category.
    pub fn nb_clusters(&self) -> usize {
        self.categories[0].depth_clusters.len()
    }

    pub fn category(&self, id: usize) -> Option<&CategoryPriors> {
        self.categories.get(id)
    }

    pub fn dimensions(&self, id: usize) -> Option<&DimensionPrior> {
        self.categories.get(id).map(|c| &c.dimensions)
    }

    /// Category id from its name.
    pub fn category_id(&self, name: &str) -> Option<usize> {
        self.categories.iter().position(|c| c.name == name)
    }

    /// Depth cluster whose scale is closest to the given box diagonal,
    /// with its index.
    pub fn closest_cluster(&self, id: usize, diagonal: Float) -> Option<(usize, &DepthCluster)> {
        let clusters = &self.categories.get(id)?.depth_clusters;
        let mut best: Option<(usize, &DepthCluster)> = None;
        for (i, cluster) in clusters.iter().enumerate() {
            let closer = best.map_or(true, |(_, b)| {
                (cluster.scale - diagonal).abs() < (b.scale - diagonal).abs()
            });
            if closer {
                best = Some((i, cluster));
            }
        }
        best
    }
}

// TESTS #############################################################
