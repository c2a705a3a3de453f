// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Weakly supervised 3D cuboid estimation from single images.
//!
//! The [`core`] module holds the geometry (2D boxes, cuboids and their
//! projections), the ground plane estimator, the prior-guided proposal
//! sampler with its scoring, and the cube head with its weakly supervised
//! losses. The [`math`] module holds rotation and statistics helpers,
//! and [`misc`] the type aliases and I/O conversions.

pub mod core;
pub mod math;
pub mod misc;
