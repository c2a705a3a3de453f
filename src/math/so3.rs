// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Helper functions for 3D rotations represented as 3x3 matrices.
//!
//! Cuboid rotations have their columns equal to the local axes of the cuboid
//! expressed in the camera frame. Column 1 is the "up" axis of an object.
//!
//! Interesting reads:
//! - Sophus c++ library: <https://github.com/strasdat/Sophus>
//! - Zhou et al. "On the continuity of rotation representations in neural networks" (6D).

use nalgebra::{Quaternion, UnitQuaternion};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::misc::type_aliases::{Float, Mat3, Vec3, Vec6};

/// Threshold for using Taylor series in computations.
const EPSILON_TAYLOR_SERIES: Float = 1e-2;
const EPSILON_TAYLOR_SERIES_2: Float = EPSILON_TAYLOR_SERIES * EPSILON_TAYLOR_SERIES;
const _1_8: Float = 0.125;
const _1_48: Float = 1.0 / 48.0;

/// Norm under which a vector is considered degenerate.
const EPSILON_NORM: Float = 1e-8;

/// Hat operator.
/// Goes from so3 parameterization to so3 element (skew-symmetric matrix).
#[rustfmt::skip]
pub fn hat(w: Vec3) -> Mat3 {
    Mat3::new(
         0.0,  -w.z,   w.y,
         w.z,   0.0,  -w.x,
        -w.y,   w.x,   0.0,
    )
}

/// Compute the exponential map from Lie algebra so3 to Lie group SO3.
/// Goes from an axis-angle vector to a rotation.
#[allow(clippy::useless_let_if_seq)]
pub fn exp(w: Vec3) -> UnitQuaternion<Float> {
    let theta_2 = w.norm_squared();
    let real_factor;
    let imag_factor;
    if theta_2 < EPSILON_TAYLOR_SERIES_2 {
        real_factor = 1.0 - _1_8 * theta_2;
        imag_factor = 0.5 - _1_48 * theta_2;
    } else {
        let theta = theta_2.sqrt();
        let half_theta = 0.5 * theta;
        real_factor = half_theta.cos();
        imag_factor = half_theta.sin() / theta;
    }
    UnitQuaternion::from_quaternion(Quaternion::from_parts(real_factor, imag_factor * w))
}

/// Same as `exp` but directly returns the rotation matrix.
pub fn exp_matrix(w: Vec3) -> Mat3 {
    exp(w).to_rotation_matrix().into_inner()
}

/// Cosine of the angle of the relative rotation `r1^T * r2`.
///
/// Clamped to `[-1, 1]` so that slightly non orthonormal inputs stay valid.
pub fn relative_angle_cos(r1: &Mat3, r2: &Mat3) -> Float {
    let trace = (r1.transpose() * r2).trace();
    ((trace - 1.0) * 0.5).max(-1.0).min(1.0)
}

/// Check that a matrix is a rotation: `R^T R = I` and `det(R) = +1`.
pub fn is_rotation(mat: &Mat3, epsilon: Float) -> bool {
    let orthogonality = (mat.transpose() * mat - Mat3::identity()).abs().max();
    orthogonality < epsilon && (mat.determinant() - 1.0).abs() < epsilon
}

/// Build a rotation from two raw (unnormalized) columns, stacked in a `Vec6`.
///
/// Gram-Schmidt: `x = normalize(a)`, `z = normalize(x × b)`, `y = z × x`.
/// Returns `None` if `a` is null or `b` is parallel to `a`.
pub fn from_two_columns(raw: &Vec6) -> Option<Mat3> {
    let a = Vec3::new(raw[0], raw[1], raw[2]);
    let b = Vec3::new(raw[3], raw[4], raw[5]);
    let x = a.try_normalize(EPSILON_NORM)?;
    let z = x.cross(&b).try_normalize(EPSILON_NORM)?;
    let y = z.cross(&x);
    Some(Mat3::from_columns(&[x, y, z]))
}

/// Rotate a vector `v` around a unit `axis` by an angle `theta` (Rodrigues formula).
pub fn rotate_vector(v: &Vec3, axis: &Vec3, theta: Float) -> Vec3 {
    let (sin_theta, cos_theta) = theta.sin_cos();
    v * cos_theta + axis.cross(v) * sin_theta + axis * axis.dot(v) * (1.0 - cos_theta)
}

/// Unit vector perpendicular to the given one.
pub fn perpendicular(v: &Vec3) -> Vec3 {
    let candidate = if v.x == 0.0 {
        Vec3::new(0.0, v.z, -v.y)
    } else {
        Vec3::new(v.y, -v.x, 0.0)
    };
    candidate.try_normalize(EPSILON_NORM).unwrap_or_else(Vec3::x)
}

/// Rotation whose "up" column (column 1) is the given unit normal,
/// turned around that normal by a yaw angle.
///
/// Columns are `[x, normal, x × normal]`, a right-handed basis.
pub fn orthobasis_from_normal(normal: &Vec3, yaw: Float) -> Mat3 {
    let x = rotate_vector(&perpendicular(normal), normal, yaw).normalize();
    let z = x.cross(normal);
    Mat3::from_columns(&[x, *normal, z])
}

/// A family of `count` rotations with yaw angles linearly spaced in `[0, π]`
/// around the given unit normal.
pub fn orthobasis_family(normal: &Vec3, count: usize) -> Vec<Mat3> {
    crate::math::stats::linspace(0.0, std::f32::consts::PI, count)
        .into_iter()
        .map(|yaw| orthobasis_from_normal(normal, yaw))
        .collect()
}

/// Random orthonormal basis from 3 gaussian vectors re-orthogonalized by cross products.
///
/// This is an approximation of a uniform sampler on SO3, not an exact one.
pub fn random_orthobasis<R: Rng>(rng: &mut R) -> Mat3 {
    let mut gaussian = || {
        Vec3::new(
            rng.sample(StandardNormal),
            rng.sample(StandardNormal),
            rng.sample(StandardNormal),
        )
    };
    let b = gaussian();
    let c = gaussian().try_normalize(EPSILON_NORM).unwrap_or_else(Vec3::z);
    let a = b
        .cross(&c)
        .try_normalize(EPSILON_NORM)
        .unwrap_or_else(|| perpendicular(&c));
    let b = c.cross(&a).normalize();
    Mat3::from_rows(&[a.transpose(), b.transpose(), c.transpose()])
}

/// Rotation built from a ground normal with an arbitrary yaw,
/// its last row being the normal.
pub fn from_normal(normal: &Vec3) -> Mat3 {
    let mut t0 = normal.cross(&Vec3::x());
    if t0.norm_squared() < 0.001 {
        t0 = normal.cross(&Vec3::y());
    }
    let t0 = t0.normalize();
    let t1 = normal.cross(&t0).normalize();
    Mat3::from_rows(&[t0.transpose(), t1.transpose(), normal.transpose()])
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use approx;
    use quickcheck_macros;
    use rand::{rngs::StdRng, SeedableRng};

    const EPSILON_ROTATION: Float = 1e-4;

    #[test]
    fn exp_of_zero_is_identity() {
        assert_eq!(Mat3::identity(), exp_matrix(Vec3::zeros()));
    }

    #[test]
    fn relative_angle_of_quarter_turn() {
        let r = exp_matrix(Vec3::new(0.0, 0.0, std::f32::consts::FRAC_PI_2));
        let cos = relative_angle_cos(&Mat3::identity(), &r);
        assert!(cos.abs() < 1e-6);
        assert!((relative_angle_cos(&r, &r) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn two_columns_degenerate() {
        assert!(from_two_columns(&Vec6::new(0.0, 0.0, 0.0, 1.0, 0.0, 0.0)).is_none());
        assert!(from_two_columns(&Vec6::new(1.0, 0.0, 0.0, 2.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn from_normal_is_rotation() {
        let n = Vec3::new(0.1, 0.9, -0.2).normalize();
        let r = from_normal(&n);
        assert!(is_rotation(&r, EPSILON_ROTATION));
        approx::assert_relative_eq!(r.row(2).transpose(), n, epsilon = 1e-6);
    }

    #[test]
    fn family_size() {
        let family = orthobasis_family(&Vec3::y(), 36);
        assert_eq!(36, family.len());
        approx::assert_relative_eq!(family[0].column(1).into_owned(), Vec3::y());
    }

    // PROPERTY TESTS ################################################

    #[quickcheck_macros::quickcheck]
    fn hat_is_cross_product(x: i8, y: i8, z: i8) -> bool {
        let w = Vec3::new(x as Float, y as Float, z as Float);
        let v = Vec3::new(1.0, -2.0, 0.5);
        hat(w) * v == w.cross(&v)
    }

    #[quickcheck_macros::quickcheck]
    fn random_orthobasis_is_rotation(seed: u64) -> bool {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..20).all(|_| is_rotation(&random_orthobasis(&mut rng), EPSILON_ROTATION))
    }

    #[quickcheck_macros::quickcheck]
    fn orthobasis_from_normal_is_rotation(x: i8, y: i8, z: i8, yaw: u8) -> bool {
        let normal = match Vec3::new(x as Float, y as Float, z as Float).try_normalize(1e-6) {
            Some(n) => n,
            None => return true,
        };
        let yaw = yaw as Float / 255.0 * std::f32::consts::PI;
        let r = orthobasis_from_normal(&normal, yaw);
        is_rotation(&r, EPSILON_ROTATION)
            && approx::relative_eq!(r.column(1).into_owned(), normal, epsilon = 1e-6)
    }

    #[quickcheck_macros::quickcheck]
    fn rotate_vector_keeps_norm(x: i8, y: i8, z: i8, theta: i8) -> bool {
        let v = Vec3::new(x as Float, y as Float, z as Float);
        let rotated = rotate_vector(&v, &Vec3::y(), theta as Float / 10.0);
        (rotated.norm() - v.norm()).abs() <= 1e-4 * (1.0 + v.norm())
    }

    #[quickcheck_macros::quickcheck]
    fn two_columns_gives_rotation(a: i8, b: i8, c: i8, d: i8, e: i8, f: i8) -> bool {
        let raw = Vec6::new(
            a as Float, b as Float, c as Float, d as Float, e as Float, f as Float,
        );
        match from_two_columns(&raw) {
            Some(r) => is_rotation(&r, EPSILON_ROTATION),
            None => true,
        }
    }
}
