// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Small statistics over slices of Floats.
//!
//! Non finite values (NaN, ±inf) are ignored by every function here.

use crate::misc::type_aliases::Float;

/// `count` values linearly spaced in `[start, end]`, both included.
#[allow(clippy::cast_precision_loss)]
pub fn linspace(start: Float, end: Float, count: usize) -> Vec<Float> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (count - 1) as Float;
            (0..count).map(|i| start + step * i as Float).collect()
        }
    }
}

/// Sorted copy of the finite values.
fn sorted_finite(values: &[Float]) -> Vec<Float> {
    let mut sorted: Vec<Float> = values.iter().cloned().filter(|v| v.is_finite()).collect();
    sorted.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted
}

/// Lower median (for an even count, the smaller of the two middle values).
pub fn median(values: &[Float]) -> Option<Float> {
    let sorted = sorted_finite(values);
    if sorted.is_empty() {
        None
    } else {
        Some(sorted[(sorted.len() - 1) / 2])
    }
}

/// Mean of the finite values, `None` if there is none.
#[allow(clippy::cast_precision_loss)]
pub fn finite_mean(values: &[Float]) -> Option<Float> {
    let (sum, count) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0_usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as Float)
    }
}

/// Mean of the finite values, exactly 0 if there is none.
pub fn safe_mean(values: &[Float]) -> Float {
    finite_mean(values).unwrap_or(0.0)
}

/// Unbiased standard deviation. A single value has a null deviation.
#[allow(clippy::cast_precision_loss)]
pub fn std_dev(values: &[Float]) -> Option<Float> {
    let finite: Vec<Float> = values.iter().cloned().filter(|v| v.is_finite()).collect();
    let mean = finite_mean(&finite)?;
    if finite.len() < 2 {
        return Some(0.0);
    }
    let sum_sq: Float = finite.iter().map(|v| (v - mean) * (v - mean)).sum();
    Some((sum_sq / (finite.len() - 1) as Float).sqrt())
}

/// Quantile `q ∈ [0, 1]` with linear interpolation between closest ranks.
#[allow(clippy::cast_precision_loss)]
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
pub fn quantile(values: &[Float], q: Float) -> Option<Float> {
    let sorted = sorted_finite(values);
    if sorted.is_empty() {
        return None;
    }
    let rank = q.max(0.0).min(1.0) * (sorted.len() - 1) as Float;
    let low = rank.floor() as usize;
    let high = rank.ceil() as usize;
    let fraction = rank - low as Float;
    Some(sorted[low] + (sorted[high] - sorted[low]) * fraction)
}

/// Index of the smallest value, first one in case of ties.
pub fn argmin(values: &[Float]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, Float)>, (i, &v)| match best {
            Some((_, b)) if b <= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

// TESTS #############################################################
