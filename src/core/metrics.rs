// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Loss and metric the network is evaluated with.
//!
//! Both treat the channel axis as a categorical distribution per pixel.

use crate::error::{Error, Result};
use crate::misc::type_aliases::Float;

use super::tensor::Tensor;

/// Probabilities are clipped to `[CLIP, 1 - CLIP]` before the logarithm.
pub const CLIP: Float = 1e-7;

fn check_same_shape(context: &'static str, pred: &Tensor, target: &Tensor) -> Result<usize> {
    if pred.shape() != target.shape() {
        return Err(Error::shape(context, target.shape(), pred.shape()));
    }
    let c = pred.channels();
    if c == 0 || pred.data().is_empty() {
        return Err(Error::Empty(context));
    }
    Ok(c)
}

/// Mean over pixels of `-sum(target * log(pred))`.
///
/// Predictions are normalized to sum to one over the channels.
/// A pixel whose predictions sum to zero counts as uniform.
pub fn categorical_crossentropy(pred: &Tensor, target: &Tensor) -> Result<Float> {
    let c = check_same_shape("categorical_crossentropy", pred, target)?;
    let mut total = 0.0;
    let mut pixels = 0;
    for (p, t) in pred.data().chunks_exact(c).zip(target.data().chunks_exact(c)) {
        let sum: Float = p.iter().sum();
        let loss: Float = p
            .iter()
            .zip(t)
            .map(|(&p, &t)| {
                let p = if sum > 0.0 { p / sum } else { 1.0 / c as Float };
                -t * p.max(CLIP).min(1.0 - CLIP).ln()
            })
            .sum();
        total += loss;
        pixels += 1;
    }
    Ok(total / pixels as Float)
}

/// First channel holding the maximum value.
fn argmax(values: &[Float]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, Float::NEG_INFINITY), |(best_i, best_v), (i, &v)| {
            if v > best_v {
                (i, v)
            } else {
                (best_i, best_v)
            }
        })
        .0
}

/// Fraction of pixels whose predicted channel is the target channel.
pub fn categorical_accuracy(pred: &Tensor, target: &Tensor) -> Result<Float> {
    let c = check_same_shape("categorical_accuracy", pred, target)?;
    let pixels = pred.data().len() / c;
    let hits = pred
        .data()
        .chunks_exact(c)
        .zip(target.data().chunks_exact(c))
        .filter(|(p, t)| argmax(p) == argmax(t))
        .count();
    Ok(hits as Float / pixels as Float)
}

// TESTS #############################################################
