// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Batch normalization over the channel axis.

use crate::error::{Error, Result};
use crate::misc::type_aliases::Float;

use super::tensor::Tensor;

/// Keras default for the variance epsilon.
pub const DEFAULT_EPSILON: Float = 1e-3;

/// Keras default for the moving statistics momentum.
pub const DEFAULT_MOMENTUM: Float = 0.99;

/// Which statistics are used to normalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Normalize with the moving statistics.
    Inference,
    /// Normalize with the statistics of the batch, and update the moving ones.
    Training,
}

/// Per channel batch normalization.
#[derive(Debug, Clone)]
pub struct BatchNorm {
    pub gamma: Vec<Float>,
    pub beta: Vec<Float>,
    pub moving_mean: Vec<Float>,
    pub moving_variance: Vec<Float>,
    pub epsilon: Float,
    pub momentum: Float,
}

impl BatchNorm {
    /// Identity initialized normalization of `channels` channels.
    pub fn new(channels: usize, epsilon: Float, momentum: Float) -> Self {
        Self {
            gamma: vec![1.0; channels],
            beta: vec![0.0; channels],
            moving_mean: vec![0.0; channels],
            moving_variance: vec![1.0; channels],
            epsilon,
            momentum,
        }
    }

    pub fn channels(&self) -> usize {
        self.gamma.len()
    }

    /// Trainable (gamma and beta) and non trainable (moving mean and
    /// variance) parameters of a normalization over `channels` channels.
    pub fn param_counts(channels: usize) -> (usize, usize) {
        (2 * channels, 2 * channels)
    }

    pub fn trainable_count(&self) -> usize {
        Self::param_counts(self.channels()).0
    }

    pub fn non_trainable_count(&self) -> usize {
        Self::param_counts(self.channels()).1
    }

    pub fn forward(&mut self, input: &Tensor, mode: Mode) -> Result<Tensor> {
        match mode {
            Mode::Inference => self.forward_inference(input),
            Mode::Training => self.forward_training(input),
        }
    }

    /// Normalize with the moving statistics.
    pub fn forward_inference(&self, input: &Tensor) -> Result<Tensor> {
        self.check(input)?;
        let (scale, shift) = self.affine(&self.moving_mean, &self.moving_variance);
        Ok(apply(input, &scale, &shift))
    }

    /// Normalize with the batch statistics and update the moving statistics.
    pub fn forward_training(&mut self, input: &Tensor) -> Result<Tensor> {
        self.check(input)?;
        let (mean, variance) = batch_statistics(input)?;
        let (scale, shift) = self.affine(&mean, &variance);
        let m = self.momentum;
        for (moving, batch) in self.moving_mean.iter_mut().zip(&mean) {
            *moving = *moving * m + batch * (1.0 - m);
        }
        for (moving, batch) in self.moving_variance.iter_mut().zip(&variance) {
            *moving = *moving * m + batch * (1.0 - m);
        }
        Ok(apply(input, &scale, &shift))
    }

    fn check(&self, input: &Tensor) -> Result<()> {
        let shape = input.shape();
        if shape[3] != self.channels() {
            let mut expected = shape;
            expected[3] = self.channels();
            return Err(Error::shape("batch_norm", expected, shape));
        }
        Ok(())
    }

    /// Fold the normalization into `x * scale + shift`.
    fn affine(&self, mean: &[Float], variance: &[Float]) -> (Vec<Float>, Vec<Float>) {
        let scale: Vec<Float> = self
            .gamma
            .iter()
            .zip(variance)
            .map(|(g, v)| g / (v + self.epsilon).sqrt())
            .collect();
        let shift = self
            .beta
            .iter()
            .zip(mean)
            .zip(&scale)
            .map(|((b, m), s)| b - m * s)
            .collect();
        (scale, shift)
    }
}

/// Mean and (biased) variance of every channel over batch, rows and cols.
pub fn batch_statistics(input: &Tensor) -> Result<(Vec<Float>, Vec<Float>)> {
    let c = input.channels();
    if c == 0 || input.data().is_empty() {
        return Err(Error::Empty("batch_statistics"));
    }
    let count = input.data().len() / c;
    let mut mean = vec![0.0; c];
    for pixel in input.data().chunks_exact(c) {
        mean.iter_mut().zip(pixel).for_each(|(m, v)| *m += v);
    }
    mean.iter_mut().for_each(|m| *m /= count as Float);
    let mut variance = vec![0.0; c];
    for pixel in input.data().chunks_exact(c) {
        variance
            .iter_mut()
            .zip(pixel)
            .zip(&mean)
            .for_each(|((var, v), m)| *var += (v - m) * (v - m));
    }
    variance.iter_mut().for_each(|v| *v /= count as Float);
    Ok((mean, variance))
}

fn apply(input: &Tensor, scale: &[Float], shift: &[Float]) -> Tensor {
    let mut output = input.clone();
    if scale.is_empty() {
        return output;
    }
    output.data_mut().chunks_exact_mut(scale.len()).for_each(|pixel| {
        pixel
            .iter_mut()
            .zip(scale)
            .zip(shift)
            .for_each(|((v, s), t)| *v = *v * s + t);
    });
    output
}

// TESTS #############################################################
