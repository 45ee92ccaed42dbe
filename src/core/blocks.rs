// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Building blocks of the autoencoder.
//!
//! A unit is a convolution followed by batch normalization and a ReLU.
//! An encoder block stacks units then max-pools, keeping the argmax.
//! A decoder block unpools with an argmax then stacks transposed units.

use rand::Rng;
use tracing::debug;

use crate::config::{BatchNormConfig, StageConfig};
use crate::error::Result;
use crate::misc::type_aliases::{Kernel, Shape};

use super::activation;
use super::batch_norm::{BatchNorm, Mode};
use super::conv::{Conv2d, Conv2dTranspose};
use super::pooling::{ArgMax, MaxPool};
use super::tensor::Tensor;
use super::unpooling;

/// Common interface of direct and transposed convolutions.
pub trait Convolution {
    fn forward(&self, input: &Tensor) -> Result<Tensor>;
    fn param_count(&self) -> usize;
    fn out_channels(&self) -> usize;
}

impl Convolution for Conv2d {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        Conv2d::forward(self, input)
    }
    fn param_count(&self) -> usize {
        Conv2d::param_count(self)
    }
    fn out_channels(&self) -> usize {
        Conv2d::out_channels(self)
    }
}

impl Convolution for Conv2dTranspose {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        Conv2dTranspose::forward(self, input)
    }
    fn param_count(&self) -> usize {
        Conv2dTranspose::param_count(self)
    }
    fn out_channels(&self) -> usize {
        Conv2dTranspose::out_channels(self)
    }
}

/// Convolution, then batch normalization, then ReLU.
#[derive(Debug, Clone)]
pub struct ConvUnit<C> {
    conv: C,
    bn: BatchNorm,
}

/// `conv -> batch norm -> relu`.
pub type ConvBnRelu = ConvUnit<Conv2d>;

/// `transposed conv -> batch norm -> relu`.
pub type DeconvBnRelu = ConvUnit<Conv2dTranspose>;

impl ConvUnit<Conv2d> {
    pub fn new<R: Rng>(
        rng: &mut R,
        kernel: Kernel,
        in_channels: usize,
        out_channels: usize,
        bn: BatchNormConfig,
    ) -> Self {
        Self {
            conv: Conv2d::new(rng, kernel, in_channels, out_channels),
            bn: BatchNorm::new(out_channels, bn.epsilon, bn.momentum),
        }
    }
}

impl ConvUnit<Conv2dTranspose> {
    pub fn new<R: Rng>(
        rng: &mut R,
        kernel: Kernel,
        in_channels: usize,
        out_channels: usize,
        bn: BatchNormConfig,
    ) -> Self {
        Self {
            conv: Conv2dTranspose::new(rng, kernel, in_channels, out_channels),
            bn: BatchNorm::new(out_channels, bn.epsilon, bn.momentum),
        }
    }
}

impl<C: Convolution> ConvUnit<C> {
    /// Assemble a unit from an existing convolution and normalization.
    pub fn from_parts(conv: C, bn: BatchNorm) -> Self {
        Self { conv, bn }
    }

    pub fn forward(&mut self, input: &Tensor, mode: Mode) -> Result<Tensor> {
        let convolved = self.conv.forward(input)?;
        let mut output = self.bn.forward(&convolved, mode)?;
        activation::relu_inplace(&mut output);
        Ok(output)
    }

    pub fn out_channels(&self) -> usize {
        self.conv.out_channels()
    }

    /// Trainable and non trainable parameter counts.
    pub fn param_count(&self) -> (usize, usize) {
        (
            self.conv.param_count() + self.bn.trainable_count(),
            self.bn.non_trainable_count(),
        )
    }
}

/// Convolution units followed by a max pooling with argmax.
#[derive(Debug, Clone)]
pub struct EncoderBlock {
    units: Vec<ConvBnRelu>,
    pool: MaxPool,
}

/// Max unpooling followed by transposed convolution units.
#[derive(Debug, Clone)]
pub struct DecoderBlock {
    units: Vec<DeconvBnRelu>,
}

fn sum_params<C: Convolution>(units: &[ConvUnit<C>]) -> (usize, usize) {
    units.iter().map(ConvUnit::param_count).fold((0, 0), |(t, n), (dt, dn)| (t + dt, n + dn))
}

impl EncoderBlock {
    pub fn new<R: Rng>(
        rng: &mut R,
        stage: &StageConfig,
        in_channels: usize,
        bn: BatchNormConfig,
    ) -> Self {
        let mut units = Vec::with_capacity(stage.convs);
        let mut channels = in_channels;
        for i in 0..stage.convs {
            units.push(ConvBnRelu::new(rng, stage.kernel_of(i), channels, stage.channels, bn));
            channels = stage.channels;
        }
        Self {
            units,
            pool: MaxPool::default(),
        }
    }

    /// Returns the pooled tensor and the argmax the mirrored decoder needs.
    pub fn forward(&mut self, input: &Tensor, mode: Mode) -> Result<(Tensor, ArgMax)> {
        let mut x = input.clone();
        for unit in self.units.iter_mut() {
            x = unit.forward(&x, mode)?;
        }
        let (pooled, argmax) = self.pool.forward(&x)?;
        debug!("encoder block {:?} -> {:?}", input.shape(), pooled.shape());
        Ok((pooled, argmax))
    }

    pub fn output_shape(&self, input: Shape) -> Option<Shape> {
        let channels = self.units.last().map_or(input[3], ConvUnit::out_channels);
        self.pool.output_shape([input[0], input[1], input[2], channels])
    }

    pub fn param_count(&self) -> (usize, usize) {
        sum_params(&self.units)
    }
}

impl DecoderBlock {
    pub fn new<R: Rng>(
        rng: &mut R,
        stage: &StageConfig,
        in_channels: usize,
        bn: BatchNormConfig,
    ) -> Self {
        let mut units = Vec::with_capacity(stage.convs);
        let mut channels = in_channels;
        for i in 0..stage.convs {
            units.push(DeconvBnRelu::new(rng, stage.kernel_of(i), channels, stage.channels, bn));
            channels = stage.channels;
        }
        Self { units }
    }

    /// Unpool `input` with `argmax` then apply the units.
    pub fn forward(&mut self, input: &Tensor, argmax: &ArgMax, mode: Mode) -> Result<Tensor> {
        let mut x = unpooling::max_unpool(input, argmax)?;
        for unit in self.units.iter_mut() {
            x = unit.forward(&x, mode)?;
        }
        debug!("decoder block {:?} -> {:?}", input.shape(), x.shape());
        Ok(x)
    }

    pub fn param_count(&self) -> (usize, usize) {
        sum_params(&self.units)
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use crate::misc::type_aliases::Float;
    use rand::{rngs::StdRng, SeedableRng};

    fn ramp(shape: Shape) -> Tensor {
        Tensor::from_fn(shape, |b, y, x, c| ((b + y * 3 + x * 5 + c * 7) % 10) as Float / 10.0)
    }

    #[test]
    fn unit_output_is_non_negative() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut unit = ConvBnRelu::new(&mut rng, (3, 3), 3, 4, BatchNormConfig::default());
        let output = unit.forward(&ramp([1, 5, 5, 3]), Mode::Inference).unwrap();
        assert_eq!(output.shape(), [1, 5, 5, 4]);
        assert!(output.data().iter().all(|&v| v >= 0.0));
        assert_eq!(unit.param_count(), (3 * 3 * 3 * 4 + 4 + 8, 8));
    }

    #[test]
    fn encoder_then_decoder_restores_resolution() {
        let mut rng = StdRng::seed_from_u64(2);
        let bn = BatchNormConfig::default();
        let mut encoder = EncoderBlock::new(&mut rng, &StageConfig::new(4, (3, 3), 2), 3, bn);
        let mut decoder = DecoderBlock::new(&mut rng, &StageConfig::new(2, (3, 3), 3), 4, bn);
        let input = ramp([2, 7, 6, 3]);
        let (pooled, argmax) = encoder.forward(&input, Mode::Inference).unwrap();
        assert_eq!(pooled.shape(), [2, 4, 3, 4]);
        assert_eq!(encoder.output_shape(input.shape()), Some(pooled.shape()));
        let output = decoder.forward(&pooled, &argmax, Mode::Inference).unwrap();
        assert_eq!(output.shape(), [2, 7, 6, 2]);
    }

    #[test]
    fn three_conv_stage_uses_tail_kernel() {
        let mut rng = StdRng::seed_from_u64(3);
        let stage = StageConfig {
            tail_kernel: Some((1, 1)),
            ..StageConfig::new(2, (3, 3), 3)
        };
        let block = EncoderBlock::new(&mut rng, &stage, 1, BatchNormConfig::default());
        let convs = (3 * 3 * 2 + 2) + (2 * 2 + 2) + (2 * 2 + 2);
        assert_eq!(block.param_count(), (convs + 3 * 4, 3 * 4));
    }

    #[test]
    fn training_mode_updates_statistics() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut unit = DeconvBnRelu::new(&mut rng, (3, 3), 2, 2, BatchNormConfig::default());
        let input = ramp([2, 4, 4, 2]);
        let before = unit.bn.moving_mean.clone();
        unit.forward(&input, Mode::Training).unwrap();
        assert_ne!(unit.bn.moving_mean, before);
    }

    #[test]
    fn unit_from_parts() {
        let conv = Conv2d::from_weights((1, 1), 1, 1, vec![-1.0], vec![0.0]).unwrap();
        let mut unit = ConvUnit::from_parts(conv, BatchNorm::new(1, 0.0, 0.99));
        let input = Tensor::from_vec([1, 1, 2, 1], vec![2.0, -3.0]).unwrap();
        let output = unit.forward(&input, Mode::Inference).unwrap();
        assert_eq!(output.data(), &[0.0, 3.0]);
    }
}
