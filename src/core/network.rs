// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The UnDeepVO encoder-decoder network.
//!
//! The input is a batch of stereo pairs stored side by side,
//! `[batch, rows, 2 * cols, 3]`. The encoder works on the left image
//! (or on the channel stack of both images), and every decoder level
//! unpools with the argmax of the encoder level at the same resolution.

use rand::{rngs::StdRng, SeedableRng};
use tracing::{debug, info};

use crate::config::{DataFormat, InputMode, NetConfig};
use crate::error::{Error, Result};
use crate::misc::type_aliases::Shape;

use super::batch_norm::Mode;
use super::blocks::{DecoderBlock, DeconvBnRelu, EncoderBlock};
use super::summary::Architecture;
use super::tensor::Tensor;

/// Network with initialized weights, ready for forward passes.
#[derive(Debug, Clone)]
pub struct UnDeepVoNet {
    config: NetConfig,
    encoder: Vec<EncoderBlock>,
    decoder: Vec<DecoderBlock>,
    head: DeconvBnRelu,
}

/// Left image of side by side stereo pairs, `x[:, :, :cols, :]`.
pub fn left_image(stereo: &Tensor, img_cols: usize) -> Result<Tensor> {
    stereo.slice_width(0, img_cols)
}

/// Right image of side by side stereo pairs, `x[:, :, cols:, :]`.
pub fn right_image(stereo: &Tensor, img_cols: usize) -> Result<Tensor> {
    stereo.slice_width(img_cols, 2 * img_cols)
}

/// Left and right images stacked along the channels.
pub fn stereo_stack(stereo: &Tensor, img_cols: usize) -> Result<Tensor> {
    let left = left_image(stereo, img_cols)?;
    let right = right_image(stereo, img_cols)?;
    Tensor::concat_channels(&[&left, &right])
}

impl UnDeepVoNet {
    /// Validate the configuration and initialize every layer.
    ///
    /// Weights are drawn from a generator seeded with `config.seed`,
    /// so two networks built from the same configuration are identical.
    pub fn build(config: NetConfig) -> Result<Self> {
        let architecture = Architecture::from_config(&config)?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let bn = config.batch_norm;

        let mut channels = config.encoder_input_channels();
        let mut encoder = Vec::with_capacity(config.encoder.len());
        for stage in &config.encoder {
            encoder.push(EncoderBlock::new(&mut rng, stage, channels, bn));
            channels = stage.channels;
        }
        let mut decoder = Vec::with_capacity(config.decoder.len());
        for stage in &config.decoder {
            decoder.push(DecoderBlock::new(&mut rng, stage, channels, bn));
            channels = stage.channels;
        }
        let head = DeconvBnRelu::new(
            &mut rng,
            config.head_kernel,
            channels,
            config.head_channels,
            bn,
        );

        info!(
            "built network for {}x{} stereo pairs: {} levels, {} parameters",
            config.img_rows,
            config.img_cols,
            config.encoder.len(),
            architecture.total_params()
        );
        debug!("\n{}", architecture);
        Ok(Self {
            config,
            encoder,
            decoder,
            head,
        })
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// Layer by layer description, like a Keras `model.summary()`.
    pub fn summary(&self) -> Result<Architecture> {
        Architecture::from_config(&self.config)
    }

    /// Expected input shape for a batch of `batch` stereo pairs.
    pub fn input_shape(&self, batch: usize) -> Shape {
        let (rows, width) = (self.config.img_rows, 2 * self.config.img_cols);
        match self.config.data_format {
            DataFormat::ChannelsLast => [batch, rows, width, 3],
            DataFormat::ChannelsFirst => [batch, 3, rows, width],
        }
    }

    /// Trainable and non trainable parameter counts of the built layers.
    pub fn param_count(&self) -> (usize, usize) {
        let blocks = self
            .encoder
            .iter()
            .map(EncoderBlock::param_count)
            .chain(self.decoder.iter().map(DecoderBlock::param_count))
            .chain(std::iter::once(self.head.param_count()));
        blocks.fold((0, 0), |(t, n), (dt, dn)| (t + dt, n + dn))
    }

    /// Forward pass with the moving batch normalization statistics.
    pub fn predict(&mut self, input: &Tensor) -> Result<Tensor> {
        self.forward(input, Mode::Inference)
    }

    /// Forward pass of a batch of side by side stereo pairs.
    ///
    /// In `Mode::Training`, batch normalizations use the batch statistics
    /// and update their moving averages.
    pub fn forward(&mut self, input: &Tensor, mode: Mode) -> Result<Tensor> {
        let batch = input.batch();
        if batch == 0 {
            return Err(Error::Empty("forward batch"));
        }
        let expected = self.input_shape(batch);
        if input.shape() != expected {
            return Err(Error::shape("network input", expected, input.shape()));
        }
        let stereo = match self.config.data_format {
            DataFormat::ChannelsLast => input.clone(),
            DataFormat::ChannelsFirst => input.nchw_to_nhwc(),
        };
        let cols = self.config.img_cols;
        let mut x = match self.config.input_mode {
            InputMode::Left => left_image(&stereo, cols)?,
            InputMode::Stereo => stereo_stack(&stereo, cols)?,
        };

        let mut argmaxes = Vec::with_capacity(self.encoder.len());
        for block in self.encoder.iter_mut() {
            let (pooled, argmax) = block.forward(&x, mode)?;
            argmaxes.push(argmax);
            x = pooled;
        }
        for (block, argmax) in self.decoder.iter_mut().zip(argmaxes.iter().rev()) {
            x = block.forward(&x, argmax, mode)?;
        }
        let output = self.head.forward(&x, mode)?;
        debug!("network output {:?}", output.shape());

        Ok(match self.config.data_format {
            DataFormat::ChannelsLast => output,
            DataFormat::ChannelsFirst => output.nhwc_to_nchw(),
        })
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use crate::config::StageConfig;
    use crate::misc::type_aliases::Float;

    fn small_config() -> NetConfig {
        let mut config = NetConfig::new(6, 5);
        config.encoder = vec![StageConfig::new(4, (3, 3), 2), StageConfig::new(8, (3, 3), 2)];
        config.decoder = vec![StageConfig::new(4, (3, 3), 2), StageConfig::new(3, (3, 3), 2)];
        config.head_channels = 2;
        config
    }

    fn stereo_input(shape: Shape) -> Tensor {
        Tensor::from_fn(shape, |b, y, x, c| ((b * 7 + y * 3 + x * 5 + c) % 13) as Float / 13.0)
    }

    #[test]
    fn split_stereo_pair() {
        let stereo = Tensor::from_fn([1, 1, 4, 1], |_, _, x, _| x as Float);
        assert_eq!(left_image(&stereo, 2).unwrap().data(), &[0.0, 1.0]);
        assert_eq!(right_image(&stereo, 2).unwrap().data(), &[2.0, 3.0]);
        assert_eq!(stereo_stack(&stereo, 2).unwrap().data(), &[0.0, 2.0, 1.0, 3.0]);
    }

    #[test]
    fn output_shape_and_params_match_summary() {
        let mut net = UnDeepVoNet::build(small_config()).unwrap();
        let input = stereo_input(net.input_shape(2));
        let output = net.predict(&input).unwrap();
        assert_eq!(output.shape(), [2, 6, 5, 2]);
        assert!(output.data().iter().all(|&v| v >= 0.0));
        let summary = net.summary().unwrap();
        assert_eq!(net.param_count(), (summary.trainable_params(), summary.non_trainable_params()));
    }

    #[test]
    fn same_seed_same_output() {
        let input = stereo_input([1, 6, 10, 3]);
        let a = UnDeepVoNet::build(small_config()).unwrap().predict(&input).unwrap();
        let b = UnDeepVoNet::build(small_config()).unwrap().predict(&input).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn left_mode_ignores_right_image() {
        let mut net = UnDeepVoNet::build(small_config()).unwrap();
        let input = stereo_input([1, 6, 10, 3]);
        let mut changed = input.clone();
        changed.set(0, 2, 7, 1, 42.0);
        assert_eq!(net.predict(&input).unwrap(), net.predict(&changed).unwrap());
    }

    #[test]
    fn stereo_mode_uses_both_images() {
        let mut config = small_config();
        config.input_mode = InputMode::Stereo;
        let mut net = UnDeepVoNet::build(config).unwrap();
        let input = stereo_input([1, 6, 10, 3]);
        let output = net.predict(&input).unwrap();
        assert_eq!(output.shape(), [1, 6, 5, 2]);
        let mut changed = input.clone();
        changed.set(0, 2, 7, 1, 42.0);
        assert_ne!(output, net.predict(&changed).unwrap());
    }

    #[test]
    fn channels_first_layout() {
        let mut config = small_config();
        config.data_format = DataFormat::ChannelsFirst;
        let mut net = UnDeepVoNet::build(config).unwrap();
        assert_eq!(net.input_shape(1), [1, 3, 6, 10]);
        let input = stereo_input([1, 6, 10, 3]);
        let last = UnDeepVoNet::build(small_config()).unwrap().predict(&input).unwrap();
        let first = net.predict(&input.nhwc_to_nchw()).unwrap();
        assert_eq!(first.shape(), [1, 2, 6, 5]);
        assert_eq!(first.nchw_to_nhwc(), last);
    }

    #[test]
    fn wrong_input_shape() {
        let mut net = UnDeepVoNet::build(small_config()).unwrap();
        assert!(net.predict(&Tensor::zeros([1, 6, 5, 3])).is_err());
        assert!(net.predict(&Tensor::zeros([0, 6, 10, 3])).is_err());
    }

    #[test]
    fn invalid_config_not_built() {
        let mut config = small_config();
        config.decoder[0].channels = 5;
        assert!(UnDeepVoNet::build(config).is_err());
    }
}
