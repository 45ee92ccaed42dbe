// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Configuration of the network topology.
//!
//! The default configuration is the UnDeepVO depth autoencoder:
//! seven encoder levels of 32 to 512 channels, each halving the resolution,
//! and seven mirrored decoder levels unpooling with the encoder argmaxes.

use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use thiserror::Error;

use crate::core::batch_norm::{DEFAULT_EPSILON, DEFAULT_MOMENTUM};
use crate::error::Result;
use crate::misc::type_aliases::{Float, Kernel};

/// Errors that can occur when validating a `NetConfig`.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    /// A size that must be strictly positive is zero.
    #[error("{what} must be greater than 0")]
    ZeroSize { what: &'static str },

    /// The network needs at least one encoder level.
    #[error("the encoder needs at least one level")]
    NoStage,

    /// Every encoder level needs a decoder level.
    #[error("{encoder} encoder levels but {decoder} decoder levels")]
    StageCount { encoder: usize, decoder: usize },

    /// Stages are built with two or three convolutions.
    #[error("level {level} has {convs} convolutions, only 2 or 3 are supported")]
    ConvCount { level: usize, convs: usize },

    /// A decoder level receives a tensor that its argmax cannot unpool.
    #[error("decoder level {level} receives {actual} channels but unpools {expected} channels")]
    ChannelMismatch {
        level: usize,
        expected: usize,
        actual: usize,
    },

    /// Batch normalization parameters out of range.
    #[error("invalid batch normalization: epsilon {epsilon}, momentum {momentum}")]
    BatchNorm { epsilon: Float, momentum: Float },
}

/// Memory layout of the input and output tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    /// `[batch, rows, cols, channels]`.
    #[default]
    ChannelsLast,
    /// `[batch, channels, rows, cols]`.
    ChannelsFirst,
}

/// What the encoder sees of the stereo pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// Only the left image (3 channels).
    #[default]
    Left,
    /// Left and right images stacked along the channels (6 channels).
    Stereo,
}

/// One level of the encoder or decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Output channels of every convolution of the level.
    pub channels: usize,
    /// Kernel of the first convolution.
    pub kernel: Kernel,
    /// Number of convolutions, 2 or 3.
    pub convs: usize,
    /// Kernel of the convolutions after the first one, defaults to `kernel`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tail_kernel: Option<Kernel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchNormConfig {
    pub epsilon: Float,
    pub momentum: Float,
}

/// Full description of a network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetConfig {
    /// Height of each image of the stereo pair.
    pub img_rows: usize,
    /// Width of each image of the stereo pair (the input is twice as wide).
    pub img_cols: usize,
    #[serde(default)]
    pub data_format: DataFormat,
    #[serde(default)]
    pub input_mode: InputMode,
    /// Encoder levels, from the input resolution down.
    pub encoder: Vec<StageConfig>,
    /// Decoder levels, from the deepest resolution up.
    pub decoder: Vec<StageConfig>,
    pub head_channels: usize,
    pub head_kernel: Kernel,
    #[serde(default)]
    pub batch_norm: BatchNormConfig,
    /// Seed of the weights initialization.
    #[serde(default)]
    pub seed: u64,
}

impl StageConfig {
    /// Level with `convs` convolutions sharing the same kernel.
    pub fn new(channels: usize, kernel: Kernel, convs: usize) -> Self {
        Self {
            channels,
            kernel,
            convs,
            tail_kernel: None,
        }
    }

    /// Kernel of the `i`-th convolution of the level.
    pub fn kernel_of(&self, i: usize) -> Kernel {
        if i == 0 {
            self.kernel
        } else {
            self.tail_kernel.unwrap_or(self.kernel)
        }
    }
}

impl Default for BatchNormConfig {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
            momentum: DEFAULT_MOMENTUM,
        }
    }
}

impl Default for NetConfig {
    fn default() -> Self {
        Self::new(128, 416)
    }
}

impl NetConfig {
    /// UnDeepVO topology for stereo pairs of `img_rows x img_cols` images.
    pub fn new(img_rows: usize, img_cols: usize) -> Self {
        let encoder = [
            (32, (7, 7)),
            (64, (5, 5)),
            (128, (3, 3)),
            (256, (3, 3)),
            (512, (3, 3)),
            (512, (3, 3)),
            (512, (3, 3)),
        ]
        .iter()
        .map(|&(channels, kernel)| StageConfig::new(channels, kernel, 2))
        .collect();
        let decoder = [512, 512, 256, 128, 64, 32, 16]
            .iter()
            .map(|&channels| StageConfig::new(channels, (3, 3), 2))
            .collect();
        Self {
            img_rows,
            img_cols,
            data_format: DataFormat::default(),
            input_mode: InputMode::default(),
            encoder,
            decoder,
            head_channels: 16,
            head_kernel: (3, 3),
            batch_norm: BatchNormConfig::default(),
            seed: 0,
        }
    }

    /// Read a JSON configuration file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Channels of the tensor fed to the encoder.
    pub fn encoder_input_channels(&self) -> usize {
        match self.input_mode {
            InputMode::Left => 3,
            InputMode::Stereo => 6,
        }
    }

    /// Check that the network described is buildable.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.img_rows == 0 {
            return Err(ConfigError::ZeroSize { what: "img_rows" });
        }
        if self.img_cols == 0 {
            return Err(ConfigError::ZeroSize { what: "img_cols" });
        }
        if self.head_channels == 0 {
            return Err(ConfigError::ZeroSize { what: "head_channels" });
        }
        if self.head_kernel.0 == 0 || self.head_kernel.1 == 0 {
            return Err(ConfigError::ZeroSize { what: "head_kernel" });
        }
        if self.encoder.is_empty() {
            return Err(ConfigError::NoStage);
        }
        if self.encoder.len() != self.decoder.len() {
            return Err(ConfigError::StageCount {
                encoder: self.encoder.len(),
                decoder: self.decoder.len(),
            });
        }
        let bn = self.batch_norm;
        if !(bn.epsilon >= 0.0) || !(0.0..=1.0).contains(&bn.momentum) {
            return Err(ConfigError::BatchNorm {
                epsilon: bn.epsilon,
                momentum: bn.momentum,
            });
        }
        for (level, stage) in self.encoder.iter().chain(&self.decoder).enumerate() {
            if stage.channels == 0 {
                return Err(ConfigError::ZeroSize { what: "stage channels" });
            }
            let kernels = [stage.kernel, stage.tail_kernel.unwrap_or(stage.kernel)];
            if kernels.iter().any(|k| k.0 == 0 || k.1 == 0) {
                return Err(ConfigError::ZeroSize { what: "stage kernel" });
            }
            if stage.convs != 2 && stage.convs != 3 {
                return Err(ConfigError::ConvCount {
                    level,
                    convs: stage.convs,
                });
            }
        }
        // Decoder level i unpools with the argmax of encoder level (n - 1 - i).
        let mut channels = self.encoder[self.encoder.len() - 1].channels;
        for (i, (stage, mirror)) in self.decoder.iter().zip(self.encoder.iter().rev()).enumerate() {
            if channels != mirror.channels {
                return Err(ConfigError::ChannelMismatch {
                    level: i,
                    expected: mirror.channels,
                    actual: channels,
                });
            }
            channels = stage.channels;
        }
        Ok(())
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn default_is_valid() {
        let config = NetConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.encoder.len(), 7);
        assert_eq!(config.encoder[0].kernel, (7, 7));
        assert_eq!(config.decoder[6].channels, 16);
    }

    #[test]
    fn json_round_trip() {
        let config = NetConfig::new(64, 96);
        let json = config.to_json().unwrap();
        let parsed: NetConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
        assert!(json.contains("\"data_format\": \"channels_last\""));
    }

    #[test]
    fn optional_fields_default() {
        let config = NetConfig {
            data_format: DataFormat::ChannelsFirst,
            input_mode: InputMode::Stereo,
            seed: 9,
            ..NetConfig::new(32, 48)
        };
        let mut value = serde_json::to_value(&config).unwrap();
        let fields = value.as_object_mut().unwrap();
        for key in &["data_format", "input_mode", "batch_norm", "seed"] {
            fields.remove(*key);
        }
        let parsed: NetConfig = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, NetConfig::new(32, 48));
    }

    #[test]
    fn tail_kernel_defaults_to_kernel() {
        let json = r#"{ "channels": 8, "kernel": [5, 5], "convs": 3 }"#;
        let stage: StageConfig = serde_json::from_str(json).unwrap();
        assert_eq!(stage.kernel_of(2), (5, 5));
        let stage = StageConfig {
            tail_kernel: Some((3, 3)),
            ..stage
        };
        assert_eq!(stage.kernel_of(0), (5, 5));
        assert_eq!(stage.kernel_of(1), (3, 3));
    }

    #[test]
    fn rejects_mirrored_channel_mismatch() {
        let mut config = NetConfig::default();
        // Level 2 of the decoder would receive 256 channels but unpool 512.
        config.decoder[1].channels = 256;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ChannelMismatch {
                level: 2,
                expected: 512,
                actual: 256
            })
        );
    }

    #[test]
    fn rejects_bad_sizes() {
        let mut config = NetConfig::default();
        config.img_rows = 0;
        assert!(config.validate().is_err());

        let mut config = NetConfig::default();
        config.decoder.pop();
        assert_eq!(
            config.validate(),
            Err(ConfigError::StageCount {
                encoder: 7,
                decoder: 6
            })
        );

        let mut config = NetConfig::default();
        config.encoder[3].convs = 4;
        assert_eq!(config.validate(), Err(ConfigError::ConvCount { level: 3, convs: 4 }));

        let mut config = NetConfig::default();
        config.encoder.clear();
        config.decoder.clear();
        assert_eq!(config.validate(), Err(ConfigError::NoStage));
    }
}
