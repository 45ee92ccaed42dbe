// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Layer by layer description of a network, computed from its configuration.
//!
//! Shapes and parameter counts are inferred without allocating any weight,
//! which makes it cheap to inspect the full size network.

use std::collections::HashMap;
use std::fmt;

use crate::config::{DataFormat, InputMode, NetConfig, StageConfig};
use crate::core::{batch_norm::BatchNorm, conv, pooling::MaxPool};
use crate::error::Result;
use crate::misc::type_aliases::Kernel;

/// Output shape of a layer for any batch size, `(rows, cols, channels)`.
pub type LayerShape = [usize; 3];

/// One row of the summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerInfo {
    pub name: String,
    pub kind: &'static str,
    pub output_shape: LayerShape,
    pub trainable: usize,
    pub non_trainable: usize,
}

/// Description of the whole network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Architecture {
    layers: Vec<LayerInfo>,
    data_format: DataFormat,
}

/// Generates unique `kind_k` layer names.
#[derive(Default)]
struct Namer {
    counters: HashMap<&'static str, usize>,
}

impl Namer {
    fn next(&mut self, prefix: &'static str) -> String {
        let counter = self.counters.entry(prefix).or_insert(0);
        *counter += 1;
        format!("{}_{}", prefix, counter)
    }
}

struct Builder {
    namer: Namer,
    layers: Vec<LayerInfo>,
}

impl Builder {
    fn push(
        &mut self,
        prefix: &'static str,
        kind: &'static str,
        shape: LayerShape,
        params: (usize, usize),
    ) {
        let name = self.namer.next(prefix);
        self.layers.push(LayerInfo {
            name,
            kind,
            output_shape: shape,
            trainable: params.0,
            non_trainable: params.1,
        });
    }

    /// Convolution (direct or transposed), batch normalization, activation.
    fn unit(
        &mut self,
        transposed: bool,
        kernel: Kernel,
        input: LayerShape,
        channels: usize,
    ) -> LayerShape {
        let shape = [input[0], input[1], channels];
        let params = conv::param_count(kernel, input[2], channels);
        if transposed {
            self.push("conv2d_transpose", "Conv2DTranspose", shape, (params, 0));
        } else {
            self.push("conv2d", "Conv2D", shape, (params, 0));
        }
        let bn_params = BatchNorm::param_counts(channels);
        self.push("batch_normalization", "BatchNormalization", shape, bn_params);
        self.push("activation", "Activation", shape, (0, 0));
        shape
    }

    fn stage(&mut self, transposed: bool, stage: &StageConfig, input: LayerShape) -> LayerShape {
        let mut shape = input;
        for i in 0..stage.convs {
            shape = self.unit(transposed, stage.kernel_of(i), shape, stage.channels);
        }
        shape
    }
}

impl Architecture {
    /// Infer every layer of the network described by `config`.
    pub fn from_config(config: &NetConfig) -> Result<Self> {
        config.validate()?;
        let mut builder = Builder {
            namer: Namer::default(),
            layers: Vec::new(),
        };
        let (rows, cols) = (config.img_rows, config.img_cols);
        let input_shape = match config.data_format {
            DataFormat::ChannelsLast => [rows, 2 * cols, 3],
            DataFormat::ChannelsFirst => [3, rows, 2 * cols],
        };
        builder.push("input", "InputLayer", input_shape, (0, 0));
        builder.push("lambda", "Lambda", [rows, cols, 3], (0, 0));
        let mut shape = [rows, cols, 3];
        if config.input_mode == InputMode::Stereo {
            builder.push("lambda", "Lambda", [rows, cols, 3], (0, 0));
            shape = [rows, cols, 6];
            builder.push("concatenate", "Concatenate", shape, (0, 0));
        }

        // Shapes before each pooling, needed to size the unpoolings.
        let pool = MaxPool::default();
        let mut pre_pool = Vec::with_capacity(config.encoder.len());
        for stage in &config.encoder {
            shape = builder.stage(false, stage, shape);
            pre_pool.push(shape);
            let full = [1, shape[0], shape[1], shape[2]];
            let pooled = pool.output_shape(full).unwrap_or(full);
            shape = [pooled[1], pooled[2], pooled[3]];
            builder.push("max_pooling2d_arg_max", "MaxPooling2DArgMax", shape, (0, 0));
        }
        for (stage, restored) in config.decoder.iter().zip(pre_pool.iter().rev()) {
            shape = [restored[0], restored[1], shape[2]];
            builder.push("max_un_pooling2d_arg_max", "MaxUnPooling2DArgMax", shape, (0, 0));
            shape = builder.stage(true, stage, shape);
        }
        builder.unit(true, config.head_kernel, shape, config.head_channels);

        Ok(Self {
            layers: builder.layers,
            data_format: config.data_format,
        })
    }

    pub fn layers(&self) -> &[LayerInfo] {
        &self.layers
    }

    /// Shape of the last layer, in the configured data format.
    pub fn output_shape(&self) -> LayerShape {
        let [r, c, ch] = self.layers.last().map_or([0, 0, 0], |l| l.output_shape);
        match self.data_format {
            DataFormat::ChannelsLast => [r, c, ch],
            DataFormat::ChannelsFirst => [ch, r, c],
        }
    }

    pub fn trainable_params(&self) -> usize {
        self.layers.iter().map(|l| l.trainable).sum()
    }

    pub fn non_trainable_params(&self) -> usize {
        self.layers.iter().map(|l| l.non_trainable).sum()
    }

    pub fn total_params(&self) -> usize {
        self.trainable_params() + self.non_trainable_params()
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let rule = "=".repeat(65);
        writeln!(f, "{:<29}{:<26}{:<10}", "Layer (type)", "Output Shape", "Param #")?;
        writeln!(f, "{}", rule)?;
        for layer in &self.layers {
            let [a, b, c] = layer.output_shape;
            writeln!(
                f,
                "{:<29}{:<26}{:<10}",
                format!("{} ({})", layer.name, layer.kind),
                format!("(None, {}, {}, {})", a, b, c),
                layer.trainable + layer.non_trainable
            )?;
        }
        writeln!(f, "{}", rule)?;
        writeln!(f, "Total params: {}", self.total_params())?;
        writeln!(f, "Trainable params: {}", self.trainable_params())?;
        write!(f, "Non-trainable params: {}", self.non_trainable_params())
    }
}

// TESTS #############################################################
