// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Max pooling that also records where each maximum came from.
//!
//! The recorded position of a maximum is the flat offset
//! `(y * cols + x) * channels + c` inside its own image (the batch index is
//! not included), so that unpooling can put the value back in place.

use itertools::iproduct;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::misc::helper;
use crate::misc::type_aliases::{Float, Index, Kernel, Shape};

use super::tensor::{numel, Tensor};

/// Padding strategy of a pooling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Padding {
    /// Output is `ceil(input / stride)`, windows may overlap the border.
    Same,
    /// Only windows fully inside the input.
    Valid,
}

/// Parameters of a 2D max pooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxPool {
    pub pool_size: Kernel,
    pub strides: Kernel,
    pub padding: Padding,
}

/// Argmax positions of a max pooling, with the shape they index into.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgMax {
    indices: Vec<Index>,
    pooled_shape: Shape,
    input_shape: Shape,
}

impl Default for MaxPool {
    /// 2x2 windows, stride 2, SAME padding.
    fn default() -> Self {
        Self {
            pool_size: (2, 2),
            strides: (2, 2),
            padding: Padding::Same,
        }
    }
}

fn output_size(size: usize, pool: usize, stride: usize, padding: Padding) -> Option<usize> {
    match padding {
        Padding::Same => Some(helper::div_ceil(size, stride)),
        Padding::Valid if size >= pool => Some((size - pool) / stride + 1),
        Padding::Valid => None,
    }
}

fn padding_before(size: usize, pool: usize, stride: usize, padding: Padding) -> usize {
    match padding {
        Padding::Same => helper::same_padding(size, pool, stride).0,
        Padding::Valid => 0,
    }
}

impl MaxPool {
    /// Shape of the pooled tensor.
    ///
    /// `None` if a stride is zero or a VALID window does not fit.
    pub fn output_shape(&self, input: Shape) -> Option<Shape> {
        let [n, h, w, c] = input;
        if self.strides.0 == 0 || self.strides.1 == 0 {
            return None;
        }
        let rows = output_size(h, self.pool_size.0, self.strides.0, self.padding)?;
        let cols = output_size(w, self.pool_size.1, self.strides.1, self.padding)?;
        Some([n, rows, cols, c])
    }

    /// Max pooling returning the pooled values and their argmax.
    ///
    /// Cells in the padding never win.
    /// When several cells hold the maximum, the first one in scan order wins.
    pub fn forward(&self, input: &Tensor) -> Result<(Tensor, ArgMax)> {
        let input_shape = input.shape();
        let [n, h, w, c] = input_shape;
        if h == 0 || w == 0 {
            return Err(Error::Empty("max_pool_with_argmax input"));
        }
        let window = [n, self.pool_size.0, self.pool_size.1, c];
        let pooled_shape = self
            .output_shape(input_shape)
            .ok_or_else(|| Error::shape("max_pool_with_argmax", window, input_shape))?;
        let [_, out_h, out_w, _] = pooled_shape;
        let (ph, pw) = self.pool_size;
        let (sh, sw) = self.strides;
        let pad_top = padding_before(h, ph, sh, self.padding);
        let pad_left = padding_before(w, pw, sw, self.padding);

        let mut values = Vec::with_capacity(numel(pooled_shape));
        let mut indices = Vec::with_capacity(numel(pooled_shape));
        for (b, oy, ox, ch) in iproduct!(0..n, 0..out_h, 0..out_w, 0..c) {
            let mut best: Option<(Float, usize)> = None;
            for (ky, kx) in iproduct!(0..ph, 0..pw) {
                let (py, px) = (oy * sh + ky, ox * sw + kx);
                if py < pad_top || px < pad_left || py - pad_top >= h || px - pad_left >= w {
                    continue;
                }
                let (y, x) = (py - pad_top, px - pad_left);
                let v = input.get(b, y, x, ch);
                match best {
                    Some((best_v, _)) if !(v > best_v) => (),
                    _ => best = Some((v, (y * w + x) * c + ch)),
                }
            }
            // SAME windows always overlap the input by at least one cell.
            let (v, index) = best.ok_or(Error::Empty("max_pool_with_argmax window"))?;
            values.push(v);
            indices.push(index as Index);
        }

        let pooled = Tensor::from_vec(pooled_shape, values)?;
        let argmax = ArgMax {
            indices,
            pooled_shape,
            input_shape,
        };
        Ok((pooled, argmax))
    }
}

/// Max pooling with argmax, `tf.nn.max_pool_with_argmax` semantics.
pub fn max_pool_with_argmax(input: &Tensor) -> Result<(Tensor, ArgMax)> {
    MaxPool::default().forward(input)
}

impl ArgMax {
    /// Wrap raw indices produced for a pooled tensor of `pooled_shape`.
    pub fn new(indices: Vec<Index>, pooled_shape: Shape, input_shape: Shape) -> Result<Self> {
        if indices.len() != numel(pooled_shape) {
            return Err(Error::BufferLength {
                shape: pooled_shape,
                len: indices.len(),
            });
        }
        Ok(Self {
            indices,
            pooled_shape,
            input_shape,
        })
    }

    pub fn indices(&self) -> &[Index] {
        &self.indices
    }

    /// Shape of the pooled tensor these indices belong to.
    pub fn pooled_shape(&self) -> Shape {
        self.pooled_shape
    }

    /// Shape of the tensor before pooling.
    pub fn input_shape(&self) -> Shape {
        self.input_shape
    }

    /// Decode a flat index into `(y, x, c)` in the input image.
    pub fn position(&self, index: Index) -> (usize, usize, usize) {
        let [_, _, w, c] = self.input_shape;
        let (pixel, ch) = helper::div_rem(index as usize, c);
        let (y, x) = helper::div_rem(pixel, w);
        (y, x, ch)
    }
}

// TESTS #############################################################
