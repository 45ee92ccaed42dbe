// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Dense 4D tensors of Floats.
//!
//! Data is stored row major in the `[batch, rows, cols, channels]` order
//! (NHWC, "channels last"), so the flat offset of an element inside one image
//! is `(y * cols + x) * channels + c`, which is also the encoding used for
//! max pooling argmax indices.

use itertools::iproduct;
use nalgebra::DMatrix;

use crate::error::{Error, Result};
use crate::misc::type_aliases::{Float, Shape};

/// A dense NHWC tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Shape,
    data: Vec<Float>,
}

/// Number of elements of a shape.
pub fn numel(shape: Shape) -> usize {
    shape.iter().product()
}

impl Tensor {
    /// Tensor filled with zeros.
    pub fn zeros(shape: Shape) -> Self {
        Self {
            shape,
            data: vec![0.0; numel(shape)],
        }
    }

    /// Wrap an existing row major buffer.
    pub fn from_vec(shape: Shape, data: Vec<Float>) -> Result<Self> {
        if data.len() != numel(shape) {
            return Err(Error::BufferLength {
                shape,
                len: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Build a tensor by evaluating `f(b, y, x, c)` at every position.
    pub fn from_fn<F>(shape: Shape, mut f: F) -> Self
    where
        F: FnMut(usize, usize, usize, usize) -> Float,
    {
        let [n, h, w, c] = shape;
        let data = iproduct!(0..n, 0..h, 0..w, 0..c)
            .map(|(b, y, x, ch)| f(b, y, x, ch))
            .collect();
        Self { shape, data }
    }

    #[inline]
    pub fn shape(&self) -> Shape {
        self.shape
    }

    #[inline]
    pub fn batch(&self) -> usize {
        self.shape[0]
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.shape[1]
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.shape[2]
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.shape[3]
    }

    #[inline]
    pub fn data(&self) -> &[Float] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [Float] {
        &mut self.data
    }

    /// Number of values in one image of the batch.
    #[inline]
    pub fn image_len(&self) -> usize {
        self.shape[1] * self.shape[2] * self.shape[3]
    }

    /// Flat offset of an element.
    #[inline]
    pub fn offset(&self, b: usize, y: usize, x: usize, c: usize) -> usize {
        let [_, h, w, ch] = self.shape;
        ((b * h + y) * w + x) * ch + c
    }

    #[inline]
    pub fn get(&self, b: usize, y: usize, x: usize, c: usize) -> Float {
        self.data[self.offset(b, y, x, c)]
    }

    #[inline]
    pub fn set(&mut self, b: usize, y: usize, x: usize, c: usize, value: Float) {
        let offset = self.offset(b, y, x, c);
        self.data[offset] = value;
    }

    /// Apply a function to every element in place.
    pub fn map_inplace<F: Fn(Float) -> Float>(&mut self, f: F) {
        self.data.iter_mut().for_each(|v| *v = f(*v));
    }

    /// Columns `start..end` of every image, `x[:, :, start:end, :]`.
    pub fn slice_width(&self, start: usize, end: usize) -> Result<Self> {
        let [n, h, w, c] = self.shape;
        if start >= end || end > w {
            return Err(Error::shape("slice_width", [n, h, end, c], self.shape));
        }
        let width = end - start;
        let mut data = Vec::with_capacity(n * h * width * c);
        for (b, y) in iproduct!(0..n, 0..h) {
            let from = self.offset(b, y, start, 0);
            data.extend_from_slice(&self.data[from..from + width * c]);
        }
        Ok(Self {
            shape: [n, h, width, c],
            data,
        })
    }

    /// Concatenate tensors along the channel axis.
    pub fn concat_channels(tensors: &[&Tensor]) -> Result<Self> {
        let first = tensors.first().ok_or(Error::Empty("concat_channels"))?;
        let [n, h, w, _] = first.shape;
        let mut channels = 0;
        for t in tensors {
            let [tn, th, tw, tc] = t.shape;
            if (tn, th, tw) != (n, h, w) {
                return Err(Error::shape("concat_channels", [n, h, w, tc], t.shape));
            }
            channels += tc;
        }
        let mut data = Vec::with_capacity(n * h * w * channels);
        for pixel in 0..n * h * w {
            for t in tensors {
                let c = t.channels();
                data.extend_from_slice(&t.data[pixel * c..(pixel + 1) * c]);
            }
        }
        Ok(Self {
            shape: [n, h, w, channels],
            data,
        })
    }

    /// Reinterpret a `[batch, channels, rows, cols]` tensor as NHWC.
    ///
    /// The shape stored in `self` is read as NCHW.
    pub fn nchw_to_nhwc(&self) -> Self {
        let [n, c, h, w] = self.shape;
        let src = |b: usize, ch: usize, y: usize, x: usize| ((b * c + ch) * h + y) * w + x;
        Self::from_fn([n, h, w, c], |b, y, x, ch| self.data[src(b, ch, y, x)])
    }

    /// Permute an NHWC tensor into a buffer with the NCHW layout.
    ///
    /// The returned shape is `[batch, channels, rows, cols]`.
    pub fn nhwc_to_nchw(&self) -> Self {
        let [n, h, w, c] = self.shape;
        Self::from_fn([n, c, h, w], |b, ch, y, x| self.get(b, y, x, ch))
    }

    /// One channel of one image as a `rows x cols` matrix.
    pub fn channel(&self, b: usize, c: usize) -> DMatrix<Float> {
        DMatrix::from_fn(self.rows(), self.cols(), |y, x| self.get(b, y, x, c))
    }
}

// TESTS #############################################################
