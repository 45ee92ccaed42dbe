// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Stride 1 convolutions with SAME padding, direct and transposed.
//!
//! Both are lowered to a single matrix product per image.
//! The direct convolution gathers patches (im2col) before the product,
//! the transposed convolution scatters the product back (col2im).

use itertools::iproduct;
use nalgebra::DMatrix;
use rand::distributions::{Distribution, Uniform};
use rand::Rng;

use crate::error::{Error, Result};
use crate::misc::helper;
use crate::misc::type_aliases::{Float, Kernel, Shape};

use super::tensor::Tensor;

/// Glorot (Xavier) uniform initialization of a kernel with `len` values.
pub fn glorot_uniform<R: Rng>(
    rng: &mut R,
    len: usize,
    fan_in: usize,
    fan_out: usize,
) -> Vec<Float> {
    let limit = (6.0 / (fan_in + fan_out) as Float).sqrt();
    let uniform = Uniform::new_inclusive(-limit, limit);
    (0..len).map(|_| uniform.sample(rng)).collect()
}

/// 2D convolution, kernel stored as `[rows, cols, in, out]`.
#[derive(Debug, Clone)]
pub struct Conv2d {
    kernel_size: Kernel,
    in_channels: usize,
    out_channels: usize,
    kernel: Vec<Float>,
    bias: Vec<Float>,
}

/// 2D transposed convolution, kernel stored as `[rows, cols, out, in]`.
#[derive(Debug, Clone)]
pub struct Conv2dTranspose {
    kernel_size: Kernel,
    in_channels: usize,
    out_channels: usize,
    kernel: Vec<Float>,
    bias: Vec<Float>,
}

/// Number of parameters of a (transposed) convolution with bias.
pub fn param_count(kernel_size: Kernel, in_channels: usize, out_channels: usize) -> usize {
    kernel_size.0 * kernel_size.1 * in_channels * out_channels + out_channels
}

fn check_kernel(
    kernel_size: Kernel,
    in_c: usize,
    out_c: usize,
    kernel: &[Float],
    bias: &[Float],
) -> Result<()> {
    let shape = [kernel_size.0, kernel_size.1, in_c, out_c];
    if kernel.len() != shape.iter().product::<usize>() {
        return Err(Error::BufferLength {
            shape,
            len: kernel.len(),
        });
    }
    if bias.len() != out_c {
        return Err(Error::BufferLength {
            shape: [1, 1, 1, out_c],
            len: bias.len(),
        });
    }
    Ok(())
}

fn check_input(context: &'static str, input: &Tensor, in_channels: usize) -> Result<()> {
    let shape = input.shape();
    if shape[1] == 0 || shape[2] == 0 {
        return Err(Error::Empty(context));
    }
    if shape[3] != in_channels {
        let mut expected = shape;
        expected[3] = in_channels;
        return Err(Error::shape(context, expected, shape));
    }
    Ok(())
}

fn add_bias(data: &mut [Float], bias: &[Float]) {
    if bias.is_empty() {
        return;
    }
    data.chunks_exact_mut(bias.len()).for_each(|pixel| {
        pixel.iter_mut().zip(bias).for_each(|(v, b)| *v += b);
    });
}

impl Conv2d {
    /// Convolution with Glorot uniform kernel and zero bias.
    pub fn new<R: Rng>(
        rng: &mut R,
        kernel_size: Kernel,
        in_channels: usize,
        out_channels: usize,
    ) -> Self {
        let receptive = kernel_size.0 * kernel_size.1;
        let kernel = glorot_uniform(
            rng,
            receptive * in_channels * out_channels,
            receptive * in_channels,
            receptive * out_channels,
        );
        Self {
            kernel_size,
            in_channels,
            out_channels,
            kernel,
            bias: vec![0.0; out_channels],
        }
    }

    /// Convolution with given weights.
    pub fn from_weights(
        kernel_size: Kernel,
        in_channels: usize,
        out_channels: usize,
        kernel: Vec<Float>,
        bias: Vec<Float>,
    ) -> Result<Self> {
        check_kernel(kernel_size, in_channels, out_channels, &kernel, &bias)?;
        Ok(Self {
            kernel_size,
            in_channels,
            out_channels,
            kernel,
            bias,
        })
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn param_count(&self) -> usize {
        param_count(self.kernel_size, self.in_channels, self.out_channels)
    }

    pub fn output_shape(&self, input: Shape) -> Shape {
        [input[0], input[1], input[2], self.out_channels]
    }

    /// Apply the convolution to a batch of images.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        check_input("conv2d", input, self.in_channels)?;
        let [n, h, w, c] = input.shape();
        let (kh, kw) = self.kernel_size;
        let (pad_top, _) = helper::same_padding(h, kh, 1);
        let (pad_left, _) = helper::same_padding(w, kw, 1);
        let patch_len = kh * kw * c;

        // Column-major (out x patch) view of the row-major [patch, out] kernel.
        let kernel_t = DMatrix::from_column_slice(self.out_channels, patch_len, &self.kernel);

        let mut output = Vec::with_capacity(n * h * w * self.out_channels);
        for b in 0..n {
            // Each column is the zero padded patch around one pixel.
            let mut patches = vec![0.0; patch_len * h * w];
            for (y, x) in iproduct!(0..h, 0..w) {
                let patch = &mut patches[(y * w + x) * patch_len..(y * w + x + 1) * patch_len];
                for (ky, kx) in iproduct!(0..kh, 0..kw) {
                    let (sy, sx) = (y + ky, x + kx);
                    if sy < pad_top || sx < pad_left || sy - pad_top >= h || sx - pad_left >= w {
                        continue;
                    }
                    let from = input.offset(b, sy - pad_top, sx - pad_left, 0);
                    let to = (ky * kw + kx) * c;
                    patch[to..to + c].copy_from_slice(&input.data()[from..from + c]);
                }
            }
            let cols = DMatrix::from_vec(patch_len, h * w, patches);
            // (out x pixels) in column-major order is exactly NHWC.
            let product = &kernel_t * cols;
            output.extend_from_slice(product.as_slice());
        }
        add_bias(&mut output, &self.bias);
        Tensor::from_vec(self.output_shape(input.shape()), output)
    }
}

impl Conv2dTranspose {
    /// Transposed convolution with Glorot uniform kernel and zero bias.
    pub fn new<R: Rng>(
        rng: &mut R,
        kernel_size: Kernel,
        in_channels: usize,
        out_channels: usize,
    ) -> Self {
        let receptive = kernel_size.0 * kernel_size.1;
        let kernel = glorot_uniform(
            rng,
            receptive * in_channels * out_channels,
            receptive * out_channels,
            receptive * in_channels,
        );
        Self {
            kernel_size,
            in_channels,
            out_channels,
            kernel,
            bias: vec![0.0; out_channels],
        }
    }

    /// Transposed convolution with given weights, kernel as `[rows, cols, out, in]`.
    pub fn from_weights(
        kernel_size: Kernel,
        in_channels: usize,
        out_channels: usize,
        kernel: Vec<Float>,
        bias: Vec<Float>,
    ) -> Result<Self> {
        check_kernel(kernel_size, in_channels, out_channels, &kernel, &bias)?;
        Ok(Self {
            kernel_size,
            in_channels,
            out_channels,
            kernel,
            bias,
        })
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn param_count(&self) -> usize {
        param_count(self.kernel_size, self.in_channels, self.out_channels)
    }

    pub fn output_shape(&self, input: Shape) -> Shape {
        [input[0], input[1], input[2], self.out_channels]
    }

    /// Apply the transposed convolution to a batch of images.
    ///
    /// Every input pixel at `p` spreads `x[p] * W[k]` to the output pixel
    /// `p + k - pad`, the adjoint of the SAME convolution.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        check_input("conv2d_transpose", input, self.in_channels)?;
        let [n, h, w, c] = input.shape();
        let (kh, kw) = self.kernel_size;
        let (pad_top, _) = helper::same_padding(h, kh, 1);
        let (pad_left, _) = helper::same_padding(w, kw, 1);
        let out_c = self.out_channels;
        let spread_len = kh * kw * out_c;

        let kernel = DMatrix::from_row_slice(spread_len, c, &self.kernel);

        let mut output = Tensor::zeros(self.output_shape(input.shape()));
        for b in 0..n {
            let image = &input.data()[b * input.image_len()..(b + 1) * input.image_len()];
            let pixels = DMatrix::from_column_slice(c, h * w, image);
            let spread = &kernel * pixels;
            for (y, x) in iproduct!(0..h, 0..w) {
                let column = spread.column(y * w + x);
                for (ky, kx) in iproduct!(0..kh, 0..kw) {
                    let (ty, tx) = (y + ky, x + kx);
                    if ty < pad_top || tx < pad_left || ty - pad_top >= h || tx - pad_left >= w {
                        continue;
                    }
                    let to = output.offset(b, ty - pad_top, tx - pad_left, 0);
                    let from = (ky * kw + kx) * out_c;
                    output.data_mut()[to..to + out_c]
                        .iter_mut()
                        .zip(column.rows(from, out_c).iter())
                        .for_each(|(o, v)| *o += v);
                }
            }
        }
        add_bias(output.data_mut(), &self.bias);
        Ok(output)
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use approx;
    use rand::{rngs::StdRng, SeedableRng};

    const EPSILON: Float = 1e-5;

    /// Straightforward 4-loops convolution used as ground truth.
    fn naive_conv(input: &Tensor, conv: &Conv2d) -> Tensor {
        let [n, h, w, c] = input.shape();
        let (kh, kw) = conv.kernel_size;
        let (pt, pl) = ((kh - 1) / 2, (kw - 1) / 2);
        let oc = conv.out_channels;
        Tensor::from_fn([n, h, w, oc], |b, y, x, o| {
            let mut acc = conv.bias[o];
            for (ky, kx, i) in iproduct!(0..kh, 0..kw, 0..c) {
                let sy = y as isize + ky as isize - pt as isize;
                let sx = x as isize + kx as isize - pl as isize;
                if sy >= 0 && sx >= 0 && (sy as usize) < h && (sx as usize) < w {
                    let k = conv.kernel[((ky * kw + kx) * c + i) * oc + o];
                    acc += input.get(b, sy as usize, sx as usize, i) * k;
                }
            }
            acc
        })
    }

    fn random_input(rng: &mut StdRng, shape: Shape) -> Tensor {
        let uniform = Uniform::new(-1.0, 1.0);
        Tensor::from_fn(shape, |_, _, _, _| uniform.sample(rng))
    }

    #[test]
    fn identity_kernel() {
        // 3x3 kernel with a single 1 at the center.
        let mut kernel = vec![0.0; 9];
        kernel[4] = 1.0;
        let conv = Conv2d::from_weights((3, 3), 1, 1, kernel, vec![0.5]).unwrap();
        let input = Tensor::from_fn([1, 3, 4, 1], |_, y, x, _| (y * 4 + x) as Float);
        let output = conv.forward(&input).unwrap();
        let expected: Vec<Float> = input.data().iter().map(|v| v + 0.5).collect();
        assert_eq!(output.data(), expected.as_slice());
    }

    #[test]
    fn box_filter_zero_padding() {
        let conv = Conv2d::from_weights((3, 3), 1, 1, vec![1.0; 9], vec![0.0]).unwrap();
        let input = Tensor::from_vec([1, 2, 2, 1], vec![1.0; 4]).unwrap();
        let output = conv.forward(&input).unwrap();
        // Every pixel sees the whole 2x2 image.
        assert_eq!(output.data(), &[4.0; 4]);
    }

    #[test]
    fn matches_naive_convolution() {
        let mut rng = StdRng::seed_from_u64(42);
        let cases = [
            ((3, 3), [2, 5, 6, 3]),
            ((7, 7), [1, 4, 9, 2]),
            ((2, 4), [1, 5, 5, 2]),
        ];
        for &(kernel, shape) in &cases {
            let conv = Conv2d::new(&mut rng, kernel, shape[3], 4);
            let input = random_input(&mut rng, shape);
            let fast = conv.forward(&input).unwrap();
            let slow = naive_conv(&input, &conv);
            assert_eq!(fast.shape(), slow.shape());
            assert!(fast.data().iter().zip(slow.data()).all(|(a, b)| {
                approx::relative_eq!(*a, *b, epsilon = EPSILON, max_relative = EPSILON)
            }));
        }
    }

    #[test]
    fn transpose_is_adjoint_of_convolution() {
        // <conv(x), y> == <conv_t(y), x> when both share the kernel and have no bias.
        let mut rng = StdRng::seed_from_u64(7);
        let (c_in, c_out) = (3, 2);
        let conv = Conv2d::new(&mut rng, (3, 5), c_in, c_out);
        // Transposed kernel layout [rows, cols, out, in] maps back to conv's in.
        let conv_t =
            Conv2dTranspose::from_weights((3, 5), c_out, c_in, conv.kernel.clone(), vec![0.0; c_in])
                .unwrap();
        let x = random_input(&mut rng, [2, 4, 6, c_in]);
        let y = random_input(&mut rng, [2, 4, 6, c_out]);
        let cx = conv.forward(&x).unwrap();
        let ty = conv_t.forward(&y).unwrap();
        let lhs: Float = cx.data().iter().zip(y.data()).map(|(a, b)| a * b).sum();
        let rhs: Float = ty.data().iter().zip(x.data()).map(|(a, b)| a * b).sum();
        assert!(approx::relative_eq!(lhs, rhs, epsilon = 1e-3, max_relative = 1e-4));
    }

    #[test]
    fn transpose_single_pixel_spreads_kernel() {
        let kernel: Vec<Float> = (1..=9).map(|v| v as Float).collect();
        let conv_t =
            Conv2dTranspose::from_weights((3, 3), 1, 1, kernel.clone(), vec![0.0]).unwrap();
        let mut input = Tensor::zeros([1, 3, 3, 1]);
        input.set(0, 1, 1, 0, 1.0);
        let output = conv_t.forward(&input).unwrap();
        assert_eq!(output.data(), kernel.as_slice());
    }

    #[test]
    fn wrong_channels_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let conv = Conv2d::new(&mut rng, (3, 3), 3, 8);
        assert!(conv.forward(&Tensor::zeros([1, 4, 4, 2])).is_err());
        assert!(Conv2d::from_weights((3, 3), 1, 1, vec![0.0; 8], vec![0.0]).is_err());
    }

    #[test]
    fn empty_images_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let conv = Conv2d::new(&mut rng, (3, 3), 1, 2);
        let conv_t = Conv2dTranspose::new(&mut rng, (3, 3), 1, 2);
        for &shape in &[[1, 0, 4, 1], [1, 4, 0, 1]] {
            assert!(conv.forward(&Tensor::zeros(shape)).is_err());
            assert!(conv_t.forward(&Tensor::zeros(shape)).is_err());
        }
    }

    #[test]
    fn parameter_count() {
        assert_eq!(param_count((7, 7), 3, 32), 7 * 7 * 3 * 32 + 32);
    }

    #[quickcheck_macros::quickcheck]
    fn glorot_within_limit(seed: u64, fan_in: u8, fan_out: u8) -> bool {
        let (fan_in, fan_out) = (fan_in as usize + 1, fan_out as usize + 1);
        let limit = (6.0 / (fan_in + fan_out) as Float).sqrt();
        let mut rng = StdRng::seed_from_u64(seed);
        glorot_uniform(&mut rng, 64, fan_in, fan_out)
            .iter()
            .all(|v| v.abs() <= limit)
    }
}
