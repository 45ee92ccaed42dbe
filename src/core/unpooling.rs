// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Max unpooling: put pooled values back at their argmax positions.
//!
//! The unpooled tensor is zero everywhere except at the recorded maxima.
//! Values landing on the same position are summed, like a scatter-add.

use crate::error::{Error, Result};
use crate::misc::type_aliases::{Index, Kernel, Shape};

use super::pooling::ArgMax;
use super::tensor::Tensor;

/// Shape of an unpooled tensor when only the stride is known.
pub fn unpool_output_shape(input: Shape, stride: Kernel) -> Shape {
    let [n, h, w, c] = input;
    [n, h * stride.0, w * stride.1, c]
}

/// Unpool into the exact shape the argmax was computed on.
///
/// Fails if `pooled` does not have the shape of the pooling output
/// that produced `argmax`.
pub fn max_unpool(pooled: &Tensor, argmax: &ArgMax) -> Result<Tensor> {
    if pooled.shape() != argmax.pooled_shape() {
        return Err(Error::shape("max_unpool", argmax.pooled_shape(), pooled.shape()));
    }
    scatter(pooled, argmax.indices(), argmax.input_shape())
}

/// Unpool with raw indices into a tensor `stride` times larger.
pub fn max_unpool_strided(pooled: &Tensor, indices: &[Index], stride: Kernel) -> Result<Tensor> {
    if indices.len() != pooled.data().len() {
        return Err(Error::BufferLength {
            shape: pooled.shape(),
            len: indices.len(),
        });
    }
    scatter(pooled, indices, unpool_output_shape(pooled.shape(), stride))
}

/// Scatter-add every pooled value to `batch * image_len + index`.
fn scatter(pooled: &Tensor, indices: &[Index], output_shape: Shape) -> Result<Tensor> {
    let mut output = Tensor::zeros(output_shape);
    let out_len = output.image_len();
    let in_len = pooled.image_len();
    if in_len == 0 {
        return Ok(output);
    }
    for (b, (values, indices)) in pooled
        .data()
        .chunks_exact(in_len)
        .zip(indices.chunks_exact(in_len))
        .enumerate()
    {
        let image = &mut output.data_mut()[b * out_len..(b + 1) * out_len];
        for (&v, &index) in values.iter().zip(indices) {
            if index < 0 || index as usize >= out_len {
                return Err(Error::IndexOutOfRange {
                    index,
                    size: out_len,
                });
            }
            image[index as usize] += v;
        }
    }
    Ok(output)
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;
    use crate::core::pooling::max_pool_with_argmax;
    use crate::misc::type_aliases::Float;

    #[test]
    fn unpool_restores_maxima() {
        #[rustfmt::skip]
        let data = vec![
            1.0, 2.0, 5.0, 3.0,
            4.0, 0.0, 1.0, 1.0,
            0.0, 9.0, 2.0, 2.0,
            3.0, 1.0, 2.0, 8.0,
        ];
        let input = Tensor::from_vec([1, 4, 4, 1], data).unwrap();
        let (pooled, argmax) = max_pool_with_argmax(&input).unwrap();
        let unpooled = max_unpool(&pooled, &argmax).unwrap();
        #[rustfmt::skip]
        let expected = vec![
            0.0, 0.0, 5.0, 0.0,
            4.0, 0.0, 0.0, 0.0,
            0.0, 9.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 8.0,
        ];
        assert_eq!(unpooled.data(), expected.as_slice());
    }

    #[test]
    fn batches_do_not_mix() {
        let input = Tensor::from_fn([3, 2, 2, 1], |b, y, x, _| {
            if y == b % 2 && x == 1 {
                1.0
            } else {
                0.0
            }
        });
        let (pooled, argmax) = max_pool_with_argmax(&input).unwrap();
        assert_eq!(max_unpool(&pooled, &argmax).unwrap(), input);
    }

    #[test]
    fn odd_shape_is_restored() {
        let input = Tensor::from_fn([1, 5, 3, 2], |_, y, x, c| (y * 3 + x + c) as Float);
        let (pooled, argmax) = max_pool_with_argmax(&input).unwrap();
        let unpooled = max_unpool(&pooled, &argmax).unwrap();
        assert_eq!(unpooled.shape(), [1, 5, 3, 2]);
    }

    #[test]
    fn mismatched_pooled_shape() {
        let input = Tensor::zeros([1, 8, 8, 4]);
        let (pooled, _) = max_pool_with_argmax(&input).unwrap();
        let (_, deeper_argmax) = max_pool_with_argmax(&pooled).unwrap();
        // Unpooling a level with the argmax of another level is an error.
        assert!(max_unpool(&pooled, &deeper_argmax).is_err());
    }

    #[test]
    fn strided_unpool() {
        let pooled = Tensor::from_vec([1, 1, 2, 1], vec![3.0, 7.0]).unwrap();
        let unpooled = max_unpool_strided(&pooled, &[4, 3], (2, 2)).unwrap();
        assert_eq!(unpooled.shape(), [1, 2, 4, 1]);
        assert_eq!(unpooled.data(), &[0.0, 0.0, 0.0, 7.0, 3.0, 0.0, 0.0, 0.0]);
        assert!(max_unpool_strided(&pooled, &[4, 8], (2, 2)).is_err());
        assert!(max_unpool_strided(&pooled, &[-1, 0], (2, 2)).is_err());
        assert!(max_unpool_strided(&pooled, &[0], (2, 2)).is_err());
    }

    #[test]
    fn duplicates_accumulate() {
        let pooled = Tensor::from_vec([1, 1, 2, 1], vec![3.0, 7.0]).unwrap();
        let unpooled = max_unpool_strided(&pooled, &[1, 1], (1, 1)).unwrap();
        assert_eq!(unpooled.data(), &[0.0, 10.0]);
    }

    #[quickcheck_macros::quickcheck]
    fn unpool_keeps_sum_of_maxima(h: u8, w: u8, seed: u16) -> bool {
        let shape = [2, h as usize % 7 + 1, w as usize % 7 + 1, 2];
        let input = Tensor::from_fn(shape, |b, y, x, c| {
            ((seed as usize + 13 * b + 5 * y + 3 * x + c) % 11) as Float
        });
        let (pooled, argmax) = max_pool_with_argmax(&input).unwrap();
        let unpooled = max_unpool(&pooled, &argmax).unwrap();
        let sum = |t: &Tensor| t.data().iter().sum::<Float>();
        unpooled.shape() == shape && sum(&unpooled) == sum(&pooled)
    }
}
