// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Miscellaneous helper functions that didn't fit elsewhere.

/// Compute the quotient and remainder of x/y both at the same time.
pub fn div_rem<T>(x: T, y: T) -> (T, T)
where
    T: std::ops::Div<Output = T> + std::ops::Rem<Output = T> + Copy,
{
    (x / y, x % y)
}

/// Integer division rounded up, `y` must not be zero.
pub fn div_ceil(x: usize, y: usize) -> usize {
    (x + y - 1) / y
}

/// Padding before and after a dimension for a SAME convolution or pooling.
///
/// The total padding is split with the smaller half first,
/// the convention used by TensorFlow.
/// An empty dimension needs no padding.
pub fn same_padding(size: usize, kernel: usize, stride: usize) -> (usize, usize) {
    if size == 0 {
        return (0, 0);
    }
    let out = div_ceil(size, stride);
    let needed = out.saturating_sub(1) * stride + kernel;
    let total = needed.saturating_sub(size);
    (total / 2, total - total / 2)
}

// TESTS #############################################################
