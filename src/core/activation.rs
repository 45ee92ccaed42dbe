// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Element-wise activation functions.

use crate::misc::type_aliases::Float;

use super::tensor::Tensor;

#[inline]
pub fn relu(x: Float) -> Float {
    x.max(0.0)
}

/// Rectified linear unit, in place.
pub fn relu_inplace(tensor: &mut Tensor) {
    tensor.map_inplace(relu);
}
