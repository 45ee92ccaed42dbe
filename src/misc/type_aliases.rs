// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Type aliases for common types used all over the code base.

/// At the moment, the library is focused on f32 computation.
pub type Float = f32;

/// Flat argmax positions, same integer width as the framework `Targmax`.
pub type Index = i64;

/// Shape of a 4D tensor, ordered as `[batch, rows, cols, channels]`.
pub type Shape = [usize; 4];

/// A 2D kernel size, `(rows, cols)`.
pub type Kernel = (usize, usize);
