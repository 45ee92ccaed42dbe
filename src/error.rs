// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type shared by the whole crate.

use thiserror::Error;

use crate::config::ConfigError;
use crate::misc::type_aliases::Shape;

/// Errors produced while building or running the network.
#[derive(Error, Debug)]
pub enum Error {
    /// Two tensors (or a tensor and a layer) disagree on a shape.
    #[error("shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Shape,
        actual: Shape,
    },

    /// A buffer length does not match the number of elements of a shape.
    #[error("buffer of length {len} cannot hold a tensor of shape {shape:?}")]
    BufferLength { shape: Shape, len: usize },

    /// An argmax index points outside of the unpooled tensor.
    #[error("argmax index {index} out of range for an unpooled image of {size} values")]
    IndexOutOfRange { index: i64, size: usize },

    /// Nothing to compute on.
    #[error("empty input: {0}")]
    Empty(&'static str),

    /// The configuration was rejected.
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias with the crate `Error`.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand to build a `ShapeMismatch`.
    pub fn shape(context: &'static str, expected: Shape, actual: Shape) -> Self {
        Error::ShapeMismatch {
            context,
            expected,
            actual,
        }
    }
}
