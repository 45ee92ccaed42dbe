// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! UnDeepVO encoder-decoder network in Rust.
//!
//! A convolutional autoencoder for stereo image pairs whose decoder
//! unpools with the argmax positions recorded by the encoder max poolings.
//! It runs on a small CPU tensor runtime providing exactly the layers
//! the network needs: convolutions, transposed convolutions,
//! batch normalization, ReLU, max pooling with argmax and max unpooling.

pub mod config;
pub mod core;
pub mod error;
pub mod misc;

pub use crate::config::NetConfig;
pub use crate::core::network::UnDeepVoNet;
pub use crate::core::tensor::Tensor;
pub use crate::error::{Error, Result};
