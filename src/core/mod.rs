// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Core functionalities of the UnDeepVO network.

pub mod activation;
pub mod batch_norm;
pub mod blocks;
pub mod conv;
pub mod metrics;
pub mod network;
pub mod pooling;
pub mod summary;
pub mod tensor;
pub mod unpooling;
