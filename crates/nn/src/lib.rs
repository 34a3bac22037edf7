//! DeepVoice3 layer building blocks on candle
//!
//! Provides:
//! - Position encodings (`position_encoding_init`, `SinusoidalEncoding`)
//! - Weight-normalized layer factories (`embedding`, `conv1d`,
//!   `conv_transpose1d`, `linearized_conv1d`, `conv_tbc`)
//! - `HighwayConv1d` with batch and incremental (streaming) forward
//! - `get_mask_from_lengths`
//! - SafeTensors checkpointing of `VarMap`s keyed by PyTorch parameter names
//!
//! Factories take a `VarBuilder`. Build from a `VarMap` to train (new
//! parameters get their initial values) or from a checkpoint to restore.
//!
//! Layers start in training mode. Call [`Layer::eval`] before incremental
//! decoding.

pub mod checkpoint;
pub mod conv;
pub mod conv_tbc;
pub mod conv_transpose;
pub mod embedding;
pub mod error;
pub mod highway;
pub mod incremental;
pub mod init;
pub mod layer;
pub mod linearized;
pub mod mask;
pub mod position;
pub mod weight_norm;

pub use checkpoint::{load_parameters, save_parameters, var_builder_from_file};
pub use conv::{conv1d, Conv1d};
pub use conv_tbc::{conv_tbc, ConvTbc};
pub use conv_transpose::{conv_transpose1d, ConvTranspose1d};
pub use embedding::{embedding, embedding_lookup, Embedding};
pub use error::{NnError, Result};
pub use highway::HighwayConv1d;
pub use incremental::InputBuffer;
pub use layer::Layer;
pub use linearized::{linearized_conv1d, LinearizedConv1d};
pub use mask::get_mask_from_lengths;
pub use position::{
    position_encoding_init, sinusoidal_encode, PositionRate, SinusoidalEncoding,
};
pub use weight_norm::WeightNorm;
