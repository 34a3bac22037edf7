//! Sinusoidal Position Encoding
//!
//! Provides:
//! - `position_encoding_init`: fixed `(N, D)` position table
//! - `sinusoidal_encode`: rate-scaled sin/cos transform of a raw table
//! - `SinusoidalEncoding`: embedding layer that re-derives the sin/cos
//!   table from a stored raw table on every call, so the position rate can
//!   change per call (and per example)
//!
//! Row 0 is reserved for padding and is the zero vector in every table.

use candle_core::{Device, Module, Tensor};
use candle_nn::VarBuilder;
use deepvoice_config::constants::position as consts;
use deepvoice_config::{ConfigError, EmbeddingConfig, PositionalConfig};

use crate::embedding::embedding_lookup;
use crate::{init, Layer, Result};

/// Build the position table
///
/// Row `pos >= 1`, column `i` holds `rate * pos / 10000^(2i / D)`. With
/// `sinusoidal`, even columns take the sine of that value and odd columns
/// the cosine. Parity is per column index, so with odd `D` the last
/// column is an even column and takes the sine.
pub fn position_encoding_init(
    n_position: usize,
    d_pos_vec: usize,
    position_rate: f64,
    sinusoidal: bool,
    device: &Device,
) -> Result<Tensor> {
    check_table_dims(n_position, d_pos_vec)?;

    let mut table = vec![0f32; n_position * d_pos_vec];
    for pos in 1..n_position {
        for i in 0..d_pos_vec {
            let exponent = 2.0 * i as f64 / d_pos_vec as f64;
            let angle = position_rate * pos as f64 / consts::WAVELENGTH_BASE.powf(exponent);
            let value = match (sinusoidal, i % 2) {
                (false, _) => angle,
                (true, 0) => angle.sin(),
                (true, _) => angle.cos(),
            };
            table[pos * d_pos_vec + i] = value as f32;
        }
    }

    Ok(Tensor::from_vec(table, (n_position, d_pos_vec), device)?)
}

fn check_table_dims(n_position: usize, d_pos_vec: usize) -> Result<()> {
    if n_position == 0 {
        return Err(ConfigError::invalid("n_position", "must be positive").into());
    }
    if d_pos_vec == 0 {
        return Err(ConfigError::invalid("d_pos_vec", "must be positive").into());
    }
    Ok(())
}

/// `w * table`, then sin on even and cos on odd columns of rows >= 1
pub fn sinusoidal_encode(table: &Tensor, w: f64) -> candle_core::Result<Tensor> {
    encode_rows(&table.affine(w, 0.0)?)
}

/// Like [`sinusoidal_encode`] with a single-element rate tensor
///
/// The rate keeps its graph, so a learned rate receives gradients.
pub fn sinusoidal_encode_scaled(table: &Tensor, w: &Tensor) -> candle_core::Result<Tensor> {
    let w = w.to_dtype(table.dtype())?.reshape(())?;
    encode_rows(&table.broadcast_mul(&w)?)
}

fn encode_rows(y: &Tensor) -> candle_core::Result<Tensor> {
    let (rows, dim) = y.dims2()?;
    if rows <= 1 {
        return Ok(y.clone());
    }

    let parity: Vec<f32> = (0..dim)
        .map(|i| if i % 2 == 0 { 1.0 } else { 0.0 })
        .collect();
    let even = Tensor::from_vec(parity, (1, dim), y.device())?.to_dtype(y.dtype())?;
    let odd = even.affine(-1.0, 1.0)?;

    let positions = y.narrow(0, 1, rows - 1)?;
    let waves = (positions.sin()?.broadcast_mul(&even)? + positions.cos()?.broadcast_mul(&odd)?)?;
    Tensor::cat(&[&y.narrow(0, 0, 1)?, &waves], 0)
}

/// Position rate applied at lookup time
#[derive(Debug, Clone)]
pub enum PositionRate {
    /// One rate for the whole batch
    Scalar(f64),
    /// One rate per batch element, shape `(B,)` or `(B, 1)`
    PerExample(Tensor),
}

impl From<f64> for PositionRate {
    fn from(rate: f64) -> Self {
        Self::Scalar(rate)
    }
}

impl From<Tensor> for PositionRate {
    fn from(rate: Tensor) -> Self {
        Self::PerExample(rate)
    }
}

impl From<&Tensor> for PositionRate {
    fn from(rate: &Tensor) -> Self {
        Self::PerExample(rate.clone())
    }
}

/// Embedding over a raw position table, sin/cos applied per call
#[derive(Debug, Clone)]
pub struct SinusoidalEncoding {
    /// Raw (non-sinusoidal, rate 1.0) table
    weight: Tensor,
    config: EmbeddingConfig,
    default_rate: f64,
    training: bool,
}

impl SinusoidalEncoding {
    /// Encoding with padding index 0 and default rate 1.0
    pub fn new(num_embeddings: usize, embedding_dim: usize, vb: VarBuilder) -> Result<Self> {
        let config = EmbeddingConfig::default().with_padding_idx(consts::PADDING_IDX);
        Self::with_config(num_embeddings, embedding_dim, config, vb)
    }

    pub fn with_config(
        num_embeddings: usize,
        embedding_dim: usize,
        config: EmbeddingConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        check_table_dims(num_embeddings, embedding_dim)?;
        config.validate(num_embeddings)?;
        let weight = init::get_seeded(&vb, (num_embeddings, embedding_dim), "weight", || {
            position_encoding_init(
                num_embeddings,
                embedding_dim,
                consts::DEFAULT_RATE,
                false,
                vb.device(),
            )
        })?;

        tracing::debug!(num_embeddings, embedding_dim, "Created sinusoidal encoding");

        Ok(Self {
            weight,
            config,
            default_rate: consts::DEFAULT_RATE,
            training: true,
        })
    }

    /// Build from settings; `position_rate` becomes the default rate
    pub fn from_config(config: &PositionalConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let mut layer = Self::with_config(
            config.num_positions,
            config.embedding_dim,
            config.embedding_config(),
            vb,
        )?;
        layer.default_rate = config.position_rate;
        Ok(layer)
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    pub fn default_rate(&self) -> f64 {
        self.default_rate
    }

    /// Look up positions `x` with the table encoded at `rate`
    ///
    /// With a per-example rate, `x` is `(B, T)` and row `b` uses `rate[b]`.
    /// A one-element rate tensor applies to the whole batch.
    pub fn forward_with_rate(
        &self,
        x: &Tensor,
        rate: impl Into<PositionRate>,
    ) -> candle_core::Result<Tensor> {
        let base = &self.weight;
        match rate.into() {
            PositionRate::Scalar(w) => {
                let table = sinusoidal_encode(base, w)?;
                embedding_lookup(x, &table, &self.config)
            }
            PositionRate::PerExample(w) => {
                let w = w.flatten_all()?;
                let batch = w.dim(0)?;
                if batch == 1 {
                    let table = sinusoidal_encode_scaled(base, &w)?;
                    return embedding_lookup(x, &table, &self.config);
                }
                if x.dim(0)? != batch {
                    candle_core::bail!(
                        "position rate has {} elements for a batch of {}",
                        batch,
                        x.dim(0)?
                    );
                }
                let mut encoded = Vec::with_capacity(batch);
                for b in 0..batch {
                    let table = sinusoidal_encode_scaled(base, &w.get(b)?)?;
                    encoded.push(embedding_lookup(&x.get(b)?, &table, &self.config)?);
                }
                Tensor::stack(&encoded, 0)
            }
        }
    }
}

impl Module for SinusoidalEncoding {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        self.forward_with_rate(x, self.default_rate)
    }
}

impl Layer for SinusoidalEncoding {
    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}
