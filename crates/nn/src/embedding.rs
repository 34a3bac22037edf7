//! Embedding tables and the lookup primitive
//!
//! `embedding_lookup` is the single entry point used by both the plain
//! [`Embedding`] layer and the sinusoidal position encoding. It covers the
//! lookup options candle's own `Embedding` lacks: a padding row that is
//! excluded from gradient updates, max-norm row capping and
//! frequency-scaled gradients.

use std::collections::HashMap;

use candle_core::{DType, Module, Tensor, Var};
use candle_nn::VarBuilder;
use deepvoice_config::constants::{embedding as consts, init as init_consts};
use deepvoice_config::EmbeddingConfig;

use crate::{init, Layer, Result};

/// Look up `ids` in `weight`
///
/// Output shape is `ids.dims() ++ [embedding_dim]`. `ids` may be `u8`,
/// `u32` or `i64`.
///
/// With `max_norm` set, every referenced row whose norm exceeds it is
/// rescaled before the lookup. A variable `weight` is rescaled in place, so
/// the capped rows persist across calls.
pub fn embedding_lookup(
    ids: &Tensor,
    weight: &Tensor,
    config: &EmbeddingConfig,
) -> candle_core::Result<Tensor> {
    let embedding_dim = weight.dim(1)?;
    let mut out_dims = ids.dims().to_vec();
    out_dims.push(embedding_dim);

    let flat_ids = ids.flatten_all()?;
    let weight = match config.max_norm {
        Some(max_norm) => renorm_referenced(weight, &flat_ids, max_norm, config.norm_type)?,
        None => weight.clone(),
    };
    let mut rows = weight.index_select(&flat_ids, 0)?;

    if let Some(padding_idx) = config.padding_idx {
        let pad = Tensor::new(padding_idx as u32, ids.device())?.to_dtype(flat_ids.dtype())?;
        let is_pad = flat_ids
            .broadcast_eq(&pad)?
            .unsqueeze(1)?
            .broadcast_as(rows.shape())?;
        let frozen = weight.detach().index_select(&flat_ids, 0)?;
        rows = is_pad.where_cond(&frozen, &rows)?;
    }

    if config.scale_grad_by_freq {
        rows = scale_grad_by_freq(&flat_ids, &rows)?;
    }

    if config.sparse {
        tracing::warn!("Sparse embedding gradients are not supported, using dense gradients");
    }

    rows.reshape(out_dims)
}

/// Cap the p-norm of each row referenced by `flat_ids` at `max_norm`
///
/// The rescale is outside the autograd graph: gradients reach `weight`
/// unscaled.
fn renorm_referenced(
    weight: &Tensor,
    flat_ids: &Tensor,
    max_norm: f64,
    norm_type: f64,
) -> candle_core::Result<Tensor> {
    let num_embeddings = weight.dim(0)?;
    let mut referenced = vec![0u8; num_embeddings];
    for id in flat_ids.to_dtype(DType::I64)?.to_vec1::<i64>()? {
        if let Some(slot) = usize::try_from(id).ok().and_then(|id| referenced.get_mut(id)) {
            *slot = 1;
        }
    }
    let referenced = Tensor::from_vec(referenced, (num_embeddings, 1), weight.device())?;

    let frozen = weight.detach();
    let norms = frozen
        .abs()?
        .powf(norm_type)?
        .sum_keepdim(1)?
        .powf(1.0 / norm_type)?;
    let limit = Tensor::new(max_norm, weight.device())?.to_dtype(norms.dtype())?;
    let over = (norms.broadcast_gt(&limit)? * referenced)?;
    let shrink = (norms.affine(1.0, consts::MAX_NORM_EPS)?.recip()? * max_norm)?;
    let scale = over.where_cond(&shrink, &norms.ones_like()?)?;
    let renormed = frozen.broadcast_mul(&scale)?;

    if weight.is_variable() {
        Var::from_tensor(weight)?.set(&renormed)?;
        return Ok(weight.clone());
    }
    weight + (renormed - frozen)?
}

/// Keep values, divide each row's gradient by its index frequency
fn scale_grad_by_freq(flat_ids: &Tensor, rows: &Tensor) -> candle_core::Result<Tensor> {
    let ids: Vec<i64> = flat_ids.to_dtype(DType::I64)?.to_vec1()?;
    let mut counts: HashMap<i64, u32> = HashMap::new();
    for id in &ids {
        *counts.entry(*id).or_insert(0) += 1;
    }
    let inv_freq: Vec<f32> = ids.iter().map(|id| 1.0 / counts[id] as f32).collect();
    let inv_freq = Tensor::from_vec(inv_freq, (ids.len(), 1), rows.device())?
        .to_dtype(rows.dtype())?;

    let frozen = rows.detach();
    &frozen + (rows - &frozen)?.broadcast_mul(&inv_freq)?
}

/// Trainable lookup table
#[derive(Debug, Clone)]
pub struct Embedding {
    weight: Tensor,
    config: EmbeddingConfig,
    training: bool,
}

impl Embedding {
    pub fn new(weight: Tensor, config: EmbeddingConfig) -> Self {
        Self {
            weight,
            config,
            training: true,
        }
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    pub fn num_embeddings(&self) -> usize {
        self.weight.dims()[0]
    }

    pub fn embedding_dim(&self) -> usize {
        self.weight.dims()[1]
    }
}

impl Module for Embedding {
    fn forward(&self, ids: &Tensor) -> candle_core::Result<Tensor> {
        embedding_lookup(ids, &self.weight, &self.config)
    }
}

impl Layer for Embedding {
    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}

/// Embedding table initialized from `N(0, 0.01)`
///
/// Not weight-normalized. Every row is sampled, the padding row included.
pub fn embedding(
    num_embeddings: usize,
    embedding_dim: usize,
    padding_idx: Option<usize>,
    vb: VarBuilder,
) -> Result<Embedding> {
    let config = EmbeddingConfig {
        padding_idx,
        ..Default::default()
    };
    config.validate(num_embeddings)?;

    let weight = vb.get_with_hints(
        (num_embeddings, embedding_dim),
        "weight",
        init::normal(init_consts::EMBEDDING_STD),
    )?;

    tracing::debug!(
        num_embeddings,
        embedding_dim,
        ?padding_idx,
        std = init_consts::EMBEDDING_STD,
        "Created embedding"
    );

    Ok(Embedding::new(weight, config))
}
