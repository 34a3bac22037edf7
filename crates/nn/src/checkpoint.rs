//! SafeTensors checkpointing
//!
//! Layers register their parameters in the `VarMap` behind the
//! `VarBuilder` they were built from, keyed by the builder path
//! (`weight`, `conv.weight_g`, `conv.weight_v`, `conv.bias`, ...).

use std::path::Path;

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};

use crate::{NnError, Result};

fn checkpoint_error(path: &Path, err: candle_core::Error) -> NnError {
    NnError::Checkpoint(format!("{}: {}", path.display(), err))
}

/// Write every variable of `varmap` to a safetensors file
pub fn save_parameters(varmap: &VarMap, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    varmap.save(path).map_err(|e| checkpoint_error(path, e))?;
    tracing::info!(path = %path.display(), tensors = varmap.all_vars().len(), "Saved parameters");
    Ok(())
}

/// Overwrite the variables of `varmap` in place from a safetensors file
///
/// Every variable must be present with a matching shape. Extra tensors
/// in the file are ignored. Returns the number of tensors loaded.
pub fn load_parameters(varmap: &mut VarMap, path: impl AsRef<Path>) -> Result<usize> {
    let path = path.as_ref();
    varmap.load(path).map_err(|e| checkpoint_error(path, e))?;
    let loaded = varmap.all_vars().len();
    tracing::info!(path = %path.display(), tensors = loaded, "Loaded parameters");
    Ok(loaded)
}

/// Read-only builder over a safetensors file, for inference
pub fn var_builder_from_file(
    path: impl AsRef<Path>,
    device: &Device,
) -> Result<VarBuilder<'static>> {
    let path = path.as_ref();
    let tensors =
        candle_core::safetensors::load(path, device).map_err(|e| checkpoint_error(path, e))?;
    tracing::info!(path = %path.display(), tensors = tensors.len(), "Opened checkpoint");
    Ok(VarBuilder::from_tensors(tensors, DType::F32, device))
}
